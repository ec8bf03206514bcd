//! Cache payload encoding.
//!
//! Payloads are the plain MessagePack encoding of the response value: no
//! envelope, version tag or checksum. Writer and reader must agree on the
//! response schema; bytes that do not decode into the expected type are
//! treated as corrupt by the interceptor.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// Encode a response value into cache payload bytes.
pub fn encode<T>(value: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    rmp_serde::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode cache payload bytes into a response value.
pub fn decode<T>(bytes: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    rmp_serde::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serializer};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Market {
        id: u32,
        symbol: String,
        active: bool,
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refuses to serialize"))
        }
    }

    #[test]
    fn test_decode_encoded_value() {
        let market = Market {
            id: 7,
            symbol: "BTC-USDT".to_string(),
            active: true,
        };
        let bytes = encode(&market).unwrap();
        assert_eq!(decode::<Market>(&bytes).unwrap(), market);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // 0xc1 is never used by MessagePack
        let err = decode::<Market>(&[0xc1, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_empty_payload() {
        assert!(matches!(decode::<Market>(&[]), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_other_schema() {
        let bytes = encode(&vec![1_u8, 2, 3]).unwrap();
        assert!(decode::<Market>(&bytes).is_err());
    }

    #[test]
    fn test_encode_failure_is_reported() {
        let err = encode(&Unserializable).unwrap_err();
        assert!(matches!(err, CodecError::Encode(ref msg) if msg.contains("refuses")));
    }
}
