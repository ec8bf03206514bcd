//! Panic recovery for the call path.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures_util::FutureExt;

use crate::chain::{Next, UnaryInterceptor};
use crate::context::CallContext;
use crate::error::{CallError, Result};

/// Converts a panic anywhere downstream into [`CallError::Internal`].
///
/// Place it first in the chain so it covers every other interceptor and the
/// handler. The caller only sees a generic "internal server error"; the panic
/// message is logged together with the method.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicRecovery;

impl PanicRecovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<Req, Resp> UnaryInterceptor<Req, Resp> for PanicRecovery
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn intercept(
        &self,
        ctx: CallContext,
        request: Req,
        next: Next<'_, Req, Resp>,
    ) -> Result<Resp> {
        let method = ctx.method.clone();
        match AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(
                    method = %method,
                    panic = %panic_message(panic.as_ref()),
                    "panic recovered"
                );
                Err(CallError::internal("internal server error"))
            }
        }
    }

    fn name(&self) -> &str {
        "panic_recovery"
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::InterceptorChain;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let chain: InterceptorChain<u32, u32> = InterceptorChain::new().with(PanicRecovery::new());
        let handler = |_ctx: CallContext, request: u32| async move {
            if request == 0 {
                panic!("division by zero");
            }
            Ok::<_, CallError>(100 / request)
        };

        let err = assert_err!(chain.call(CallContext::new("Divide"), 0, &handler).await);
        assert!(matches!(err, CallError::Internal(ref msg) if msg == "internal server error"));
    }

    #[tokio::test]
    async fn test_successful_call_passes_through() {
        let chain: InterceptorChain<u32, u32> = InterceptorChain::new().with(PanicRecovery);
        let handler = |_ctx: CallContext, request: u32| async move { Ok::<_, CallError>(100 / request) };

        let response = chain.call(CallContext::new("Divide"), 4, &handler).await;
        assert_eq!(assert_ok!(response), 25);
    }

    #[tokio::test]
    async fn test_handler_error_is_not_rewritten() {
        let chain: InterceptorChain<u32, u32> = InterceptorChain::new().with(PanicRecovery);
        let handler = |ctx: CallContext, _request: u32| async move {
            Err::<u32, _>(CallError::failed(ctx.method, "not found"))
        };

        let err = assert_err!(chain.call(CallContext::new("Lookup"), 1, &handler).await);
        assert!(matches!(err, CallError::Failed { .. }));
    }

    #[test]
    fn test_panic_message_payloads() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(static_str.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(owned.as_ref()), "owned boom");

        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
