//! Unary call interception for RPC clients and servers.
//!
//! A unary call is intercepted by an ordered [`InterceptorChain`]. Each
//! [`UnaryInterceptor`] receives the call context, the request and a [`Next`]
//! handle that invokes the remainder of the chain and, finally, the
//! [`Handler`] that performs the real call.
//!
//! ```text
//! caller → interceptor 1 → interceptor 2 → … → handler
//!            ↑ may answer without calling next (e.g. a cache hit)
//! ```
//!
//! Interceptors are free to return without calling `next`, to call it once,
//! or to inspect and replace the response it produced. Errors from the
//! handler travel back through the chain unchanged unless an interceptor
//! decides otherwise.

pub mod chain;
pub mod context;
pub mod error;
pub mod recovery;

pub use chain::{Handler, InterceptorChain, Next, UnaryInterceptor};
pub use context::CallContext;
pub use error::{CallError, Result};
pub use recovery::PanicRecovery;
