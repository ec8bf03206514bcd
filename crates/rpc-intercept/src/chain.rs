//! Interceptor traits and the ordered chain that runs them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::CallContext;
use crate::error::{CallError, Result};

/// The terminal call at the end of an interceptor chain.
///
/// Implemented for async closures `Fn(CallContext, Req) -> Future<Output = Result<Resp>>`,
/// so a generated client stub or a service method can be plugged in directly.
#[async_trait]
pub trait Handler<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, ctx: CallContext, request: Req) -> Result<Resp>;
}

#[async_trait]
impl<Req, Resp, F, Fut> Handler<Req, Resp> for F
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    async fn call(&self, ctx: CallContext, request: Req) -> Result<Resp> {
        (self)(ctx, request).await
    }
}

/// Interceptor for unary calls.
///
/// # Implementation Notes
///
/// - Call `next.run(ctx, request)` to continue the chain
/// - Returning without calling `next` answers the call directly
/// - The context must be passed on unchanged unless the interceptor's purpose
///   is to alter it, so deadlines reach the underlying call
#[async_trait]
pub trait UnaryInterceptor<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn intercept(
        &self,
        ctx: CallContext,
        request: Req,
        next: Next<'_, Req, Resp>,
    ) -> Result<Resp>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Invoker for the remainder of the chain.
pub struct Next<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    interceptors: &'a [Arc<dyn UnaryInterceptor<Req, Resp>>],
    handler: &'a dyn Handler<Req, Resp>,
}

impl<'a, Req, Resp> Next<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn new(
        interceptors: &'a [Arc<dyn UnaryInterceptor<Req, Resp>>],
        handler: &'a dyn Handler<Req, Resp>,
    ) -> Self {
        Self {
            interceptors,
            handler,
        }
    }

    /// Number of interceptors still ahead of the handler.
    pub fn remaining(&self) -> usize {
        self.interceptors.len()
    }

    /// Invoke the next interceptor, or the handler once the chain is exhausted.
    pub async fn run(self, ctx: CallContext, request: Req) -> Result<Resp> {
        match self.interceptors.split_first() {
            Some((interceptor, rest)) => {
                interceptor
                    .intercept(ctx, request, Next::new(rest, self.handler))
                    .await
            }
            None => self.handler.call(ctx, request).await,
        }
    }
}

/// Ordered list of interceptors, outermost first.
pub struct InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    interceptors: Vec<Arc<dyn UnaryInterceptor<Req, Resp>>>,
}

impl<Req, Resp> InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Append an interceptor; it runs after every interceptor added before it.
    pub fn with<I>(mut self, interceptor: I) -> Self
    where
        I: UnaryInterceptor<Req, Resp> + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append an interceptor that is shared with other chains.
    pub fn with_shared(mut self, interceptor: Arc<dyn UnaryInterceptor<Req, Resp>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Run the chain for one call.
    ///
    /// If the context carries a deadline, the whole chain runs under it and an
    /// elapsed deadline yields [`CallError::DeadlineExceeded`]. Dropping the
    /// returned future cancels the call, including the handler.
    pub async fn call<H>(&self, ctx: CallContext, request: Req, handler: &H) -> Result<Resp>
    where
        H: Handler<Req, Resp>,
    {
        let next = Next::new(&self.interceptors, handler);
        match ctx.deadline {
            Some(deadline) => {
                let method = ctx.method.clone();
                let deadline = tokio::time::Instant::from_std(deadline);
                match tokio::time::timeout_at(deadline, next.run(ctx, request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::debug!(method = %method, "call deadline exceeded");
                        Err(CallError::DeadlineExceeded(method))
                    }
                }
            }
            None => next.run(ctx, request).await,
        }
    }
}

impl<Req, Resp> Default for InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}
