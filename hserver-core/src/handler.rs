// Stage handler dispatch
//
// Handlers are written as plain closures or async functions taking a `Call`.
// The concrete handler type stays monomorphized behind `Handler`, and is
// type-erased into a `BoxedHandler` only when it is stored on a tree node.

use crate::{Context, Error};
use serde_json::Value;
use std::future::{Future, Ready};
use std::pin::Pin;
use std::sync::Arc;

/// What a handler produces: a value, nothing ("undefined"), or a failure.
pub type HandlerResult = Result<Option<Value>, Error>;

/// Boxed future returned by type-erased handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Arguments handed to a stage handler.
///
/// `result` is populated for `output` and `leave` handlers; `error` only for
/// `leave` handlers of a failed (or not-found) request.
#[derive(Debug, Clone)]
pub struct Call {
    pub context: Context,
    pub result: Option<Value>,
    pub error: Option<Error>,
}

impl Call {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            result: None,
            error: None,
        }
    }

    pub fn with_result(mut self, result: Option<Value>) -> Self {
        self.result = result;
        self
    }

    pub fn with_error(mut self, error: Option<Error>) -> Self {
        self.error = error;
        self
    }
}

/// A handler that can run in any pipeline stage.
pub trait Handler: Send + Sync + 'static {
    type Future: Future<Output = HandlerResult> + Send + 'static;

    fn call(&self, call: Call) -> Self::Future;
}

impl<F, Fut> Handler for F
where
    F: Fn(Call) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    type Future = Fut;

    #[inline]
    fn call(&self, call: Call) -> Self::Future {
        self(call)
    }
}

/// Adapter for handlers that complete without awaiting anything.
#[derive(Clone)]
pub struct SyncHandler<F> {
    f: F,
}

impl<F> Handler for SyncHandler<F>
where
    F: Fn(Call) -> HandlerResult + Send + Sync + 'static,
{
    type Future = Ready<HandlerResult>;

    #[inline]
    fn call(&self, call: Call) -> Self::Future {
        std::future::ready((self.f)(call))
    }
}

/// Type-erased handler stored on tree nodes.
///
/// Cloning is cheap and preserves identity, see [`BoxedHandler::ptr_eq`].
#[derive(Clone)]
pub struct BoxedHandler {
    inner: Arc<dyn ErasedHandler>,
}

impl BoxedHandler {
    pub fn new<H: Handler>(handler: H) -> Self {
        Self {
            inner: Arc::new(HandlerWrapper { handler }),
        }
    }

    #[inline]
    pub fn call(&self, call: Call) -> HandlerFuture {
        self.inner.call(call)
    }

    /// Whether both handles refer to the same registered handler.
    pub fn ptr_eq(&self, other: &BoxedHandler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxedHandler")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

trait ErasedHandler: Send + Sync {
    fn call(&self, call: Call) -> HandlerFuture;
}

struct HandlerWrapper<H> {
    handler: H,
}

impl<H: Handler> ErasedHandler for HandlerWrapper<H> {
    #[inline]
    fn call(&self, call: Call) -> HandlerFuture {
        Box::pin(self.handler.call(call))
    }
}

/// Conversion into a stored handler, implemented for handlers and for
/// already boxed handles (which keep their identity).
pub trait IntoBoxedHandler {
    fn into_boxed(self) -> BoxedHandler;
}

impl<H: Handler> IntoBoxedHandler for H {
    fn into_boxed(self) -> BoxedHandler {
        BoxedHandler::new(self)
    }
}

impl IntoBoxedHandler for BoxedHandler {
    fn into_boxed(self) -> BoxedHandler {
        self
    }
}

/// Box an async handler.
///
/// # Example
///
/// ```
/// use hserver_core::handler::{handler, Call};
/// use serde_json::json;
///
/// let h = handler(|call: Call| async move {
///     Ok(Some(json!(call.context.get_str("pathname"))))
/// });
/// ```
#[inline]
pub fn handler<H: Handler>(h: H) -> BoxedHandler {
    BoxedHandler::new(h)
}

/// Box a handler that returns its result synchronously.
#[inline]
pub fn sync_handler<F>(f: F) -> BoxedHandler
where
    F: Fn(Call) -> HandlerResult + Send + Sync + 'static,
{
    BoxedHandler::new(SyncHandler { f })
}
