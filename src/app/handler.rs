//! Handler and hook types: the closed set of return shapes a handler may
//! produce ([`Payload`]) and the type-erased async function signatures
//! the application stores them behind.
//!
//! Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and
//! shared across tasks without copying the underlying closure. The
//! `Into*` conversion traits exist so registration sites accept any
//! suitable async closure without repeating the two-type-parameter
//! where-bound.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::http::{Response, StatusCode};
use crate::routing::Params;

use super::error::{Error, HttpError};

/// Type-erased, heap-allocated future returned by handlers and hooks.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a view handler hands back to the dispatcher.
///
/// This is the closed set of accepted return shapes; anything
/// application-specific goes through [`Payload::Custom`] and the
/// application's coercion hook.
pub enum Payload {
    /// A finished response, passed through unchanged.
    Response(Response),
    /// A text body, wrapped with status 200 and the default content type.
    Text(String),
    /// A text body with an explicit status.
    TextWithStatus(String, StatusCode),
    /// A text body with an explicit status and extra headers.
    TextWithHeaders(String, StatusCode, Vec<(String, String)>),
    /// A JSON value, serialized with an `application/json` content type.
    Json(serde_json::Value),
    /// An application-defined value, coerced by the application's hook.
    Custom(Box<dyn Any + Send>),
}

impl Payload {
    /// A plain text payload.
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text(body.into())
    }

    /// An application-defined payload for the coercion hook.
    pub fn custom<T: Any + Send>(value: T) -> Self {
        Self::Custom(Box::new(value))
    }
}

impl From<Response> for Payload {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<String> for Payload {
    fn from(body: String) -> Self {
        Self::Text(body)
    }
}

impl From<&str> for Payload {
    fn from(body: &str) -> Self {
        Self::Text(body.to_owned())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Result type of view handlers, hooks, and status handlers.
pub type HandlerResult = Result<Payload, Error>;

/// Type-erased view handler: matched route params in, payload out.
pub type ViewHandler = Arc<dyn Fn(Params) -> BoxFuture<HandlerResult> + Send + Sync + 'static>;

/// Conversion trait for async view handler functions.
pub trait IntoViewHandler: Send + Sync + 'static {
    /// Call the handler with the matched params, boxing the returned future.
    fn call(&self, params: Params) -> BoxFuture<HandlerResult>;
}

impl<T, F> IntoViewHandler for T
where
    T: Fn(Params) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, params: Params) -> BoxFuture<HandlerResult> {
        Box::pin((self)(params))
    }
}

/// Type-erased status handler: the structured failure in, payload out.
pub type ErrorHandler = Arc<dyn Fn(HttpError) -> BoxFuture<HandlerResult> + Send + Sync + 'static>;

/// Conversion trait for async status handler functions.
pub trait IntoErrorHandler: Send + Sync + 'static {
    fn call(&self, error: HttpError) -> BoxFuture<HandlerResult>;
}

impl<T, F> IntoErrorHandler for T
where
    T: Fn(HttpError) -> F + Send + Sync + 'static,
    F: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, error: HttpError) -> BoxFuture<HandlerResult> {
        Box::pin((self)(error))
    }
}

/// Type-erased pre-hook. A non-`None` return short-circuits dispatch and
/// is treated as the handler result.
pub type BeforeHook =
    Arc<dyn Fn() -> BoxFuture<Result<Option<Payload>, Error>> + Send + Sync + 'static>;

/// Conversion trait for async pre-hook functions.
pub trait IntoBeforeHook: Send + Sync + 'static {
    fn call(&self) -> BoxFuture<Result<Option<Payload>, Error>>;
}

impl<T, F> IntoBeforeHook for T
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = Result<Option<Payload>, Error>> + Send + 'static,
{
    fn call(&self) -> BoxFuture<Result<Option<Payload>, Error>> {
        Box::pin((self)())
    }
}

/// Type-erased post-hook: receives the response being finalized and must
/// return one, allowing chained mutation.
pub type AfterHook =
    Arc<dyn Fn(Response) -> BoxFuture<Result<Response, Error>> + Send + Sync + 'static>;

/// Conversion trait for async post-hook functions.
pub trait IntoAfterHook: Send + Sync + 'static {
    fn call(&self, response: Response) -> BoxFuture<Result<Response, Error>>;
}

impl<T, F> IntoAfterHook for T
where
    T: Fn(Response) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Response, Error>> + Send + 'static,
{
    fn call(&self, response: Response) -> BoxFuture<Result<Response, Error>> {
        Box::pin((self)(response))
    }
}
