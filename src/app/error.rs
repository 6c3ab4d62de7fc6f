//! The dispatcher's error taxonomy.
//!
//! Two channels leave a handler: structured HTTP-level failures
//! ([`HttpError`], always travelling the normal result path) and
//! unstructured programming errors ([`anyhow::Error`], raised until the
//! dispatcher's top-level policy catches them). [`DispatchError`] is what
//! escapes `handle_request` itself: debug-mode propagation and handler
//! contract violations only.

use thiserror::Error;

use crate::http::{Method, Response, StatusCode};
use crate::routing::MatchError;

/// A structured HTTP-level failure: not-found, method-not-allowed, or an
/// explicit abort from handler code.
///
/// Structured failures are recoverable: the dispatcher routes them
/// through the registered status handlers, or falls back to the error's
/// own default response.
#[derive(Debug, Clone, Error)]
#[error("{status}")]
pub struct HttpError {
    status: StatusCode,
    message: Option<String>,
    // Populated for 405 responses only; written as the Allow header.
    allowed: Vec<Method>,
}

impl HttpError {
    /// Creates a structured failure with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            allowed: Vec::new(),
        }
    }

    /// Attaches a user-facing message, overriding the canonical reason
    /// phrase in the default response body.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// A `404 Not Found` failure.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound)
    }

    /// A `405 Method Not Allowed` failure carrying the accepted methods.
    pub fn method_not_allowed(allowed: Vec<Method>) -> Self {
        Self {
            status: StatusCode::MethodNotAllowed,
            message: None,
            allowed,
        }
    }

    /// A generic `500 Internal Server Error` failure. Deliberately carries
    /// no detail: this is what clients see when an internal error is
    /// masked in production.
    pub fn internal() -> Self {
        Self::new(StatusCode::InternalServerError)
    }

    /// The HTTP status of this failure.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The attached message, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The default user-facing response for this failure, used when no
    /// handler is registered for its status code.
    pub fn into_response(self) -> Response {
        let body = format!(
            "<h1>{}</h1>\n<p>{}</p>\n",
            self.status,
            self.message.as_deref().unwrap_or("")
        );
        let mut response = Response::new(self.status).body(body);
        if !self.allowed.is_empty() {
            let allow = self
                .allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            response.add_header("Allow", allow);
        }
        response
    }
}

impl From<MatchError> for HttpError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NotFound => Self::not_found(),
            MatchError::MethodNotAllowed { allowed } => Self::method_not_allowed(allowed),
        }
    }
}

/// What a handler, hook, or status handler can fail with.
#[derive(Debug, Error)]
pub enum Error {
    /// A structured HTTP failure — travels the normal result path.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// An unstructured programming error — raised until the dispatcher's
    /// top-level policy catches it.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Aborts handler execution with a structured failure of the given status.
///
/// # Examples
///
/// ```
/// use carafe::{abort, Error};
/// use carafe::http::StatusCode;
///
/// let err = abort(StatusCode::Unauthorized);
/// assert!(matches!(err, Error::Http(_)));
/// ```
pub fn abort(status: StatusCode) -> Error {
    Error::Http(HttpError::new(status))
}

/// A handler returned a value the dispatcher cannot turn into a response.
/// A contract violation, never recoverable.
#[derive(Debug, Error)]
#[error("cannot coerce handler return value into a response: {reason}")]
pub struct CoercionError {
    pub reason: String,
}

/// Failures that escape `handle_request` to its caller.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Debug mode only: the unstructured handler error, propagated with
    /// full detail instead of being masked.
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error(transparent)]
    Coercion(#[from] CoercionError),
}
