//! Protocol vocabulary shared by the whole crate: [`Method`],
//! [`StatusCode`], [`Headers`], and the [`Request`] / [`Response`]
//! envelopes.

use std::fmt;

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{Request, RequestBuilder};
pub use response::Response;

// Defines the status enum together with its numeric code and reason
// phrase, keeping the three in one table.
macro_rules! status_codes {
    ($($(#[$meta:meta])* $variant:ident = $code:literal => $phrase:literal,)+) => {
        /// An HTTP response status.
        ///
        /// # Examples
        ///
        /// ```
        /// use carafe::http::StatusCode;
        ///
        /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
        /// assert_eq!(StatusCode::NotFound.reason(), "Not Found");
        /// assert_eq!(StatusCode::NotFound.to_string(), "404 Not Found");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $($(#[$meta])* $variant = $code,)+
        }

        impl StatusCode {
            /// The numeric code.
            pub fn as_u16(self) -> u16 {
                self as u16
            }

            /// The reason phrase written on the status line.
            pub fn reason(self) -> &'static str {
                match self {
                    $(Self::$variant => $phrase,)+
                }
            }
        }
    };
}

status_codes! {
    Continue = 100 => "Continue",
    SwitchingProtocols = 101 => "Switching Protocols",

    Ok = 200 => "OK",
    Created = 201 => "Created",
    Accepted = 202 => "Accepted",
    NoContent = 204 => "No Content",
    PartialContent = 206 => "Partial Content",

    MovedPermanently = 301 => "Moved Permanently",
    Found = 302 => "Found",
    SeeOther = 303 => "See Other",
    NotModified = 304 => "Not Modified",
    TemporaryRedirect = 307 => "Temporary Redirect",
    PermanentRedirect = 308 => "Permanent Redirect",

    BadRequest = 400 => "Bad Request",
    Unauthorized = 401 => "Unauthorized",
    Forbidden = 403 => "Forbidden",
    NotFound = 404 => "Not Found",
    MethodNotAllowed = 405 => "Method Not Allowed",
    Conflict = 409 => "Conflict",
    Gone = 410 => "Gone",
    LengthRequired = 411 => "Length Required",
    PayloadTooLarge = 413 => "Payload Too Large",
    UriTooLong = 414 => "URI Too Long",
    UnsupportedMediaType = 415 => "Unsupported Media Type",
    UnprocessableEntity = 422 => "Unprocessable Entity",
    TooManyRequests = 429 => "Too Many Requests",

    InternalServerError = 500 => "Internal Server Error",
    NotImplemented = 501 => "Not Implemented",
    BadGateway = 502 => "Bad Gateway",
    ServiceUnavailable = 503 => "Service Unavailable",
    GatewayTimeout = 504 => "Gateway Timeout",
    HttpVersionNotSupported = 505 => "HTTP Version Not Supported",
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason())
    }
}

impl From<StatusCode> for u16 {
    fn from(status: StatusCode) -> u16 {
        status.as_u16()
    }
}

/// An HTTP request method.
///
/// The methods the router cares about are unit variants; anything else
/// lands in [`Method::Other`] so exotic requests still parse and can be
/// answered with a 405.
///
/// # Examples
///
/// ```
/// use carafe::http::Method;
///
/// let method: Method = "PATCH".parse().unwrap();
/// assert_eq!(method, Method::Patch);
/// assert_eq!("BREW".parse::<Method>().unwrap().as_str(), "BREW");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    /// A non-standard extension method, stored verbatim.
    Other(String),
}

impl Method {
    const STANDARD: [Method; 7] = [
        Method::Get,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Head,
        Method::Options,
        Method::Patch,
    ];

    /// The method token as it appears on the request line.
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    // Method tokens are case-sensitive; `get` is an extension method,
    // not GET.
    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Ok(Self::STANDARD
            .iter()
            .find(|m| m.as_str() == token)
            .cloned()
            .unwrap_or_else(|| Method::Other(token.to_owned())))
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
