//! Inbound request envelope.
//!
//! Requests are immutable once constructed, and come from two places:
//! the development transport parses them off the wire with
//! [`Request::parse`], and embedders (chiefly the test client) assemble
//! them with [`Request::builder`]. Both paths converge on the same
//! derivation of query, form, and cookie maps, so handler code never
//! cares which one produced the envelope.

use std::collections::HashMap;
use std::str;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

// Upper bound on header count accepted from the wire.
const HEADER_LIMIT: usize = 64;

/// Why a byte buffer could not be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// The header section is not complete yet; read more bytes and retry.
    #[error("request headers incomplete")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request line is missing its {field}")]
    MissingField { field: &'static str },
}

/// An inbound HTTP request.
///
/// Query parameters, urlencoded form fields, and cookies are derived
/// once at construction; [`query_param`](Request::query_param),
/// [`form_param`](Request::form_param), and [`cookie`](Request::cookie)
/// are then plain map lookups.
///
/// # Examples
///
/// ```
/// use carafe::http::Request;
///
/// let wire = b"GET /hello?name=world HTTP/1.1\r\nCookie: session=abc\r\n\r\n";
/// let (request, _) = Request::parse(wire).unwrap();
///
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.cookie("session"), Some("abc"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    // HTTP minor version; 1 means HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    query_params: HashMap<String, String>,
    form_params: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl Request {
    /// Parses one request from the front of `buf`.
    ///
    /// On success also returns the offset where the body starts, i.e.
    /// one past the blank line ending the header section. The body is
    /// whatever `buf` holds from there on; the caller decides whether
    /// that is all of it (see
    /// [`content_length`](Request::content_length)).
    ///
    /// # Errors
    ///
    /// [`RequestError::Incomplete`] when the header section is still
    /// arriving, [`RequestError::Parse`] when the bytes are not HTTP,
    /// and [`RequestError::MissingField`] when the request line lacks a
    /// method, path, or version.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut header_storage = [httparse::EMPTY_HEADER; HEADER_LIMIT];
        let mut parsed = httparse::Request::new(&mut header_storage);

        let httparse::Status::Complete(body_offset) = parsed.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        fn required<T>(value: Option<T>, field: &'static str) -> Result<T, RequestError> {
            value.ok_or(RequestError::MissingField { field })
        }

        let method = required(parsed.method, "method")?
            .parse::<Method>()
            .unwrap(); // Infallible
        let target = required(parsed.path, "path")?;
        let version = required(parsed.version, "version")?;

        let mut headers = Headers::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            // Header values are bytes on the wire; non-UTF-8 values are
            // dropped rather than failing the whole request.
            if let Ok(value) = str::from_utf8(header.value) {
                headers.insert(header.name, value);
            }
        }

        // Cap the body at the declared length; with pipelining, bytes
        // past it belong to the next request on the connection.
        let body_end = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .map_or(buf.len(), |len| buf.len().min(body_offset + len));

        let (path, query) = split_target(target);
        let body = Bytes::copy_from_slice(&buf[body_offset..body_end]);
        Ok((Self::assemble(method, path, query, version, headers, body), body_offset))
    }

    /// Starts assembling a request in-process.
    ///
    /// # Examples
    ///
    /// ```
    /// use carafe::http::{Method, Request};
    ///
    /// let request = Request::builder(Method::Get, "/users/alice").build();
    /// assert_eq!(request.path(), "/users/alice");
    /// ```
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, path)
    }

    // Single construction point: derives the lookup maps both `parse`
    // and the builder rely on.
    fn assemble(
        method: Method,
        path: String,
        query: Option<String>,
        version: u8,
        headers: Headers,
        body: Bytes,
    ) -> Self {
        let query_params = query.as_deref().map(parse_urlencoded).unwrap_or_default();

        let form_params = headers
            .get("content-type")
            .filter(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .and_then(|_| str::from_utf8(&body).ok())
            .map(parse_urlencoded)
            .unwrap_or_default();

        let cookies = headers.get("cookie").map(parse_cookies).unwrap_or_default();

        Self {
            method,
            path,
            version,
            headers,
            query,
            body,
            query_params,
            form_params,
            cookies,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path component of the request target, query string excluded.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP minor version; 1 means HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw query string, without the leading `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// One query parameter by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    /// One urlencoded form field by key. Empty unless the request
    /// carried an `application/x-www-form-urlencoded` body.
    pub fn form_param(&self, key: &str) -> Option<&str> {
        self.form_params.get(key).map(String::as_str)
    }

    /// One cookie by name, from the `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Deserializes the body as JSON into `T`.
    ///
    /// # Examples
    ///
    /// ```
    /// use carafe::http::{Method, Request};
    ///
    /// #[derive(serde::Deserialize)]
    /// struct NewUser {
    ///     name: String,
    /// }
    ///
    /// let request = Request::builder(Method::Post, "/users")
    ///     .body(r#"{"name": "alice"}"#.as_bytes().to_vec())
    ///     .build();
    /// let user: NewUser = request.json().unwrap();
    /// assert_eq!(user.name, "alice");
    /// ```
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Whether the connection stays open after this exchange.
    /// HTTP/1.1 says yes unless `Connection: close`; HTTP/1.0 says no
    /// unless `Connection: keep-alive`.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(value) => value.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// The declared `Content-Length`, when present and numeric.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

/// Assembles a [`Request`] without going through the wire format.
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl RequestBuilder {
    fn new(method: Method, path: impl Into<String>) -> Self {
        let (path, query) = split_target(&path.into());
        Self {
            method,
            path,
            query,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the raw body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets an urlencoded form body from the given fields, along with
    /// the matching `Content-Type`. Reserved characters in keys and
    /// values are escaped.
    #[must_use]
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.headers
            .set("Content-Type", "application/x-www-form-urlencoded");
        self.body = Bytes::from(encoded);
        self
    }

    /// Finishes the build.
    pub fn build(self) -> Request {
        Request::assemble(self.method, self.path, self.query, 1, self.headers, self.body)
    }
}

// `a=1&b=two+words` into a map. `+` decodes to space and `%XX` escapes
// to the byte they name.
fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    input
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return None;
            }
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

// Urlencoded value into text: `+` means space, `%XX` means the byte
// `0xXX`. A `%` not followed by two hex digits passes through as-is.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    out.push(hi * 16 + lo);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

// Escapes the characters urlencoding gives meaning to, so any value
// survives the encode/decode round trip.
fn form_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            ' ' => out.push('+'),
            '&' | '=' | '%' | '+' => {
                out.push_str(&format!("%{:02X}", ch as u32));
            }
            _ => out.push(ch),
        }
    }
    out
}

// `name=value; other=value` from a Cookie header into a map.
fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_owned(), value.trim().to_owned()))
        })
        .collect()
}
