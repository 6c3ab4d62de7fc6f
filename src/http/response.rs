//! Outbound response envelope.
//!
//! A [`Response`] stays mutable while the dispatcher and post-hooks
//! shape it; [`into_bytes`](Response::into_bytes) serializes it exactly
//! once, when the transport takes over.

use bytes::{BufMut, BytesMut};

use super::{Headers, StatusCode};

/// Content type assumed for non-empty bodies that never set one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// An HTTP response under construction.
///
/// # Examples
///
/// ```
/// use carafe::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok).body("<h1>hi</h1>");
/// let wire = response.into_bytes();
/// assert!(wire.starts_with(b"HTTP/1.1 200 OK\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// An empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// A `200 OK` response carrying `value` serialized as JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(value.to_string())
    }

    /// A `302 Found` redirect to `location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(StatusCode::Found).header("Location", location)
    }

    /// Appends a header, builder style. Repeated names accumulate.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in place. For post-hooks and the session store,
    /// which decorate a response they do not own.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Appends a `Set-Cookie` header for a session-style cookie scoped to
    /// the whole site and hidden from scripts.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.headers
            .insert("Set-Cookie", format!("{name}={value}; Path=/; HttpOnly"));
    }

    /// Sets the body from a string. `Content-Length` is derived at
    /// serialization time.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Chooses between `Connection: keep-alive` and `Connection: close`.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Replaces the status in place.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The body accumulated so far.
    pub fn body_ref(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the response in HTTP/1.1 wire format.
    ///
    /// Fills in what the builder left implicit: the default content type
    /// for non-empty bodies, `Content-Length`, and the `Connection`
    /// header.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", DEFAULT_CONTENT_TYPE);
        }
        self.headers.set(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );

        let mut wire = BytesMut::with_capacity(self.body.len() + 64 * (self.headers.len() + 2));
        wire.put_slice(format!("HTTP/1.1 {}\r\n", self.status).as_bytes());
        for (name, value) in self.headers.iter() {
            wire.put_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        wire.put_slice(format!("Content-Length: {}\r\n\r\n", self.body.len()).as_bytes());
        wire.put_slice(&self.body);
        wire
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_text(response: Response) -> String {
        String::from_utf8(response.into_bytes().to_vec()).unwrap()
    }

    #[test]
    fn status_line_headers_and_body() {
        let text = wire_text(Response::new(StatusCode::Ok).body("Hello"));
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn default_content_type_only_with_body() {
        let with_body = wire_text(Response::new(StatusCode::Ok).body("hi"));
        assert!(with_body.contains(&format!("Content-Type: {DEFAULT_CONTENT_TYPE}\r\n")));

        let empty = wire_text(Response::new(StatusCode::NoContent));
        assert!(!empty.contains("Content-Type"));
        assert!(empty.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn explicit_content_type_wins() {
        let text = wire_text(
            Response::new(StatusCode::Ok)
                .header("Content-Type", "text/plain")
                .body("hi"),
        );
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(!text.contains(DEFAULT_CONTENT_TYPE));
    }

    #[test]
    fn json_body_and_content_type() {
        let response = Response::json(&serde_json::json!({"ok": true}));
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert!(wire_text(response).contains(r#"{"ok":true}"#));
    }

    #[test]
    fn redirect_carries_location() {
        let response = Response::redirect("/login");
        assert_eq!(response.status(), StatusCode::Found);
        assert_eq!(response.headers().get("location"), Some("/login"));
    }

    #[test]
    fn cookies_accumulate() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_cookie("session", "abc");
        response.set_cookie("theme", "dark");
        let cookies: Vec<_> = response.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, ["session=abc; Path=/; HttpOnly", "theme=dark; Path=/; HttpOnly"]);
    }

    #[test]
    fn connection_close() {
        let text = wire_text(Response::new(StatusCode::Ok).keep_alive(false));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[test]
    fn set_status_in_place() {
        let mut response = Response::new(StatusCode::Ok);
        response.set_status(StatusCode::NotFound);
        assert_eq!(response.status(), StatusCode::NotFound);
    }
}
