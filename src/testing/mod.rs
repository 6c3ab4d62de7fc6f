//! Test client for exercising an application without a transport.
//!
//! [`TestClient`] dispatches requests straight through
//! [`App::handle_request`] and carries the session cookie from one
//! request to the next, so multi-request flows (log in, then read the
//! session) can be tested in-process.

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::{App, DispatchError};
use crate::http::{Method, Request, RequestBuilder, Response};

/// An in-process client bound to one application.
///
/// # Examples
///
/// ```
/// use carafe::{App, Payload};
/// use carafe::testing::TestClient;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut builder = App::builder();
/// builder.route("/", "index", &[], |_p| async {
///     Ok(Payload::text("hello"))
/// }).unwrap();
/// let app = builder.build();
///
/// let mut client = TestClient::new(app);
/// let response = client.get("/").await.unwrap();
/// assert_eq!(response.status().as_u16(), 200);
/// # }
/// ```
pub struct TestClient {
    app: Arc<App>,
    // One jar per client: cookie name -> value.
    cookies: HashMap<String, String>,
}

impl TestClient {
    /// Creates a client for `app` with an empty cookie jar.
    pub fn new(app: Arc<App>) -> Self {
        Self {
            app,
            cookies: HashMap::new(),
        }
    }

    /// Dispatches a `GET` request to `path`.
    pub async fn get(&mut self, path: &str) -> Result<Response, DispatchError> {
        self.dispatch(Request::builder(Method::Get, path)).await
    }

    /// Dispatches a `POST` request with an urlencoded form body.
    pub async fn post_form(
        &mut self,
        path: &str,
        fields: &[(&str, &str)],
    ) -> Result<Response, DispatchError> {
        self.dispatch(Request::builder(Method::Post, path).form(fields))
            .await
    }

    /// Dispatches an arbitrary request built with [`Request::builder`],
    /// attaching the jar's cookies and absorbing any `Set-Cookie`
    /// headers from the response.
    pub async fn dispatch(
        &mut self,
        builder: RequestBuilder,
    ) -> Result<Response, DispatchError> {
        let builder = if self.cookies.is_empty() {
            builder
        } else {
            let header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder.header("Cookie", header)
        };

        let response = Arc::clone(&self.app).handle_request(builder.build()).await?;

        for set_cookie in response.headers().get_all("set-cookie") {
            if let Some((name, value)) = set_cookie
                .split(';')
                .next()
                .and_then(|pair| pair.split_once('='))
            {
                self.cookies.insert(name.to_owned(), value.to_owned());
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Payload;
    use crate::context::{self, current_app, flash, get_flashed_messages, session};
    use crate::http::StatusCode;

    fn body_of(response: &Response) -> String {
        String::from_utf8(response.body_ref().to_vec()).unwrap()
    }

    fn flash_app() -> Arc<App> {
        let mut builder = App::builder();
        builder.set_secret_key("development key");
        builder
            .route("/leave-note", "leave_note", &[], |_p| async {
                flash("note left").unwrap();
                Ok(Payload::text("left"))
            })
            .unwrap();
        builder
            .route("/read-notes", "read_notes", &[], |_p| async {
                let notes = get_flashed_messages().unwrap();
                Ok(Payload::text(notes.join(",")))
            })
            .unwrap();
        builder.build()
    }

    #[tokio::test]
    async fn session_cookie_carries_across_requests() {
        let mut builder = App::builder();
        builder.set_secret_key("development key");
        builder
            .route("/login", "login", &[Method::Post], |_p| async {
                let username = context::request()
                    .unwrap()
                    .form_param("username")
                    .unwrap_or("anonymous")
                    .to_owned();
                session().unwrap().unwrap().insert("user", username.as_str());
                Ok(Payload::text("ok"))
            })
            .unwrap();
        builder
            .route("/me", "me", &[], |_p| async {
                let user = session()
                    .unwrap()
                    .unwrap()
                    .get("user")
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default();
                Ok(Payload::text(user))
            })
            .unwrap();
        let app = builder.build();

        let mut client = TestClient::new(app);
        client
            .post_form("/login", &[("username", "alice")])
            .await
            .unwrap();
        let response = client.get("/me").await.unwrap();
        assert_eq!(body_of(&response), "alice");
    }

    #[tokio::test]
    async fn flashes_are_one_shot_across_requests() {
        let mut client = TestClient::new(flash_app());

        client.get("/leave-note").await.unwrap();

        let first = client.get("/read-notes").await.unwrap();
        assert_eq!(body_of(&first), "note left");

        // Consumed by the previous request.
        let second = client.get("/read-notes").await.unwrap();
        assert_eq!(body_of(&second), "");
    }

    #[tokio::test]
    async fn nested_dispatch_stacks_contexts() {
        let mut builder = App::builder();
        builder
            .route("/inner", "inner", &[], |_p| async {
                assert_eq!(context::request().unwrap().path(), "/inner");
                assert_eq!(context::depth(), 2);
                Ok(Payload::text("inner result"))
            })
            .unwrap();
        builder
            .route("/outer", "outer", &[], |_p| async {
                let app = current_app().unwrap();
                let inner = app
                    .handle_request(Request::builder(Method::Get, "/inner").build())
                    .await
                    .map_err(|e| anyhow::anyhow!("nested dispatch failed: {e}"))?;

                // The outer context is visible again after the inner pop.
                assert_eq!(context::request().unwrap().path(), "/outer");
                assert_eq!(context::depth(), 1);
                Ok(Payload::text(format!(
                    "outer saw: {}",
                    String::from_utf8(inner.body_ref().to_vec()).unwrap()
                )))
            })
            .unwrap();
        let app = builder.build();

        let mut client = TestClient::new(app);
        let response = client.get("/outer").await.unwrap();
        assert_eq!(body_of(&response), "outer saw: inner result");
    }

    #[tokio::test]
    async fn status_codes_surface_to_the_client() {
        let app = App::builder().build();
        let mut client = TestClient::new(app);
        let response = client.get("/nowhere").await.unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
    }
}
