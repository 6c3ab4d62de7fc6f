//! The dispatch algorithm: context push, hooks, routing, handler
//! invocation, the two-tier error policy, response normalization, and
//! the guaranteed context pop.

use std::sync::Arc;

use tracing::{debug, error};

use crate::context::{self, RequestContext};
use crate::http::{Request, Response, StatusCode};

use super::error::{CoercionError, DispatchError, Error, HttpError};
use super::handler::Payload;
use super::App;

impl App {
    /// Dispatches one request through the full lifecycle and returns the
    /// finished response.
    ///
    /// The request context is pushed before any hook runs and popped on
    /// every exit path, success or failure. An `Err` return only happens
    /// for debug-mode propagation of unstructured handler errors and for
    /// handler contract violations (uncoercible return values); every
    /// other failure becomes a well-formed response.
    pub async fn handle_request(
        self: Arc<Self>,
        request: Request,
    ) -> Result<Response, DispatchError> {
        let ctx = Arc::new(RequestContext::new(Arc::clone(&self), request));
        context::with_context(Arc::clone(&ctx), self.run_dispatch(ctx)).await
    }

    async fn run_dispatch(
        self: Arc<Self>,
        ctx: Arc<RequestContext>,
    ) -> Result<Response, DispatchError> {
        let outcome = self.preprocess_and_dispatch(&ctx).await;

        let payload = match outcome {
            Ok(payload) => payload,
            Err(Error::Http(e)) => self.handle_http_error(e).await?,
            Err(Error::Internal(e)) => self.handle_internal_error(e).await?,
        };

        let response = self.make_response(payload)?;
        self.finalize_response(&ctx, response).await
    }

    // Steps 3 and 4: pre-hooks, then route match and handler invocation.
    async fn preprocess_and_dispatch(&self, ctx: &RequestContext) -> Result<Payload, Error> {
        for hook in &self.before_hooks {
            if let Some(payload) = hook().await? {
                return Ok(payload);
            }
        }

        let request = ctx.request();
        let (endpoint, params) = self
            .routes
            .recognize(request.path(), request.method())
            .map_err(HttpError::from)?;
        ctx.set_route(endpoint.clone(), params.clone());

        debug!(endpoint = %endpoint, path = %request.path(), "dispatching to handler");

        // Registration writes both tables together, so a matched endpoint
        // always has a handler.
        let handler = self.views.get(&endpoint).ok_or_else(|| {
            Error::Internal(anyhow::anyhow!("endpoint `{endpoint}` has no view handler"))
        })?;
        handler(params).await
    }

    // Tier one: structured failures go to the registered status handler,
    // or to their own default response. A status handler's structured
    // failure is answered directly — there is no re-dispatch.
    async fn handle_http_error(&self, err: HttpError) -> Result<Payload, DispatchError> {
        let Some(handler) = self.error_handlers.get(&err.status()) else {
            return Ok(Payload::Response(err.into_response()));
        };
        match handler(err).await {
            Ok(payload) => Ok(payload),
            Err(Error::Http(e)) => Ok(Payload::Response(e.into_response())),
            Err(Error::Internal(e)) => self.handle_internal_error(e).await,
        }
    }

    // Tier two: unstructured failures. Debug mode propagates with full
    // detail; production reports to the operator channel and masks the
    // client-facing result.
    async fn handle_internal_error(&self, err: anyhow::Error) -> Result<Payload, DispatchError> {
        if self.debug {
            return Err(DispatchError::Handler(err));
        }

        error!(error = ?err, "unhandled error during dispatch");

        if let Some(handler) = self.error_handlers.get(&StatusCode::InternalServerError) {
            match handler(HttpError::internal()).await {
                Ok(payload) => return Ok(payload),
                Err(handler_err) => {
                    error!(error = %handler_err, "500 handler failed, returning generic response");
                }
            }
        }
        Ok(Payload::Response(HttpError::internal().into_response()))
    }

    // Step 6a: normalize the handler result into a response envelope.
    fn make_response(&self, payload: Payload) -> Result<Response, DispatchError> {
        Ok(match payload {
            Payload::Response(response) => response,
            Payload::Text(body) => Response::new(StatusCode::Ok).body(body),
            Payload::TextWithStatus(body, status) => Response::new(status).body(body),
            Payload::TextWithHeaders(body, status, headers) => {
                let mut response = Response::new(status).body(body);
                for (name, value) in headers {
                    response.add_header(name, value);
                }
                response
            }
            Payload::Json(value) => Response::json(&value),
            Payload::Custom(value) => match &self.coercion {
                Some(hook) => hook(value)?,
                None => {
                    return Err(CoercionError {
                        reason: "custom payload returned but no coercion hook installed"
                            .to_owned(),
                    }
                    .into());
                }
            },
        })
    }

    // Step 6b: write the session back, then run post-hooks in order.
    async fn finalize_response(
        &self,
        ctx: &RequestContext,
        mut response: Response,
    ) -> Result<Response, DispatchError> {
        if let (Some(store), Some(session)) = (&self.session_store, ctx.session()) {
            store.save(&session, &mut response);
        }

        for hook in &self.after_hooks {
            response = match hook(response).await {
                Ok(response) => response,
                Err(Error::Http(e)) => e.into_response(),
                Err(Error::Internal(e)) => {
                    let payload = self.handle_internal_error(e).await?;
                    self.make_response(payload)?
                }
            };
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{abort, HandlerResult};
    use crate::context::{context_globals, session, url_for};
    use crate::http::Method;
    use crate::routing::Params;

    fn ok(body: &str) -> HandlerResult {
        Ok(Payload::text(body))
    }

    fn body_of(response: &Response) -> String {
        String::from_utf8(response.body_ref().to_vec()).unwrap()
    }

    fn get(path: &str) -> Request {
        Request::builder(Method::Get, path).build()
    }

    // ── normalization of return shapes ────────────────────────────────────

    #[tokio::test]
    async fn text_payload_becomes_200() {
        let mut builder = App::builder();
        builder
            .route("/", "index", &[], |_p| async { ok("Hello") })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(body_of(&response), "Hello");
    }

    #[tokio::test]
    async fn payload_with_status_and_headers() {
        let mut builder = App::builder();
        builder
            .route("/made", "made", &[], |_p| async {
                Ok(Payload::TextWithHeaders(
                    "created".to_owned(),
                    StatusCode::Created,
                    vec![("X-Resource".to_owned(), "made".to_owned())],
                ))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/made")).await.unwrap();
        assert_eq!(response.status(), StatusCode::Created);
        assert_eq!(response.headers().get("x-resource"), Some("made"));
    }

    #[tokio::test]
    async fn json_payload_sets_content_type() {
        let mut builder = App::builder();
        builder
            .route("/api", "api", &[], |_p| async {
                Ok(Payload::Json(serde_json::json!({"ok": true})))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/api")).await.unwrap();
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(body_of(&response), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn response_payload_passes_through() {
        let mut builder = App::builder();
        builder
            .route("/go", "go", &[], |_p| async {
                Ok(Payload::Response(Response::redirect("/there")))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/go")).await.unwrap();
        assert_eq!(response.status(), StatusCode::Found);
        assert_eq!(response.headers().get("location"), Some("/there"));
    }

    #[tokio::test]
    async fn custom_payload_uses_coercion_hook() {
        struct Widget(&'static str);

        let mut builder = App::builder();
        builder.set_coercion_hook(|value| {
            let widget = value.downcast::<Widget>().map_err(|_| CoercionError {
                reason: "unknown custom payload type".to_owned(),
            })?;
            Ok(Response::new(StatusCode::Ok).body(format!("widget: {}", widget.0)))
        });
        builder
            .route("/w", "w", &[], |_p| async {
                Ok(Payload::custom(Widget("gear")))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/w")).await.unwrap();
        assert_eq!(body_of(&response), "widget: gear");
    }

    #[tokio::test]
    async fn custom_payload_without_hook_is_contract_violation() {
        let mut builder = App::builder();
        builder
            .route("/w", "w", &[], |_p| async { Ok(Payload::custom(42_u64)) })
            .unwrap();
        let app = builder.build();

        let err = app.handle_request(get("/w")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Coercion(_)));
        assert_eq!(context::depth(), 0);
    }

    // ── routing behavior through the dispatcher ───────────────────────────

    #[tokio::test]
    async fn route_params_are_passed_to_handler() {
        let mut builder = App::builder();
        builder
            .route("/users/<name>", "show_user", &[], |params: Params| async move {
                ok(params.get("name").unwrap_or("unknown"))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/users/alice")).await.unwrap();
        assert_eq!(body_of(&response), "alice");
    }

    #[tokio::test]
    async fn unmatched_path_yields_404() {
        let app = App::builder().build();
        let response = app.handle_request(get("/unknown")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn wrong_method_yields_405_with_allow_header() {
        let mut builder = App::builder();
        builder
            .route("/submit", "submit", &[Method::Post], |_p| async { ok("posted") })
            .unwrap();
        let app = builder.build();

        let response = app
            .handle_request(get("/submit"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::MethodNotAllowed);
        assert_eq!(response.headers().get("allow"), Some("POST"));
    }

    #[tokio::test]
    async fn matched_route_is_recorded_on_context() {
        let mut builder = App::builder();
        builder
            .route("/users/<name>", "show_user", &[], |_p| async {
                let ctx = context::current().unwrap();
                assert_eq!(ctx.endpoint().as_deref(), Some("show_user"));
                assert_eq!(ctx.route_params().unwrap().get("name"), Some("alice"));
                ok("done")
            })
            .unwrap();
        let app = builder.build();
        app.handle_request(get("/users/alice")).await.unwrap();
    }

    #[tokio::test]
    async fn url_for_works_inside_handlers() {
        let mut builder = App::builder();
        builder
            .route("/users/<name>", "show_user", &[], |_p| async { ok("") })
            .unwrap();
        builder
            .route("/whois", "whois", &[], |_p| async {
                ok(&url_for("show_user", &[("name", "alice")]).unwrap())
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/whois")).await.unwrap();
        assert_eq!(body_of(&response), "/users/alice");
    }

    // ── hooks ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn before_hook_short_circuits_dispatch() {
        let mut builder = App::builder();
        builder.before_request(|| async { Ok(Some(Payload::text("intercepted"))) });
        builder
            .route("/", "index", &[], |_p| async { ok("never runs") })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/")).await.unwrap();
        assert_eq!(body_of(&response), "intercepted");
    }

    #[tokio::test]
    async fn before_hooks_run_in_order_until_first_result() {
        let mut builder = App::builder();
        builder.before_request(|| async {
            context_globals().unwrap().insert("first", true);
            Ok(None)
        });
        builder.before_request(|| async { Ok(Some(Payload::text("second wins"))) });
        builder.before_request(|| async {
            panic!("third hook must not run");
            #[allow(unreachable_code)]
            Ok(None)
        });
        let app = builder.build();

        let response = app.handle_request(get("/")).await.unwrap();
        assert_eq!(body_of(&response), "second wins");
    }

    #[tokio::test]
    async fn after_hooks_chain_in_order() {
        let mut builder = App::builder();
        builder
            .route("/", "index", &[], |_p| async { ok("body") })
            .unwrap();
        builder.after_request(|mut response: Response| async move {
            response.add_header("X-First", "1");
            Ok(response)
        });
        builder.after_request(|mut response: Response| async move {
            assert_eq!(response.headers().get("x-first"), Some("1"));
            response.add_header("X-Second", "2");
            Ok(response)
        });
        let app = builder.build();

        let response = app.handle_request(get("/")).await.unwrap();
        assert_eq!(response.headers().get("x-first"), Some("1"));
        assert_eq!(response.headers().get("x-second"), Some("2"));
    }

    #[tokio::test]
    async fn after_hooks_run_for_error_responses_too() {
        let mut builder = App::builder();
        builder.after_request(|mut response: Response| async move {
            response.add_header("X-Always", "yes");
            Ok(response)
        });
        let app = builder.build();

        let response = app.handle_request(get("/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(response.headers().get("x-always"), Some("yes"));
    }

    // ── error policy ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn abort_is_a_structured_failure() {
        let mut builder = App::builder();
        builder
            .route("/locked", "locked", &[], |_p| async {
                Err(abort(StatusCode::Unauthorized))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/locked")).await.unwrap();
        assert_eq!(response.status(), StatusCode::Unauthorized);
    }

    #[tokio::test]
    async fn registered_404_handler_takes_over() {
        let mut builder = App::builder();
        builder.error_handler(StatusCode::NotFound, |_err| async {
            Ok(Payload::TextWithStatus(
                "nothing here, sorry".to_owned(),
                StatusCode::NotFound,
            ))
        });
        let app = builder.build();

        let response = app.handle_request(get("/ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NotFound);
        assert_eq!(body_of(&response), "nothing here, sorry");
    }

    #[tokio::test]
    async fn production_masks_unstructured_errors() {
        let mut builder = App::builder();
        builder
            .route("/explode", "explode", &[], |_p| async {
                Err(Error::Internal(anyhow::anyhow!(
                    "secret database password in message"
                )))
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/explode")).await.unwrap();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert!(!body_of(&response).contains("secret database password"));
    }

    #[tokio::test]
    async fn debug_propagates_unstructured_errors() {
        let mut builder = App::builder();
        builder.set_debug(true);
        builder
            .route("/explode", "explode", &[], |_p| async {
                Err(Error::Internal(anyhow::anyhow!("boom")))
            })
            .unwrap();
        let app = builder.build();

        let err = app.handle_request(get("/explode")).await.unwrap_err();
        match err {
            DispatchError::Handler(inner) => assert_eq!(inner.to_string(), "boom"),
            other => panic!("expected Handler propagation, got {other:?}"),
        }
        assert_eq!(context::depth(), 0);
    }

    #[tokio::test]
    async fn registered_500_handler_runs_in_production() {
        let mut builder = App::builder();
        builder
            .route("/explode", "explode", &[], |_p| async {
                Err(Error::Internal(anyhow::anyhow!("boom")))
            })
            .unwrap();
        builder.error_handler(StatusCode::InternalServerError, |_err| async {
            Ok(Payload::TextWithStatus(
                "we are on it".to_owned(),
                StatusCode::InternalServerError,
            ))
        });
        let app = builder.build();

        let response = app.handle_request(get("/explode")).await.unwrap();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert_eq!(body_of(&response), "we are on it");
    }

    #[tokio::test]
    async fn debug_mode_skips_500_handler() {
        let mut builder = App::builder();
        builder.set_debug(true);
        builder
            .route("/explode", "explode", &[], |_p| async {
                Err(Error::Internal(anyhow::anyhow!("boom")))
            })
            .unwrap();
        builder.error_handler(StatusCode::InternalServerError, |_err| async {
            Ok(Payload::text("must not run in debug"))
        });
        let app = builder.build();

        assert!(app.handle_request(get("/explode")).await.is_err());
    }

    #[tokio::test]
    async fn failing_status_handler_falls_back_to_default_response() {
        let mut builder = App::builder();
        builder.error_handler(StatusCode::NotFound, |_err| async {
            Err(abort(StatusCode::Gone))
        });
        let app = builder.build();

        // The 404 handler aborts with 410; its structured failure is
        // answered directly, without re-dispatching.
        let response = app.handle_request(get("/ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::Gone);
    }

    // ── context lifecycle ─────────────────────────────────────────────────

    #[tokio::test]
    async fn stack_depth_balanced_after_success_and_failure() {
        let mut builder = App::builder();
        builder.set_debug(true);
        builder
            .route("/ok", "ok", &[], |_p| async { ok("fine") })
            .unwrap();
        builder
            .route("/bad", "bad", &[], |_p| async {
                Err(Error::Internal(anyhow::anyhow!("nope")))
            })
            .unwrap();
        let app = builder.build();

        assert_eq!(context::depth(), 0);
        app.clone().handle_request(get("/ok")).await.unwrap();
        assert_eq!(context::depth(), 0);
        app.handle_request(get("/bad")).await.unwrap_err();
        assert_eq!(context::depth(), 0);
    }

    #[tokio::test]
    async fn session_round_trips_through_set_cookie() {
        let mut builder = App::builder();
        builder.set_secret_key("development key");
        builder
            .route("/login", "login", &[], |_p| async {
                session().unwrap().unwrap().insert("user", "alice");
                ok("logged in")
            })
            .unwrap();
        builder
            .route("/whoami", "whoami", &[], |_p| async {
                let user = session()
                    .unwrap()
                    .unwrap()
                    .get("user")
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_else(|| "anonymous".to_owned());
                ok(&user)
            })
            .unwrap();
        let app = builder.build();

        let login = app.clone().handle_request(get("/login")).await.unwrap();
        let cookie = login
            .headers()
            .get("set-cookie")
            .expect("session cookie must be set")
            .split(';')
            .next()
            .unwrap()
            .to_owned();

        let request = Request::builder(Method::Get, "/whoami")
            .header("Cookie", cookie)
            .build();
        let response = app.handle_request(request).await.unwrap();
        assert_eq!(body_of(&response), "alice");
    }

    #[tokio::test]
    async fn no_secret_key_means_null_session_and_no_cookie() {
        let mut builder = App::builder();
        builder
            .route("/", "index", &[], |_p| async {
                assert!(session().unwrap().is_none());
                ok("ok")
            })
            .unwrap();
        let app = builder.build();

        let response = app.handle_request(get("/")).await.unwrap();
        assert!(!response.headers().contains("set-cookie"));
    }

    #[tokio::test]
    async fn concurrent_requests_never_share_context() {
        let mut builder = App::builder();
        builder.set_secret_key("development key");
        builder
            .route("/echo/<id>", "echo", &[], |params: Params| async move {
                let id = params.get("id").unwrap().to_owned();
                session().unwrap().unwrap().insert("id", id.as_str());
                context_globals().unwrap().insert("id", id.as_str());
                for _ in 0..4 {
                    tokio::task::yield_now().await;
                    // Accessors must keep resolving to *this* request.
                    assert_eq!(
                        context::request().unwrap().path(),
                        format!("/echo/{id}")
                    );
                    assert_eq!(
                        session().unwrap().unwrap().get("id"),
                        Some(id.as_str().into())
                    );
                    assert_eq!(
                        context_globals().unwrap().get("id"),
                        Some(id.as_str().into())
                    );
                }
                ok(&id)
            })
            .unwrap();
        let app = builder.build();

        let mut handles = Vec::new();
        for i in 0..32 {
            let app = app.clone();
            handles.push(tokio::spawn(async move {
                let response = app
                    .handle_request(get(&format!("/echo/{i}")))
                    .await
                    .unwrap();
                assert_eq!(body_of(&response), i.to_string());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
