//! The application object: registration surface at setup time, dispatch
//! engine at request time.
//!
//! An application is assembled with [`AppBuilder`] — routes, status
//! handlers, hooks, session configuration — and then frozen into an
//! `Arc<App>` by [`AppBuilder::build`]. From that point on the app is
//! immutable and shared without synchronization across every request
//! task; all per-request state lives in the
//! [`RequestContext`](crate::context::RequestContext) instead.
//!
//! # Examples
//!
//! ```
//! use carafe::{App, Payload};
//! use carafe::http::Method;
//!
//! # fn main() -> Result<(), carafe::routing::ConfigurationError> {
//! let mut builder = App::builder();
//! builder.route("/users/<name>", "show_user", &[Method::Get], |params: carafe::routing::Params| async move {
//!     let name = params.get("name").unwrap_or("stranger").to_owned();
//!     Ok(Payload::text(format!("Hello {name}")))
//! })?;
//! let app = builder.build();
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

mod dispatch;
mod error;
mod handler;

pub use error::{abort, CoercionError, DispatchError, Error, HttpError};
pub use handler::{
    AfterHook, BeforeHook, BoxFuture, ErrorHandler, HandlerResult, IntoAfterHook, IntoBeforeHook,
    IntoErrorHandler, IntoViewHandler, Payload, ViewHandler,
};

use crate::http::{Method, Request, Response, StatusCode};
use crate::routing::{ConfigurationError, RouteTable, Rule};
use crate::session::{Session, SessionStore, SignedCookieStore};
use crate::templating::TemplateEngine;

/// Hook converting an application-defined [`Payload::Custom`] value into
/// a response.
pub type CoercionHook =
    Arc<dyn Fn(Box<dyn Any + Send>) -> Result<Response, CoercionError> + Send + Sync + 'static>;

/// Default name of the session cookie.
const DEFAULT_SESSION_COOKIE: &str = "session";

/// Mutable application under construction. See the
/// [module docs](self) for the overall shape.
pub struct AppBuilder {
    debug: bool,
    secret_key: Option<String>,
    session_cookie_name: String,
    session_store: Option<Arc<dyn SessionStore>>,
    template_engine: Option<Arc<dyn TemplateEngine>>,
    coercion: Option<CoercionHook>,
    routes: RouteTable,
    views: HashMap<String, ViewHandler>,
    error_handlers: HashMap<StatusCode, ErrorHandler>,
    before_hooks: Vec<BeforeHook>,
    after_hooks: Vec<AfterHook>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self {
            debug: false,
            secret_key: None,
            session_cookie_name: DEFAULT_SESSION_COOKIE.to_owned(),
            session_store: None,
            template_engine: None,
            coercion: None,
            routes: RouteTable::new(),
            views: HashMap::new(),
            error_handlers: HashMap::new(),
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
        }
    }
}

impl AppBuilder {
    /// Creates a builder with default configuration: production mode, no
    /// session store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables debug mode. In debug mode unstructured handler
    /// errors propagate to the caller with full detail instead of being
    /// masked by a generic 500.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Configures the signing key for the built-in signed-cookie session
    /// store. Without a key (and without a custom store) every request's
    /// session is `None`.
    pub fn set_secret_key(&mut self, key: impl Into<String>) {
        self.secret_key = Some(key.into());
    }

    /// Overrides the session cookie name (default `"session"`).
    pub fn set_session_cookie_name(&mut self, name: impl Into<String>) {
        self.session_cookie_name = name.into();
    }

    /// Installs a custom session store, taking precedence over the
    /// signed-cookie store.
    pub fn set_session_store(&mut self, store: Arc<dyn SessionStore>) {
        self.session_store = Some(store);
    }

    /// Installs the template engine reachable through
    /// [`render_template`](crate::templating::render_template).
    pub fn set_template_engine(&mut self, engine: Arc<dyn TemplateEngine>) {
        self.template_engine = Some(engine);
    }

    /// Installs the coercion hook for [`Payload::Custom`] values.
    pub fn set_coercion_hook<F>(&mut self, hook: F)
    where
        F: Fn(Box<dyn Any + Send>) -> Result<Response, CoercionError> + Send + Sync + 'static,
    {
        self.coercion = Some(Arc::new(hook));
    }

    /// Registers a route: `pattern` bound to `endpoint`, dispatching to
    /// `handler`. An empty `methods` slice defaults to GET-only.
    ///
    /// Registering the same endpoint again with disjoint methods adds an
    /// alternate rule and replaces the endpoint's handler.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError`] if `endpoint` is already bound for an
    /// overlapping method set.
    pub fn route(
        &mut self,
        pattern: &str,
        endpoint: &str,
        methods: &[Method],
        handler: impl IntoViewHandler,
    ) -> Result<(), ConfigurationError> {
        self.routes
            .register(Rule::new(pattern, endpoint).methods(methods))?;
        let handler: ViewHandler = Arc::new(move |params| handler.call(params));
        self.views.insert(endpoint.to_owned(), handler);
        Ok(())
    }

    /// Registers a build-only rule: usable by
    /// [`url_for`](crate::context::url_for) but never matched, for URLs
    /// served outside the dispatcher (e.g. static files).
    pub fn build_only_route(
        &mut self,
        pattern: &str,
        endpoint: &str,
    ) -> Result<(), ConfigurationError> {
        self.routes
            .register(Rule::new(pattern, endpoint).build_only())
    }

    /// Registers a handler for structured failures with the given status
    /// code. Replaces any previous handler for that status.
    pub fn error_handler(&mut self, status: StatusCode, handler: impl IntoErrorHandler) {
        let handler: ErrorHandler = Arc::new(move |error| handler.call(error));
        self.error_handlers.insert(status, handler);
    }

    /// Registers a pre-hook, run before routing in registration order. A
    /// non-`None` return short-circuits dispatch.
    pub fn before_request(&mut self, hook: impl IntoBeforeHook) {
        self.before_hooks.push(Arc::new(move || hook.call()));
    }

    /// Registers a post-hook, run after response normalization in
    /// registration order. Each receives and returns the response,
    /// allowing chained mutation.
    pub fn after_request(&mut self, hook: impl IntoAfterHook) {
        self.after_hooks
            .push(Arc::new(move |response| hook.call(response)));
    }

    /// Freezes the builder into a shareable application.
    pub fn build(self) -> Arc<App> {
        let session_store = self.session_store.or_else(|| {
            self.secret_key.map(|key| {
                Arc::new(SignedCookieStore::new(key, self.session_cookie_name))
                    as Arc<dyn SessionStore>
            })
        });

        Arc::new(App {
            debug: self.debug,
            session_store,
            template_engine: self.template_engine,
            coercion: self.coercion,
            routes: self.routes,
            views: self.views,
            error_handlers: self.error_handlers,
            before_hooks: self.before_hooks,
            after_hooks: self.after_hooks,
        })
    }
}

/// A frozen application: read-only after setup, shared across request
/// tasks without synchronization.
pub struct App {
    debug: bool,
    session_store: Option<Arc<dyn SessionStore>>,
    template_engine: Option<Arc<dyn TemplateEngine>>,
    coercion: Option<CoercionHook>,
    routes: RouteTable,
    views: HashMap<String, ViewHandler>,
    error_handlers: HashMap<StatusCode, ErrorHandler>,
    before_hooks: Vec<BeforeHook>,
    after_hooks: Vec<AfterHook>,
}

impl App {
    /// Starts building an application.
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    /// Whether debug mode is enabled.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The route table, for URL building.
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub(crate) fn open_session(&self, request: &Request) -> Option<Session> {
        self.session_store.as_ref().and_then(|s| s.open(request))
    }

    pub(crate) fn template_engine(&self) -> Option<&Arc<dyn TemplateEngine>> {
        self.template_engine.as_ref()
    }
}
