//! Per-request context, the context stack, and the transparent accessors.
//!
//! Every dispatched request gets a [`RequestContext`] pushed onto a
//! task-local stack for exactly the duration of its dispatch. The
//! transparent accessors ([`current_app`], [`request`], [`session`],
//! [`context_globals`]) are zero-argument functions that resolve the top
//! of that stack *at the moment they are called* — never at creation
//! time — which is what lets framework helpers like [`url_for`] and
//! [`flash`] work from anywhere inside handler code without an explicit
//! context parameter.
//!
//! The stack is task-local (`tokio::task_local!`), so concurrent requests
//! on separate tasks can never observe each other's context, and it is a
//! stack rather than a slot so that nested dispatch (a test client
//! invoking the application from inside a handler) shadows the outer
//! context until the inner one is popped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use crate::app::App;
use crate::http::Request;
use crate::routing::{Params, RoutingError};
use crate::session::Session;

/// Reserved session key holding the queue of pending flash notices.
pub const FLASHES_KEY: &str = "_flashes";

/// A transparent accessor was dereferenced outside any dispatch.
///
/// This is fatal and indicates a bug in the calling code: framework
/// helpers are only meaningful while a request is being dispatched.
#[derive(Debug, Error)]
#[error("no request context on this task — accessor used outside dispatch")]
pub struct NoContextError;

/// Errors from [`url_for`].
#[derive(Debug, Error)]
pub enum UrlError {
    #[error(transparent)]
    NoContext(#[from] NoContextError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Free-form per-request scratch storage: string keys to JSON values.
///
/// A cheap handle, like [`Session`], so the accessor can hand it out
/// without lifetimes. Dropped with its request context.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl Globals {
    /// Stores `value` under `key`.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().unwrap().insert(key.into(), value.into());
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().remove(key)
    }

    /// Returns `true` if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// All state belonging to one in-flight request.
///
/// Created by the dispatcher before hooks run, destroyed when the
/// dispatcher pops it; no context outlives its request.
pub struct RequestContext {
    app: Arc<App>,
    request: Arc<Request>,
    session: Option<Session>,
    globals: Globals,
    // Populated once routing succeeds.
    route: Mutex<Option<(String, Params)>>,
    // One-shot notices drained from the session on first read.
    flashes: Mutex<Option<Vec<String>>>,
}

impl RequestContext {
    pub(crate) fn new(app: Arc<App>, request: Request) -> Self {
        let session = app.open_session(&request);
        Self {
            app,
            request: Arc::new(request),
            session,
            globals: Globals::default(),
            route: Mutex::new(None),
            flashes: Mutex::new(None),
        }
    }

    /// The application this request is being dispatched against.
    pub fn app(&self) -> Arc<App> {
        Arc::clone(&self.app)
    }

    /// The inbound request envelope.
    pub fn request(&self) -> Arc<Request> {
        Arc::clone(&self.request)
    }

    /// The session opened for this request, `None` when the application
    /// has no session store.
    pub fn session(&self) -> Option<Session> {
        self.session.clone()
    }

    /// The per-request scratch map.
    pub fn globals(&self) -> Globals {
        self.globals.clone()
    }

    pub(crate) fn set_route(&self, endpoint: String, params: Params) {
        *self.route.lock().unwrap() = Some((endpoint, params));
    }

    /// The endpoint this request resolved to, once routing has run.
    pub fn endpoint(&self) -> Option<String> {
        self.route.lock().unwrap().as_ref().map(|(e, _)| e.clone())
    }

    /// The parameters captured by the matched rule, once routing has run.
    pub fn route_params(&self) -> Option<Params> {
        self.route.lock().unwrap().as_ref().map(|(_, p)| p.clone())
    }

    // Drains `_flashes` from the session on first call; repeat calls
    // within the same request return the same list.
    fn pending_flashes(&self) -> Vec<String> {
        let mut cache = self.flashes.lock().unwrap();
        if let Some(flashes) = cache.as_ref() {
            return flashes.clone();
        }
        let drained: Vec<String> = self
            .session
            .as_ref()
            .and_then(|s| s.remove(FLASHES_KEY))
            .and_then(|v| match v {
                Value::Array(items) => Some(
                    items
                        .into_iter()
                        .filter_map(|i| i.as_str().map(str::to_owned))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();
        *cache = Some(drained.clone());
        drained
    }
}

tokio::task_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<RequestContext>>>;
}

// Pops the stack on every exit path, normal or not. Held across awaits;
// the RefCell is only borrowed inside synchronous closures.
struct PopGuard;

impl Drop for PopGuard {
    fn drop(&mut self) {
        match CONTEXT_STACK.try_with(|stack| stack.borrow_mut().pop().is_some()) {
            Ok(true) => {}
            // Scope already torn down (task cancellation) — nothing to pop.
            Err(_) => {}
            Ok(false) => {
                if !std::thread::panicking() {
                    panic!("request context stack popped while empty");
                }
            }
        }
    }
}

/// Runs `fut` with `ctx` pushed as the current request context.
///
/// Establishes the task-local stack if this is the task's outermost
/// dispatch; otherwise pushes onto the existing stack (nested dispatch).
/// The matching pop is guaranteed on every exit path.
pub(crate) async fn with_context<F, T>(ctx: Arc<RequestContext>, fut: F) -> T
where
    F: Future<Output = T>,
{
    if CONTEXT_STACK.try_with(|_| ()).is_ok() {
        pushed(ctx, fut).await
    } else {
        CONTEXT_STACK
            .scope(RefCell::new(Vec::new()), pushed(ctx, fut))
            .await
    }
}

async fn pushed<F, T>(ctx: Arc<RequestContext>, fut: F) -> T
where
    F: Future<Output = T>,
{
    CONTEXT_STACK.with(|stack| stack.borrow_mut().push(ctx));
    let _guard = PopGuard;
    fut.await
}

/// Current nesting depth of the context stack on this task.
///
/// Zero outside dispatch. Chiefly useful for diagnostics and tests.
pub fn depth() -> usize {
    CONTEXT_STACK
        .try_with(|stack| stack.borrow().len())
        .unwrap_or(0)
}

// The innermost context, resolved at call time.
fn top() -> Result<Arc<RequestContext>, NoContextError> {
    CONTEXT_STACK
        .try_with(|stack| stack.borrow().last().cloned())
        .ok()
        .flatten()
        .ok_or(NoContextError)
}

/// The full context of the current request.
pub fn current() -> Result<Arc<RequestContext>, NoContextError> {
    top()
}

/// The application handling the current request.
pub fn current_app() -> Result<Arc<App>, NoContextError> {
    top().map(|ctx| ctx.app())
}

/// The current request envelope.
pub fn request() -> Result<Arc<Request>, NoContextError> {
    top().map(|ctx| ctx.request())
}

/// The current request's session, `None` when no session store is
/// configured.
pub fn session() -> Result<Option<Session>, NoContextError> {
    top().map(|ctx| ctx.session())
}

/// The current request's scratch map.
pub fn context_globals() -> Result<Globals, NoContextError> {
    top().map(|ctx| ctx.globals())
}

/// Builds a URL for `endpoint` against the current application's route
/// table. Usable from handler code and templates.
///
/// # Examples
///
/// ```rust,no_run
/// use carafe::context::url_for;
///
/// # fn inside_a_handler() -> Result<(), Box<dyn std::error::Error>> {
/// let url = url_for("show_user", &[("name", "alice")])?;
/// assert_eq!(url, "/users/alice");
/// # Ok(())
/// # }
/// ```
pub fn url_for(endpoint: &str, params: &[(&str, &str)]) -> Result<String, UrlError> {
    let app = current_app()?;
    Ok(app.routes().build(endpoint, params)?)
}

/// Queues a one-shot notice for the next request that reads flashes.
///
/// Requires a configured session store to persist across requests; with
/// no session the notice is dropped.
pub fn flash(message: impl Into<String>) -> Result<(), NoContextError> {
    let ctx = top()?;
    if let Some(session) = ctx.session() {
        let mut items = match session.get(FLASHES_KEY) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        items.push(Value::String(message.into()));
        session.insert(FLASHES_KEY, Value::Array(items));
    }
    Ok(())
}

/// Returns the pending flash notices, removing them from the session.
///
/// The first call in a request drains the session; further calls in the
/// same request return the same list.
pub fn get_flashed_messages() -> Result<Vec<String>, NoContextError> {
    top().map(|ctx| ctx.pending_flashes())
}
