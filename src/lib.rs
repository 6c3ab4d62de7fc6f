//! # carafe
//!
//! A small async web framework built around a request-dispatch core:
//! request and response envelopes, a route table with `<name>`
//! placeholders, a per-request context stack with transparent accessors,
//! and a dispatcher with a two-tier error policy.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use carafe::{App, Payload};
//! use carafe::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = App::builder();
//!     builder.route("/", "index", &[], |_p| async {
//!         Ok(Payload::text("Hello, World!"))
//!     })?;
//!     builder.route("/users/<name>", "show_user", &[], |params: carafe::routing::Params| async move {
//!         let name = params.get("name").unwrap_or("stranger").to_owned();
//!         Ok(Payload::text(format!("Hello {name}")))
//!     })?;
//!     let app = builder.build();
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     println!("Listening on http://127.0.0.1:8080");
//!     server.run(app).await?;
//!     Ok(())
//! }
//! ```
//!
//! Inside a handler, the current request, session, and application are a
//! function call away — no parameter threading:
//!
//! ```rust,no_run
//! use carafe::context::{request, session, url_for, flash};
//!
//! # async fn inside_a_handler() -> Result<(), Box<dyn std::error::Error>> {
//! let who = request()?.query_param("who").unwrap_or("world").to_owned();
//! if let Some(session) = session()? {
//!     session.insert("last_greeted", who.as_str());
//! }
//! flash(format!("greeted {who}"))?;
//! let home = url_for("index", &[])?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod context;
pub mod http;
pub mod routing;
pub mod server;
pub mod session;
pub mod templating;
pub mod testing;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use app::{abort, App, AppBuilder, DispatchError, Error, HandlerResult, HttpError, Payload};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
pub use session::{Session, SessionStore};
pub use testing::TestClient;
