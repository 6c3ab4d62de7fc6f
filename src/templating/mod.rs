//! Template rendering boundary.
//!
//! Rendering itself is an external collaborator: this module only defines
//! the [`TemplateEngine`] seam an application plugs in, plus the
//! [`render_template`] helper that resolves the engine off the current
//! request context.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::context::{current_app, NoContextError};

/// A rendering failure reported by the installed engine.
#[derive(Debug, Error)]
#[error("template `{name}` failed to render: {reason}")]
pub struct TemplateError {
    pub name: String,
    pub reason: String,
}

/// Errors from [`render_template`].
#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    NoContext(#[from] NoContextError),

    #[error("no template engine installed on the application")]
    NoEngine,

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// The engine contract: a template identifier and a mapping of named
/// values in, rendered text out.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, name: &str, values: &HashMap<String, Value>) -> Result<String, TemplateError>;
}

/// Renders `name` with the current application's engine.
///
/// Usable from handler code during dispatch; fails with
/// [`RenderError::NoContext`] outside of one and with
/// [`RenderError::NoEngine`] when the application never installed an
/// engine.
pub fn render_template(
    name: &str,
    values: &[(&str, Value)],
) -> Result<String, RenderError> {
    let app = current_app()?;
    let engine = app.template_engine().ok_or(RenderError::NoEngine)?;
    let values: HashMap<String, Value> = values
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect();
    Ok(engine.render(name, &values)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::app::{App, Payload};
    use crate::http::{Method, Request};

    // Toy engine: replaces `{key}` markers with string values.
    struct MarkerEngine;

    impl TemplateEngine for MarkerEngine {
        fn render(
            &self,
            name: &str,
            values: &HashMap<String, Value>,
        ) -> Result<String, TemplateError> {
            if name != "greeting" {
                return Err(TemplateError {
                    name: name.to_owned(),
                    reason: "unknown template".to_owned(),
                });
            }
            let mut out = "Hello {who}!".to_owned();
            for (key, value) in values {
                if let Some(s) = value.as_str() {
                    out = out.replace(&format!("{{{key}}}"), s);
                }
            }
            Ok(out)
        }
    }

    #[test]
    fn render_outside_dispatch_fails() {
        assert!(matches!(
            render_template("greeting", &[]),
            Err(RenderError::NoContext(_))
        ));
    }

    #[tokio::test]
    async fn render_through_current_app() {
        let mut builder = App::builder();
        builder.set_template_engine(Arc::new(MarkerEngine));
        builder
            .route("/hi", "hi", &[], |_p| async {
                let text = render_template("greeting", &[("who", "world".into())])
                    .map_err(|e| anyhow::anyhow!(e))?;
                Ok::<_, crate::app::Error>(Payload::Text(text))
            })
            .unwrap();
        let app = builder.build();

        let response = app
            .handle_request(Request::builder(Method::Get, "/hi").build())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(response.body_ref().to_vec()).unwrap(),
            "Hello world!"
        );
    }

    #[tokio::test]
    async fn missing_engine_is_reported() {
        let mut builder = App::builder();
        builder
            .route("/hi", "hi", &[], |_p| async {
                let result = render_template("greeting", &[]);
                assert!(matches!(result, Err(RenderError::NoEngine)));
                Ok::<_, crate::app::Error>(Payload::text("checked"))
            })
            .unwrap();
        let app = builder.build();
        app.handle_request(Request::builder(Method::Get, "/hi").build())
            .await
            .unwrap();
    }
}
