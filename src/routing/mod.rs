//! URL routing — map URL patterns to endpoint names, both directions.
//!
//! This module provides [`RouteTable`], which resolves an incoming path and
//! method to a registered endpoint ([`RouteTable::recognize`]) and builds a
//! URL back from an endpoint name and parameters ([`RouteTable::build`]).
//!
//! Patterns are made of literal segments and `<name>` placeholders, each
//! binding exactly one path segment:
//!
//! | Pattern              | Example match   | Captured params   |
//! |----------------------|-----------------|-------------------|
//! | `/users`             | `/users`        | *(none)*          |
//! | `/users/<name>`      | `/users/alice`  | `name → "alice"`  |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so
//! `/users/` and `/users` are treated as equivalent.
//!
//! Rules are matched in registration order; the first rule whose pattern
//! and method both match the incoming request wins. There is no best-match
//! heuristic.

use std::collections::HashMap;

use thiserror::Error;

use crate::http::Method;

/// Setup-time registration failure. Never raised at request time.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("endpoint `{endpoint}` is already registered for method {method}")]
    DuplicateEndpoint { endpoint: String, method: Method },
}

/// Reverse-lookup failure in [`RouteTable::build`]. Always a programmer
/// error: the caller named an endpoint or parameter set that was never
/// registered.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no route registered for endpoint `{endpoint}`")]
    UnknownEndpoint { endpoint: String },

    #[error("missing value for placeholder `<{name}>` of endpoint `{endpoint}`")]
    MissingParameter { endpoint: String, name: String },
}

/// Forward-lookup outcome when no rule accepts the request. Structured and
/// recoverable: the dispatcher turns these into 404/405 results rather
/// than errors.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no route matches the requested path")]
    NotFound,

    #[error("method not allowed for this path")]
    MethodNotAllowed {
        /// Methods that would have been accepted by a structurally
        /// matching rule, in registration order.
        allowed: Vec<Method>,
    },
}

/// Parameters captured from a matched rule's placeholders.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Params {
    map: HashMap<String, String>,
}

impl Params {
    /// Creates an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a captured value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    /// Returns a captured value by placeholder name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Returns the number of captured values.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over `(name, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            map: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// A single pattern segment, either a literal or a `<name>` placeholder.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A single URL rule binding a pattern to an endpoint name.
///
/// Created at application-setup time and immutable thereafter; owned
/// exclusively by the [`RouteTable`].
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: String,
    endpoint: String,
    methods: Option<Vec<Method>>,
    build_only: bool,
    segments: Vec<Segment>,
}

impl Rule {
    /// Creates a rule for `pattern` bound to `endpoint`, defaulting to
    /// GET-only matching.
    pub fn new(pattern: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let pattern = normalize(&pattern.into());
        let segments = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                    Some(name) => Segment::Placeholder(name.to_owned()),
                    None => Segment::Literal(s.to_owned()),
                }
            })
            .collect();

        Self {
            pattern,
            endpoint: endpoint.into(),
            methods: None,
            build_only: false,
            segments,
        }
    }

    /// Restricts the rule to the given methods. An empty slice keeps the
    /// GET-only default.
    #[must_use]
    pub fn methods(mut self, methods: &[Method]) -> Self {
        if !methods.is_empty() {
            self.methods = Some(methods.to_vec());
        }
        self
    }

    /// Marks the rule as build-only: usable by [`RouteTable::build`] but
    /// never considered for matching. Used for externally served URLs
    /// such as static files.
    #[must_use]
    pub fn build_only(mut self) -> Self {
        self.build_only = true;
        self
    }

    /// Returns the endpoint name this rule is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the raw pattern string.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    // Methods this rule accepts. `None` registrations default to GET only;
    // the choice is explicit and documented rather than inferred.
    fn allowed_methods(&self) -> &[Method] {
        const GET_ONLY: &[Method] = &[Method::Get];
        self.methods.as_deref().unwrap_or(GET_ONLY)
    }

    fn accepts(&self, method: &Method) -> bool {
        self.allowed_methods().contains(method)
    }

    // Structural match: placeholders bind single segments, segment counts
    // must agree exactly. No partial matches.
    fn structural_match(&self, path: &str) -> Option<Params> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if self.segments.len() != path_segments.len() {
            return None;
        }

        let mut params = Params::new();
        for (seg, path_seg) in self.segments.iter().zip(path_segments) {
            match seg {
                Segment::Literal(s) => {
                    if s != path_seg {
                        return None;
                    }
                }
                Segment::Placeholder(name) => {
                    params.insert(name.clone(), path_seg.to_owned());
                }
            }
        }

        Some(params)
    }
}

// Strips the trailing slash so `/users/` and `/users` compare equal.
fn normalize(path: &str) -> String {
    if path != "/" && path.ends_with('/') {
        path[..path.len() - 1].to_owned()
    } else {
        path.to_owned()
    }
}

/// An ordered collection of [`Rule`]s with a reverse-lookup index.
///
/// Registration order is the match-priority order. The table is frozen
/// inside the application after setup and shared read-only across
/// request tasks.
///
/// # Examples
///
/// ```
/// use carafe::http::Method;
/// use carafe::routing::{Rule, RouteTable};
///
/// let mut table = RouteTable::new();
/// table.register(Rule::new("/users/<name>", "show_user")).unwrap();
///
/// let (endpoint, params) = table.recognize("/users/alice", &Method::Get).unwrap();
/// assert_eq!(endpoint, "show_user");
/// assert_eq!(params.get("name"), Some("alice"));
///
/// let url = table.build("show_user", &[("name", "alice")]).unwrap();
/// assert_eq!(url, "/users/alice");
/// ```
#[derive(Debug, Default)]
pub struct RouteTable {
    rules: Vec<Rule>,
    // endpoint name -> index of the first rule registered under it,
    // used for reverse URL construction.
    by_endpoint: HashMap<String, usize>,
}

impl RouteTable {
    /// Creates an empty route table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if no rules have been registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Registers a rule.
    ///
    /// # Errors
    ///
    /// [`ConfigurationError::DuplicateEndpoint`] if the endpoint is
    /// already bound to a rule accepting an overlapping method set.
    pub fn register(&mut self, rule: Rule) -> Result<(), ConfigurationError> {
        for existing in self.rules.iter().filter(|r| r.endpoint == rule.endpoint) {
            if let Some(method) = rule
                .allowed_methods()
                .iter()
                .find(|m| existing.accepts(m))
            {
                return Err(ConfigurationError::DuplicateEndpoint {
                    endpoint: rule.endpoint.clone(),
                    method: method.clone(),
                });
            }
        }

        let index = self.rules.len();
        self.by_endpoint
            .entry(rule.endpoint.clone())
            .or_insert(index);
        self.rules.push(rule);
        Ok(())
    }

    /// Resolves `path` and `method` to `(endpoint, params)`.
    ///
    /// Rules are scanned in registration order; build-only rules are
    /// skipped. Among rules that structurally match the path, the first
    /// one that also accepts `method` wins. If some rule matched the path
    /// but none accepted the method, the result is
    /// [`MatchError::MethodNotAllowed`] carrying the accepted set.
    pub fn recognize(&self, path: &str, method: &Method) -> Result<(String, Params), MatchError> {
        let path = normalize(path);
        let mut allowed: Vec<Method> = Vec::new();

        for rule in self.rules.iter().filter(|r| !r.build_only) {
            let Some(params) = rule.structural_match(&path) else {
                continue;
            };
            if rule.accepts(method) {
                return Ok((rule.endpoint.clone(), params));
            }
            for m in rule.allowed_methods() {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }

        if allowed.is_empty() {
            Err(MatchError::NotFound)
        } else {
            Err(MatchError::MethodNotAllowed { allowed })
        }
    }

    /// Builds a URL for `endpoint`, substituting `params` into the
    /// pattern's placeholders by name. Parameters with no matching
    /// placeholder are appended as a query string in sorted key order.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::UnknownEndpoint`] if no rule is registered under `endpoint`.
    /// - [`RoutingError::MissingParameter`] if a placeholder has no entry in `params`.
    pub fn build(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, RoutingError> {
        let rule = self
            .by_endpoint
            .get(endpoint)
            .map(|&i| &self.rules[i])
            .ok_or_else(|| RoutingError::UnknownEndpoint {
                endpoint: endpoint.to_owned(),
            })?;

        let mut used = vec![false; params.len()];
        let mut path = String::new();
        for seg in &rule.segments {
            path.push('/');
            match seg {
                Segment::Literal(s) => path.push_str(s),
                Segment::Placeholder(name) => {
                    let pos = params.iter().position(|(k, _)| k == name).ok_or_else(|| {
                        RoutingError::MissingParameter {
                            endpoint: endpoint.to_owned(),
                            name: name.clone(),
                        }
                    })?;
                    used[pos] = true;
                    path.push_str(params[pos].1);
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }

        let mut extra: Vec<(&str, &str)> = params
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .map(|((k, v), _)| (*k, *v))
            .collect();
        if !extra.is_empty() {
            extra.sort();
            let query = extra
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            path.push('?');
            path.push_str(&query);
        }

        Ok(path)
    }
}
