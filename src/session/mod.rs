//! Client-side sessions backed by a signed cookie.
//!
//! The dispatcher only ever sees the [`SessionStore`] boundary: `open` a
//! session from an inbound request, `save` it back onto the outgoing
//! response. [`SignedCookieStore`] is the built-in implementation; an
//! application without a signing key has no store at all, and every
//! request's session is `None`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::http::{Request, Response};

#[derive(Debug, Default)]
struct SessionData {
    // BTreeMap keeps serialization deterministic, so an unchanged session
    // signs to the same bytes every time.
    values: BTreeMap<String, Value>,
    modified: bool,
}

/// A per-request session: string keys mapped to JSON values.
///
/// `Session` is a cheap handle (`Arc` inside) so the transparent
/// accessor can hand it out without lifetimes. Mutation marks the
/// session modified, which is what tells the store to write the cookie
/// back.
///
/// # Examples
///
/// ```
/// use carafe::session::Session;
///
/// let session = Session::new();
/// session.insert("user_id", 42);
/// assert_eq!(session.get("user_id"), Some(42.into()));
/// assert!(session.is_modified());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Session {
    inner: Arc<Mutex<SessionData>>,
}

impl Session {
    /// Creates an empty, unmodified session.
    pub fn new() -> Self {
        Self::default()
    }

    fn from_values(values: BTreeMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionData {
                values,
                modified: false,
            })),
        }
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().values.get(key).cloned()
    }

    /// Stores `value` under `key`, marking the session modified.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut data = self.inner.lock().unwrap();
        data.values.insert(key.into(), value.into());
        data.modified = true;
    }

    /// Removes and returns the value under `key`. Marks the session
    /// modified only when something was actually removed.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut data = self.inner.lock().unwrap();
        let removed = data.values.remove(key);
        if removed.is_some() {
            data.modified = true;
        }
        removed
    }

    /// Returns `true` if the session has been mutated since it was opened.
    pub fn is_modified(&self) -> bool {
        self.inner.lock().unwrap().modified
    }

    /// Returns `true` if the session holds no values.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().values.is_empty()
    }

    fn snapshot(&self) -> BTreeMap<String, Value> {
        self.inner.lock().unwrap().values.clone()
    }
}

/// Adapter between the dispatcher and a session backend.
///
/// Contract: `save(open(request), response)` round-trips unchanged
/// session content byte-for-byte when nothing was mutated.
pub trait SessionStore: Send + Sync {
    /// Opens the session carried by `request`, or a fresh one.
    fn open(&self, request: &Request) -> Option<Session>;

    /// Writes `session` back onto `response`.
    fn save(&self, session: &Session, response: &mut Response);
}

/// Signed-cookie session store.
///
/// Cookie payload is `base64url(json)` followed by a keyed SHA-256 tag.
/// A missing, malformed, or tampered cookie opens as a fresh empty
/// session. `save` only writes the `Set-Cookie` header when the session
/// was modified; an untouched session keeps the client's existing cookie.
pub struct SignedCookieStore {
    secret: Vec<u8>,
    cookie_name: String,
}

impl SignedCookieStore {
    /// Creates a store signing with `secret`, reading and writing the
    /// cookie named `cookie_name`.
    pub fn new(secret: impl Into<Vec<u8>>, cookie_name: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            cookie_name: cookie_name.into(),
        }
    }

    fn tag(&self, payload: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(b".");
        hasher.update(payload);
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    fn encode(&self, values: &BTreeMap<String, Value>) -> String {
        let payload = serde_json::to_string(values).unwrap_or_else(|_| "{}".to_owned());
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            self.tag(payload.as_bytes())
        )
    }

    fn decode(&self, cookie: &str) -> Option<BTreeMap<String, Value>> {
        let (encoded, tag) = cookie.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if self.tag(&payload) != tag {
            return None;
        }
        serde_json::from_slice(&payload).ok()
    }
}

impl SessionStore for SignedCookieStore {
    fn open(&self, request: &Request) -> Option<Session> {
        let session = request
            .cookie(&self.cookie_name)
            .and_then(|c| self.decode(c))
            .map(Session::from_values)
            .unwrap_or_default();
        Some(session)
    }

    fn save(&self, session: &Session, response: &mut Response) {
        if !session.is_modified() {
            return;
        }
        let value = self.encode(&session.snapshot());
        response.set_cookie(&self.cookie_name, &value);
    }
}
