//! Header map for the request and response envelopes.

/// An ordered, case-insensitive, multi-valued header map.
///
/// Entries keep their insertion order and a name may appear more than
/// once, which is what `Set-Cookie` requires: the session store appends
/// its cookie without touching anything else on the response.
///
/// Lookups compare names ASCII-case-insensitively, per RFC 9110.
///
/// # Examples
///
/// ```
/// use carafe::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Set-Cookie", "session=abc");
/// headers.insert("Set-Cookie", "theme=dark");
///
/// assert_eq!(headers.get_all("set-cookie").count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty map with room for `n` entries.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
        }
    }

    /// Appends an entry, keeping any existing entries under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces every entry under `name` with the single given value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// The first value under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Every value under `name`, in insertion order.
    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.entries
            .iter()
            .filter_map(move |(n, v)| n.eq_ignore_ascii_case(name).then_some(v.as_str()))
    }

    /// Drops every entry under `name`; `true` if anything was dropped.
    pub fn remove(&mut self, name: &str) -> bool {
        let len = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.entries.len() != len
    }

    /// Whether any entry exists under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get_all(name).next().is_some()
    }

    /// Total entry count, counting repeated names once per entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_name_case() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        for name in ["content-type", "CONTENT-TYPE", "Content-Type"] {
            assert_eq!(headers.get(name), Some("text/plain"));
        }
    }

    #[test]
    fn repeated_names_keep_every_value_in_order() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        assert_eq!(
            headers.get_all("set-cookie").collect::<Vec<_>>(),
            ["a=1", "b=2"]
        );
        assert_eq!(headers.get("set-cookie"), Some("a=1"));
    }

    #[test]
    fn set_collapses_to_one_entry() {
        let mut headers = Headers::new();
        headers.insert("X-Tag", "old");
        headers.insert("X-Tag", "older");
        headers.set("x-tag", "new");
        assert_eq!(headers.get_all("x-tag").collect::<Vec<_>>(), ["new"]);
    }

    #[test]
    fn remove_reports_whether_anything_matched() {
        let mut headers = Headers::new();
        headers.insert("X-Tag", "v");
        assert!(headers.remove("x-tag"));
        assert!(!headers.remove("x-tag"));
        assert!(headers.is_empty());
    }

    #[test]
    fn contains_matches_case_insensitively() {
        let mut headers = Headers::new();
        headers.insert("Authorization", "Bearer token");
        assert!(headers.contains("authorization"));
        assert!(!headers.contains("cookie"));
    }
}
