//! Case-insensitive header map
//!
//! Lookups ignore ASCII case. Writes replace any existing entry with the
//! same name, and the stored casing is the casing of the latest write.

use smallvec::SmallVec;

/// Ordered header storage with last-write-wins semantics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: SmallVec<[(String, String); 16]>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a header value (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set or override a header
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Set only when no header of that name exists yet
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<String>) {
        if !self.contains(name) {
            self.entries.push((name.to_string(), value.into()));
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn test_last_write_wins_with_latest_casing() {
        let mut headers = Headers::new();
        headers.set("x-user-id", "a");
        headers.set("X-User-ID", "b");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.iter().next(), Some(("X-User-ID", "b")));
    }

    #[test]
    fn test_set_if_absent_keeps_existing() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html");
        headers.set_if_absent("content-type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
    }

    #[test]
    fn test_remove() {
        let mut headers: Headers = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(headers.remove("a"), Some("1".to_string()));
        assert!(!headers.contains("A"));
        assert_eq!(headers.len(), 1);
    }
}
