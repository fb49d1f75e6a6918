//! Ordered frame headers and STOMP 1.2 header escaping.
//!
//! Headers keep wire order and allow repeated names. Reads return the
//! first occurrence, matching STOMP 1.2 semantics for repeated headers.
//!
//! # Escaping
//!
//! | Raw | Escaped | Applies to |
//! |-----|---------|------------|
//! | `\` | `\\` | names, values |
//! | LF | `\n` | names, values |
//! | CR | `\r` | names, values |
//! | `:` | `\c` | names |
//!
//! Values may contain bare colons because only the first colon on a header
//! line separates name from value. Unknown escape sequences are kept
//! verbatim on decode.

/// Ordered multimap of frame headers.
///
/// ```
/// use tillbridge_protocol::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("destination", "/topic/a");
/// headers.insert("destination", "/topic/b");
///
/// assert_eq!(headers.get("destination"), Some("/topic/a"));
/// assert_eq!(headers.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any earlier header with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace the first header named `name`, or append it.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        }
    }
}

/// Escape a header name for the wire.
pub fn escape_name(name: &str) -> String {
    escape(name, true)
}

/// Escape a header value for the wire.
pub fn escape_value(value: &str) -> String {
    escape(value, false)
}

fn escape(raw: &str, escape_colon: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' if escape_colon => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_name`] / [`escape_value`].
///
/// ```
/// use tillbridge_protocol::headers::unescape;
///
/// assert_eq!(unescape(r"a\cb\\c"), r"a:b\c");
/// assert_eq!(unescape(r"keep\tthis"), r"keep\tthis");
/// ```
pub fn unescape(wire: &str) -> String {
    let mut out = String::with_capacity(wire.len());
    let mut chars = wire.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
