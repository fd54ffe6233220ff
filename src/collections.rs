//! Small ordered-multimap used for headers and query parameters.
//!
//! Headers and query strings both need "insertion order preserved, multiple
//! values per key" semantics that `HashMap` doesn't give us. This is simpler
//! than pulling in a full multimap crate for two call sites.

/// An insertion-ordered multimap. Optionally case-insensitive on lookup
/// (used for headers; query params stay case-sensitive).
#[derive(Debug, Clone, Default)]
pub struct OrderedMultiMap {
    entries: Vec<(String, String)>,
    case_insensitive: bool,
}

impl OrderedMultiMap {
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            entries: Vec::new(),
            case_insensitive,
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    fn keys_match(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    /// First value for `key`, in insertion order.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| self.keys_match(k, key))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| self.keys_match(k, key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| self.keys_match(k, key))
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

    /// Drop every entry whose key matches `key` (case rule per this map).
    pub fn remove_all(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !self.keys_match(k, key));
    }

    pub fn to_map(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();
        for (k, v) in &self.entries {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
        map
    }
}

/// Parse a `key=value&key2=value2` query string into an ordered, decoded
/// multimap. Case-sensitive: query parameter names are not normalized.
pub fn parse_query_string(query: &str) -> OrderedMultiMap {
    let mut params = OrderedMultiMap::new(false);
    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.push(percent_decode(key), percent_decode(value));
        } else {
            params.push(percent_decode(part), String::new());
        }
    }
    params
}

/// Decode `%XX` escapes and `+` as space. Not a full RFC 3986 decoder but
/// enough for the query/form bodies this server sees. Works byte-wise (not
/// char-wise) so that a multi-byte UTF-8 sequence spread across consecutive
/// `%XX` escapes (e.g. `%C3%A9` for "é") decodes correctly instead of being
/// reassembled as one Latin-1 byte per escape.
pub fn percent_decode(s: &str) -> String {
    let mut bytes = Vec::with_capacity(s.len());
    let mut chars = s.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if ch == '%' {
            let hex = s.get(i + 1..i + 3);
            if let Some(hex) = hex.filter(|h| h.len() == 2) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    bytes.push(byte);
                    chars.next();
                    chars.next();
                    continue;
                }
            }
            bytes.push(b'%');
        } else if ch == '+' {
            bytes.push(b' ');
        } else {
            bytes.extend_from_slice(ch.to_string().as_bytes());
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse a `Cookie:` header value into a last-wins name -> value map.
pub fn parse_cookies(header_value: &str) -> std::collections::HashMap<String, String> {
    let mut cookies = std::collections::HashMap::new();
    for pair in header_value.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = OrderedMultiMap::new(true);
        headers.push("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
    }

    #[test]
    fn query_lookup_is_case_sensitive() {
        let mut q = OrderedMultiMap::new(false);
        q.push("Name", "a");
        assert_eq!(q.get("name"), None);
        assert_eq!(q.get("Name"), Some("a"));
    }

    #[test]
    fn parses_percent_and_plus_encoding() {
        let q = parse_query_string("name=John%20Doe&tag=a+b");
        assert_eq!(q.get("name"), Some("John Doe"));
        assert_eq!(q.get("tag"), Some("a b"));
    }

    #[test]
    fn percent_decode_reassembles_multi_byte_utf8_sequences() {
        let q = parse_query_string("name=caf%C3%A9");
        assert_eq!(q.get("name"), Some("café"));
    }

    #[test]
    fn last_cookie_wins() {
        let cookies = parse_cookies("a=1; a=2; b=3");
        assert_eq!(cookies.get("a"), Some(&"2".to_string()));
        assert_eq!(cookies.get("b"), Some(&"3".to_string()));
    }
}
