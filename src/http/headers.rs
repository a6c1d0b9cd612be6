/// An ordered collection of HTTP header fields.
///
/// Lookups ignore ASCII case, as header names are case-insensitive on the
/// wire. Fields keep their insertion order so serialized output is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over every value stored under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name` to `value`, replacing every existing field with that name.
    ///
    /// The replaced field keeps the position of the first occurrence.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.fields.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(index) => {
                self.fields[index] = (name, value);
                let mut i = index + 1;
                while i < self.fields.len() {
                    if self.fields[i].0.eq_ignore_ascii_case(&self.fields[index].0) {
                        self.fields.remove(i);
                    } else {
                        i += 1;
                    }
                }
            }
            None => self.fields.push((name, value)),
        }
    }

    /// Adds a field without touching existing fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Removes every field named `name`. Returns `true` if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    /// Appends `extra` to the value of the most recently added field.
    ///
    /// Used for obsolete line folding. Returns `false` when there is no field.
    pub(crate) fn extend_last(&mut self, extra: &str) -> bool {
        match self.fields.last_mut() {
            Some((_, value)) => {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(extra);
                true
            }
            None => false,
        }
    }

    /// Returns `true` if any comma-separated element of `name` equals `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// `true` for bytes allowed in a header name.
pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// `true` when `name: value` can be written as a single header line.
///
/// Names must be non-empty tokens; values may not contain CR, LF or NUL.
pub fn is_valid_field(name: &str, value: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(is_token_byte)
        && !value.bytes().any(|b| matches!(b, b'\r' | b'\n' | b'\0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
    }

    #[test]
    fn insert_replaces_all_case_variants() {
        let mut headers = Headers::new();
        headers.append("X-Tag", "a");
        headers.append("Other", "1");
        headers.append("x-tag", "b");
        headers.insert("X-TAG", "c");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_all("x-tag").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(headers.iter().next(), Some(("X-TAG", "c")));
    }

    #[test]
    fn token_lists_are_split() {
        let mut headers = Headers::new();
        headers.append("Connection", "Upgrade, Keep-Alive");

        assert!(headers.has_token("connection", "keep-alive"));
        assert!(!headers.has_token("connection", "close"));
    }

    #[test]
    fn field_validation() {
        assert!(is_valid_field("X-Name", "a value; with=things"));
        assert!(!is_valid_field("X-Name", "a\r\nSet-Cookie: x"));
        assert!(!is_valid_field("X-Name", "a\nb"));
        assert!(!is_valid_field("Bad Name", "v"));
        assert!(!is_valid_field("X:Y", "v"));
        assert!(!is_valid_field("", "v"));
    }
}
