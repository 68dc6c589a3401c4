use std::fmt;

use super::StoreError;

const SEPARATOR: char = '/';
const INT_SIGN_FLIP: u64 = 1 << 63;

/// One component of a structured key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Str(String),
    Int(i64),
}

/// Structured key, e.g. `["donations", 42, 1700000000000]`.
///
/// Keys encode to strings whose lexicographic order matches the order of the
/// parts, so a prefix scan over encoded keys returns entries sorted the same
/// way a tuple comparison would.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KvKey {
    parts: Vec<KeyPart>,
}

impl KvKey {
    pub fn new(namespace: &str) -> Self {
        Self {
            parts: vec![KeyPart::Str(namespace.to_string())],
        }
    }

    #[must_use]
    pub fn str(mut self, value: impl Into<String>) -> Self {
        self.parts.push(KeyPart::Str(value.into()));
        self
    }

    #[must_use]
    pub fn int(mut self, value: i64) -> Self {
        self.parts.push(KeyPart::Int(value));
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn last_int(&self) -> Option<i64> {
        match self.parts.last() {
            Some(KeyPart::Int(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                out.push(SEPARATOR);
            }
            match part {
                KeyPart::Str(value) => {
                    out.push_str("s:");
                    out.push_str(&escape(value));
                }
                KeyPart::Int(value) => {
                    out.push_str(&format!("i:{:020}", (*value as u64) ^ INT_SIGN_FLIP));
                }
            }
        }
        out
    }

    /// Encoded form used for prefix scans. The trailing separator keeps
    /// `["users", "AB"]` from matching `["users", "ABC"]`.
    pub fn encode_prefix(&self) -> String {
        let mut out = self.encode();
        out.push(SEPARATOR);
        out
    }

    pub fn decode(raw: &str) -> Result<Self, StoreError> {
        let mut parts = Vec::new();
        for segment in raw.split(SEPARATOR) {
            let part = if let Some(value) = segment.strip_prefix("s:") {
                KeyPart::Str(unescape(value)?)
            } else if let Some(value) = segment.strip_prefix("i:") {
                let biased = value
                    .parse::<u64>()
                    .map_err(|error| StoreError::Codec(format!("key {raw}: {error}")))?;
                KeyPart::Int((biased ^ INT_SIGN_FLIP) as i64)
            } else {
                return Err(StoreError::Codec(format!("unrecognised key segment in {raw}")));
            };
            parts.push(part);
        }
        if parts.is_empty() {
            return Err(StoreError::Codec("empty key".to_string()));
        }
        Ok(Self { parts })
    }
}

impl fmt::Display for KvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn escape(value: &str) -> String {
    value.replace('%', "%25").replace(SEPARATOR, "%2F")
}

fn unescape(value: &str) -> Result<String, StoreError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "2F" => out.push(SEPARATOR),
            other => {
                return Err(StoreError::Codec(format!("invalid key escape %{other}")));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{KeyPart, KvKey};

    #[test]
    fn encoding_preserves_integer_order() {
        let values = [-5_i64, -1, 0, 1, 9, 10, 1_700_000_000_000, i64::MAX];
        let encoded: Vec<String> = values
            .iter()
            .map(|value| KvKey::new("donations").int(*value).encode())
            .collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn decode_inverts_encode_for_escaped_strings() {
        let key = KvKey::new("user_keys").str("A/B%C").int(-42);
        let decoded = KvKey::decode(&key.encode()).expect("decode");
        assert_eq!(decoded, key);
        assert_eq!(decoded.last_int(), Some(-42));
        assert_eq!(
            decoded.parts()[1],
            KeyPart::Str("A/B%C".to_string())
        );
    }

    #[test]
    fn prefix_does_not_match_longer_sibling() {
        let prefix = KvKey::new("users").str("AB").encode_prefix();
        let sibling = KvKey::new("users").str("ABC").int(1).encode();
        let child = KvKey::new("users").str("AB").int(1).encode();
        assert!(!sibling.starts_with(&prefix));
        assert!(child.starts_with(&prefix));
    }
}
