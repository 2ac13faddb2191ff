use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Invalid key path: {0}")]
    InvalidKey(String),
    #[error("Entity id '{found}' does not match the addressed id '{expected}'")]
    IdMismatch { expected: String, found: String },
}

// --- Key Paths ---

/// A single segment of a key path. Ordering is by variant first (integers sort
/// before strings), then by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Int(i64),
    Str(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(n) => write!(f, "{}", n),
            KeyPart::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}
impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}
impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Str(s.clone())
    }
}
impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

/// An ordered sequence of segments addressing one entry in a key-value store.
///
/// Paths compare lexicographically part by part, so `[users]` sorts before
/// `[users, "a"]`, which sorts before `[users, "b"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyPath(Vec<KeyPart>);

impl KeyPath {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// `[collection, id]`
    pub fn primary(collection: &str, id: &str) -> Self {
        Self(vec![collection.into(), id.into()])
    }

    /// `[collection, field, value]`
    pub fn secondary(collection: &str, field: &str, value: impl Into<KeyPart>) -> Self {
        Self(vec![collection.into(), field.into(), value.into()])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}

// --- Entity Capabilities ---

/// Secondary index name -> key path. Ordered so transactions are built deterministically.
pub type SecondaryKeys = BTreeMap<String, KeyPath>;

/// An entity stored in an ordered key-value store under `[collection, id]`,
/// optionally mirrored under any number of secondary keys.
pub trait IndexedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Caller-supplied identifier.
    fn id(&self) -> &str;

    /// Secondary keys derived from the entity's current field values.
    ///
    /// Every returned path is kept pointing at the current value of the entity
    /// for as long as the entity exists. Defaults to no secondary indexes.
    fn secondary_keys(&self, _collection: &str) -> SecondaryKeys {
        SecondaryKeys::new()
    }
}

/// An entity stored in a document collection whose identifier is generated
/// by the store and exposed as an opaque string.
pub trait DocumentEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Name of the serialized identifier field.
    const ID_FIELD: &'static str = "id";

    /// Empty until the entity has been created.
    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);
}

// --- Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    struct Account {
        id: String,
        email: String,
    }

    impl IndexedEntity for Account {
        fn id(&self) -> &str {
            &self.id
        }
        fn secondary_keys(&self, collection: &str) -> SecondaryKeys {
            let mut keys = SecondaryKeys::new();
            keys.insert(
                "email".to_string(),
                KeyPath::secondary(collection, "email", self.email.as_str()),
            );
            keys
        }
    }

    #[derive(Serialize, Deserialize, Clone, Debug)]
    struct Plain {
        id: String,
    }

    impl IndexedEntity for Plain {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[test]
    fn primary_and_secondary_paths() {
        let primary = KeyPath::primary("users", "u1");
        assert_eq!(primary.len(), 2);
        assert_eq!(primary.to_string(), "[users, u1]");

        let secondary = KeyPath::secondary("users", "email", "a@x.com");
        assert_eq!(secondary.to_string(), "[users, email, a@x.com]");
        assert!(secondary.starts_with(&KeyPath::new(vec!["users".into()])));
        assert!(!secondary.starts_with(&primary));
    }

    #[test]
    fn paths_order_lexicographically() {
        let prefix = KeyPath::new(vec!["users".into()]);
        let a = KeyPath::primary("users", "a");
        let b = KeyPath::primary("users", "b");
        let a_email = KeyPath::secondary("users", "a", "z");
        assert!(prefix < a);
        assert!(a < a_email);
        assert!(a_email < b);
        assert!(KeyPath::secondary("users", "n", 10i64) < KeyPath::secondary("users", "n", "0"));
    }

    #[test]
    fn key_parts_serialize_untagged() {
        let path = KeyPath::new(vec!["users".into(), 7i64.into()]);
        assert_eq!(serde_json::to_value(&path).unwrap(), json!(["users", 7]));
    }

    #[test]
    fn default_secondary_keys_are_empty() {
        let plain = Plain { id: "p1".to_string() };
        assert!(plain.secondary_keys("plain").is_empty());

        let account = Account {
            id: "u1".to_string(),
            email: "a@x.com".to_string(),
        };
        let keys = account.secondary_keys("users");
        assert_eq!(
            keys.get("email"),
            Some(&KeyPath::secondary("users", "email", "a@x.com"))
        );
    }
}
