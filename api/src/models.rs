use domain::{DocumentEntity, IndexedEntity, KeyPath, SecondaryKeys};
use serde::{Deserialize, Deserializer, Serialize};

/// A user stored in the key-value store, indexed by email.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl IndexedEntity for User {
    fn id(&self) -> &str {
        &self.id
    }

    fn secondary_keys(&self, collection: &str) -> SecondaryKeys {
        let mut keys = SecondaryKeys::new();
        keys.insert(
            "email".to_string(),
            KeyPath::secondary(collection, "email", self.email.to_lowercase()),
        );
        keys
    }
}

/// A profile stored in the document store; `id` is assigned on create.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
}

impl DocumentEntity for Profile {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Body of `PATCH /documents/profiles/:id`. Omitted fields are left untouched;
/// an explicit `null` clears `city` or `bio`.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub city: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub bio: Option<Option<String>>,
}

// A key that is present, even as `null`, becomes `Some`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Serialize, Debug)]
pub struct DeleteResponse {
    pub deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::Patch;
    use serde_json::json;

    #[test]
    fn user_email_index_is_case_insensitive() {
        let user = User {
            id: "u1".to_string(),
            email: "Ada@X.com".to_string(),
            display_name: None,
        };
        let keys = user.secondary_keys("users");
        assert_eq!(
            keys.get("email"),
            Some(&KeyPath::secondary("users", "email", "ada@x.com"))
        );
    }

    #[test]
    fn profile_patch_only_carries_present_fields() {
        let body: ProfilePatch = serde_json::from_value(json!({ "city": "Paris" })).unwrap();
        let patch = Patch::from_serializable(&body).unwrap();
        assert_eq!(patch.fields().len(), 1);
        assert_eq!(patch.fields().get("city"), Some(&json!("Paris")));
    }

    #[test]
    fn profile_patch_null_clears_a_field() {
        let body: ProfilePatch =
            serde_json::from_value(json!({ "bio": null, "name": "Ada" })).unwrap();
        assert_eq!(body.bio, Some(None));
        assert_eq!(body.city, None);

        let patch = Patch::from_serializable(&body).unwrap();
        assert_eq!(patch.fields().len(), 2);
        assert_eq!(patch.fields().get("bio"), Some(&json!(null)));
        assert_eq!(patch.fields().get("name"), Some(&json!("Ada")));
    }
}
