// ABOUTME: Defines the Record struct representing a single user and the input shapes that create or patch it.
// ABOUTME: Record's serde form is the flat wire format shared by the HTTP API and the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A single user record. `id` and `created_at` are fixed at creation;
/// `active` only ever moves from true to false through deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

impl Record {
    /// Create a new active Record with a fresh ULID and the current time.
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: Ulid::new(),
            name,
            email,
            created_at: Utc::now(),
            active: true,
        }
    }

    /// Apply a patch in place. Fields left as None are unchanged.
    pub fn apply(&mut self, patch: &UserPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
    }
}

/// Input for creating a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), String> {
        validate_name(&self.name)?;
        validate_email(&self.email)
    }
}

/// Partial update for a user. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("update must set at least one of name, email".to_string());
        }
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be blank".to_string());
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(format!("invalid email address: {email:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_new_is_active_with_fresh_id() {
        let a = Record::new("A".to_string(), "a@x.com".to_string());
        let b = Record::new("B".to_string(), "b@x.com".to_string());

        assert!(a.active);
        assert_eq!(a.name, "A");
        assert_eq!(a.email, "a@x.com");
        assert!(a.created_at <= Utc::now());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn record_serializes_as_flat_camel_case() {
        let record = Record::new("A".to_string(), "a@x.com".to_string());
        let json = serde_json::to_value(&record).unwrap();
        let obj = json.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["active", "createdAt", "email", "id", "name"]);
        assert_eq!(json["id"], record.id.to_string());
        assert_eq!(json["active"], true);
    }

    #[test]
    fn apply_patch_only_touches_present_fields() {
        let mut record = Record::new("A".to_string(), "a@x.com".to_string());
        let before = record.clone();

        record.apply(&UserPatch {
            name: None,
            email: Some("a2@x.com".to_string()),
        });

        assert_eq!(record.name, "A");
        assert_eq!(record.email, "a2@x.com");
        assert_eq!(record.id, before.id);
        assert_eq!(record.created_at, before.created_at);
        assert_eq!(record.active, before.active);
    }

    #[test]
    fn validation_rejects_bad_input() {
        let blank = NewUser {
            name: "  ".to_string(),
            email: "a@x.com".to_string(),
        };
        assert!(blank.validate().is_err());

        let no_at = NewUser {
            name: "A".to_string(),
            email: "ax.com".to_string(),
        };
        assert!(no_at.validate().is_err());

        assert!(UserPatch::default().validate().is_err());
        assert!(
            UserPatch {
                name: Some("B".to_string()),
                email: None
            }
            .validate()
            .is_ok()
        );
    }
}
