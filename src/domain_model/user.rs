use super::{Claim, UserLoginInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity record persisted in the `IdentityUsers` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct IdentityUser {
    pub id: Option<String>,
    pub user_name: String,
    pub email: Option<String>,
    pub email_confirmed: bool,
    pub password_hash: Option<String>,
    pub security_stamp: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub two_factor_enabled: bool,
    pub lockout_end_date_utc: Option<DateTime<Utc>>,
    pub lockout_enabled: bool,
    pub access_failed_count: u32,
    pub roles: Vec<String>,
    pub claims: Vec<Claim>,
    pub logins: Vec<UserLoginInfo>,
}

impl IdentityUser {
    pub const COLLECTION: &'static str = "IdentityUsers";

    /// Fields carrying a unique constraint.
    pub const UNIQUE_FIELDS: [&'static str; 2] = [fields::USER_NAME, fields::EMAIL];

    pub fn new(user_name: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_locked_out_at(&self, now: DateTime<Utc>) -> bool {
        self.lockout_enabled && self.lockout_end_date_utc.is_some_and(|end| end > now)
    }
}

/// Serialized field names, as they appear in stored documents.
pub mod fields {
    pub const USER_NAME: &str = "UserName";
    pub const EMAIL: &str = "Email";
    pub const ACCESS_FAILED_COUNT: &str = "AccessFailedCount";
    pub const LOGINS: &str = "Logins";
    pub const LOGIN_PROVIDER: &str = "LoginProvider";
    pub const PROVIDER_KEY: &str = "ProviderKey";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn serializes_with_document_field_names() {
        let mut user = IdentityUser::new("alice").with_email("alice@example.com");
        user.access_failed_count = 2;
        user.logins.push(UserLoginInfo::new("github", "42"));

        let doc = serde_json::to_value(&user).unwrap();
        assert_eq!(doc[fields::USER_NAME], "alice");
        assert_eq!(doc[fields::EMAIL], "alice@example.com");
        assert_eq!(doc[fields::ACCESS_FAILED_COUNT], 2);
        assert_eq!(doc[fields::LOGINS][0][fields::PROVIDER_KEY], "42");
    }

    #[test]
    fn ignores_metadata_when_deserializing() {
        let doc = serde_json::json!({
            "Id": "IdentityUsers/1",
            "UserName": "bob",
            "@metadata": { "Collection": "IdentityUsers" }
        });
        let user: IdentityUser = serde_json::from_value(doc).unwrap();
        assert_eq!(user.id(), Some("IdentityUsers/1"));
        assert_eq!(user.user_name, "bob");
        assert!(user.roles.is_empty());
    }

    #[test]
    fn lockout_requires_enabled_flag_and_future_end() {
        let now = Utc::now();
        let mut user = IdentityUser::new("carol");
        user.lockout_end_date_utc = Some(now + Duration::minutes(5));
        assert!(!user.is_locked_out_at(now));

        user.lockout_enabled = true;
        assert!(user.is_locked_out_at(now));
        assert!(!user.is_locked_out_at(now + Duration::minutes(10)));
    }
}
