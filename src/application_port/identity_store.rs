use crate::application_port::IdentityStoreError;
use crate::domain_model::{Claim, IdentityUser, UserLoginInfo};
use chrono::{DateTime, FixedOffset};
use futures_util::stream::BoxStream;

// Storage capabilities expected by an identity manager. Apart from the
// lookups, create/update/delete and `increment_access_failed_count`, every
// operation only reads or mutates the in-memory user; call `update` (or
// `save_changes` when auto-save is off) to persist.

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Stores a new user and assigns its id.
    async fn create(&self, user: &mut IdentityUser) -> Result<(), IdentityStoreError>;

    /// Overwrites the stored record with `user`.
    async fn update(&self, user: &IdentityUser) -> Result<(), IdentityStoreError>;

    async fn delete(&self, user: &IdentityUser) -> Result<(), IdentityStoreError>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<IdentityUser>, IdentityStoreError>;

    async fn find_by_name(&self, user_name: &str)
    -> Result<Option<IdentityUser>, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserPasswordStore: UserStore {
    async fn set_password_hash(
        &self,
        user: &mut IdentityUser,
        password_hash: Option<&str>,
    ) -> Result<(), IdentityStoreError>;
    async fn get_password_hash(&self, user: &IdentityUser)
    -> Result<Option<String>, IdentityStoreError>;
    async fn has_password(&self, user: &IdentityUser) -> Result<bool, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserLoginStore: UserStore {
    async fn add_login(
        &self,
        user: &mut IdentityUser,
        login: &UserLoginInfo,
    ) -> Result<(), IdentityStoreError>;
    async fn remove_login(
        &self,
        user: &mut IdentityUser,
        login: &UserLoginInfo,
    ) -> Result<(), IdentityStoreError>;
    async fn get_logins(&self, user: &IdentityUser)
    -> Result<Vec<UserLoginInfo>, IdentityStoreError>;
    async fn find_by_login(
        &self,
        login: &UserLoginInfo,
    ) -> Result<Option<IdentityUser>, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserClaimStore: UserStore {
    async fn get_claims(&self, user: &IdentityUser) -> Result<Vec<Claim>, IdentityStoreError>;
    async fn add_claim(&self, user: &mut IdentityUser, claim: &Claim)
    -> Result<(), IdentityStoreError>;
    async fn remove_claim(
        &self,
        user: &mut IdentityUser,
        claim: &Claim,
    ) -> Result<(), IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserRoleStore: UserStore {
    async fn add_to_role(
        &self,
        user: &mut IdentityUser,
        role_name: &str,
    ) -> Result<(), IdentityStoreError>;
    async fn remove_from_role(
        &self,
        user: &mut IdentityUser,
        role_name: &str,
    ) -> Result<(), IdentityStoreError>;
    async fn get_roles(&self, user: &IdentityUser) -> Result<Vec<String>, IdentityStoreError>;
    async fn is_in_role(&self, user: &IdentityUser, role_name: &str)
    -> Result<bool, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserSecurityStampStore: UserStore {
    async fn set_security_stamp(
        &self,
        user: &mut IdentityUser,
        stamp: &str,
    ) -> Result<(), IdentityStoreError>;
    async fn get_security_stamp(
        &self,
        user: &IdentityUser,
    ) -> Result<Option<String>, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserEmailStore: UserStore {
    async fn set_email(&self, user: &mut IdentityUser, email: &str)
    -> Result<(), IdentityStoreError>;
    async fn get_email(&self, user: &IdentityUser) -> Result<Option<String>, IdentityStoreError>;
    async fn get_email_confirmed(&self, user: &IdentityUser) -> Result<bool, IdentityStoreError>;
    async fn set_email_confirmed(
        &self,
        user: &mut IdentityUser,
        confirmed: bool,
    ) -> Result<(), IdentityStoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserLockoutStore: UserStore {
    /// Returns [`no_lockout_end`](crate::application_impl::no_lockout_end) when no end is stored.
    async fn get_lockout_end_date(
        &self,
        user: &IdentityUser,
    ) -> Result<DateTime<FixedOffset>, IdentityStoreError>;
    /// Storing [`no_lockout_end`](crate::application_impl::no_lockout_end) clears the lockout.
    async fn set_lockout_end_date(
        &self,
        user: &mut IdentityUser,
        lockout_end: DateTime<FixedOffset>,
    ) -> Result<(), IdentityStoreError>;
    /// Atomically increments the persisted counter, then reloads `user`.
    async fn increment_access_failed_count(
        &self,
        user: &mut IdentityUser,
    ) -> Result<u32, IdentityStoreError>;
    async fn reset_access_failed_count(&self, user: &mut IdentityUser)
    -> Result<(), IdentityStoreError>;
    async fn get_access_failed_count(&self, user: &IdentityUser) -> Result<u32, IdentityStoreError>;
    async fn get_lockout_enabled(&self, user: &IdentityUser) -> Result<bool, IdentityStoreError>;
    async fn set_lockout_enabled(
        &self,
        user: &mut IdentityUser,
        enabled: bool,
    ) -> Result<(), IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserTwoFactorStore: UserStore {
    async fn set_two_factor_enabled(
        &self,
        user: &mut IdentityUser,
        enabled: bool,
    ) -> Result<(), IdentityStoreError>;
    async fn get_two_factor_enabled(&self, user: &IdentityUser)
    -> Result<bool, IdentityStoreError>;
}

#[async_trait::async_trait]
pub trait UserPhoneNumberStore: UserStore {
    async fn set_phone_number(
        &self,
        user: &mut IdentityUser,
        phone_number: &str,
    ) -> Result<(), IdentityStoreError>;
    async fn get_phone_number(&self, user: &IdentityUser)
    -> Result<Option<String>, IdentityStoreError>;
    async fn get_phone_number_confirmed(
        &self,
        user: &IdentityUser,
    ) -> Result<bool, IdentityStoreError>;
    async fn set_phone_number_confirmed(
        &self,
        user: &mut IdentityUser,
        confirmed: bool,
    ) -> Result<(), IdentityStoreError>;
}

pub trait QueryableUserStore: UserStore {
    /// Lazily pages through every stored user. Each call starts a fresh cursor.
    fn users(&self) -> BoxStream<'_, Result<IdentityUser, IdentityStoreError>>;
}
