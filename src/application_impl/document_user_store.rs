use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, FixedOffset, Utc};
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

const USERS_PAGE_SIZE: usize = 128;

pub type SharedSession = Arc<Mutex<Box<dyn DocumentSession>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStoreOptions {
    /// Flush the session after create, update and delete.
    pub auto_save_changes: bool,
    /// Close the session when the store is disposed or dropped.
    pub dispose_session: bool,
}

impl Default for UserStoreOptions {
    fn default() -> Self {
        Self {
            auto_save_changes: true,
            dispose_session: true,
        }
    }
}

/// Lockout end reported when none is stored; storing it clears the lockout.
pub fn no_lockout_end() -> DateTime<FixedOffset> {
    DateTime::<Utc>::MIN_UTC.fixed_offset()
}

/// Identity store persisting [`IdentityUser`] documents through a [`DocumentSession`].
pub struct DocumentUserStore {
    session: SharedSession,
    options: UserStoreOptions,
    disposed: AtomicBool,
}

impl DocumentUserStore {
    pub fn new(session: Box<dyn DocumentSession>) -> Result<Self, IdentityStoreError> {
        Self::with_options(session, UserStoreOptions::default())
    }

    pub fn with_options(
        session: Box<dyn DocumentSession>,
        options: UserStoreOptions,
    ) -> Result<Self, IdentityStoreError> {
        ensure_unique_constraints(session.document_store().as_ref())?;
        Ok(Self::build(Arc::new(Mutex::new(session)), options))
    }

    /// Wraps a session the caller keeps a handle to, e.g. with `dispose_session` off.
    pub async fn from_shared(
        session: SharedSession,
        options: UserStoreOptions,
    ) -> Result<Self, IdentityStoreError> {
        let store = session.lock().await.document_store();
        ensure_unique_constraints(store.as_ref())?;
        Ok(Self::build(session, options))
    }

    fn build(session: SharedSession, options: UserStoreOptions) -> Self {
        debug!(?options, "user store opened");
        Self {
            session,
            options,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> UserStoreOptions {
        self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Flushes buffered changes; needed when `auto_save_changes` is off.
    pub async fn save_changes(&self) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        self.session.lock().await.save_changes().await?;
        Ok(())
    }

    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.options.dispose_session {
            self.session.lock().await.close();
        }
        debug!("user store disposed");
    }

    fn ensure_not_disposed(&self) -> Result<(), IdentityStoreError> {
        if self.is_disposed() {
            Err(IdentityStoreError::Disposed)
        } else {
            Ok(())
        }
    }

    async fn auto_save(&self, session: &mut dyn DocumentSession) -> Result<(), IdentityStoreError> {
        if self.options.auto_save_changes {
            session.save_changes().await?;
        }
        Ok(())
    }

    /// Lookup expected to match at most one user.
    ///
    /// Uniqueness is only enforced as the index catches up, so more than one
    /// match is reported instead of picking one.
    async fn find_single(
        &self,
        predicate: Predicate,
        field: &'static str,
        value: &str,
    ) -> Result<Option<IdentityUser>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        let query = DocumentQuery::new(IdentityUser::COLLECTION)
            .filter(predicate)
            .wait_for_non_stale_results_as_of_last_write();
        let mut documents = self.session.lock().await.query(&query).await?;

        match documents.len() {
            0 | 1 => documents.pop().map(from_document).transpose(),
            matches => {
                warn!(field, value, matches, "unique lookup matched more than one user");
                Err(IdentityStoreError::NonUniqueResult {
                    field,
                    value: value.to_string(),
                })
            }
        }
    }
}

impl Drop for DocumentUserStore {
    fn drop(&mut self) {
        if *self.disposed.get_mut() || !self.options.dispose_session {
            return;
        }
        if let Ok(mut session) = self.session.try_lock() {
            session.close();
        }
    }
}

fn ensure_unique_constraints(store: &dyn DocumentStore) -> Result<(), IdentityStoreError> {
    if has_listener::<UniqueConstraintsListener>(store) {
        Ok(())
    } else {
        Err(IdentityStoreError::InvalidConfiguration(
            "UniqueConstraintsListener has not been registered on the document store".to_string(),
        ))
    }
}

fn user_id(user: &IdentityUser) -> Result<&str, IdentityStoreError> {
    user.id()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| IdentityStoreError::unsaved("user"))
}

fn to_document(user: &IdentityUser) -> Result<Value, IdentityStoreError> {
    Ok(serde_json::to_value(user)?)
}

fn from_document(document: Value) -> Result<IdentityUser, IdentityStoreError> {
    Ok(serde_json::from_value(document)?)
}

// region user store

#[async_trait::async_trait]
impl UserStore for DocumentUserStore {
    async fn create(&self, user: &mut IdentityUser) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        let mut session = self.session.lock().await;

        let id = session
            .store_document(IdentityUser::COLLECTION, user.id(), to_document(user)?)
            .await?;
        if let Err(e) = self.auto_save(&mut **session).await {
            session.evict(&id);
            return Err(e);
        }
        user.id = Some(id);

        debug!(user_id = ?user.id, user_name = %user.user_name, "user created");
        Ok(())
    }

    async fn update(&self, user: &IdentityUser) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        let id = user_id(user)?;
        let mut session = self.session.lock().await;

        session
            .store_document(IdentityUser::COLLECTION, Some(id), to_document(user)?)
            .await?;
        if let Err(e) = self.auto_save(&mut **session).await {
            session.evict(id);
            return Err(e);
        }

        debug!(user_id = id, "user updated");
        Ok(())
    }

    async fn delete(&self, user: &IdentityUser) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        let id = user_id(user)?;
        let mut session = self.session.lock().await;

        session.delete(id)?;
        if let Err(e) = self.auto_save(&mut **session).await {
            session.evict(id);
            return Err(e);
        }

        debug!(user_id = id, "user deleted");
        Ok(())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<IdentityUser>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        if user_id.trim().is_empty() {
            return Ok(None);
        }

        let document = self.session.lock().await.load(user_id).await?;
        document
            .filter(|doc| document_collection(doc) == Some(IdentityUser::COLLECTION))
            .map(from_document)
            .transpose()
    }

    async fn find_by_name(
        &self,
        user_name: &str,
    ) -> Result<Option<IdentityUser>, IdentityStoreError> {
        self.find_single(
            Predicate::field_equals(fields::USER_NAME, user_name),
            "user name",
            user_name,
        )
        .await
    }
}

// endregion

// region credentials

#[async_trait::async_trait]
impl UserPasswordStore for DocumentUserStore {
    async fn set_password_hash(
        &self,
        user: &mut IdentityUser,
        password_hash: Option<&str>,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.password_hash = password_hash.map(str::to_string);
        Ok(())
    }

    async fn get_password_hash(
        &self,
        user: &IdentityUser,
    ) -> Result<Option<String>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.password_hash.clone())
    }

    async fn has_password(&self, user: &IdentityUser) -> Result<bool, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.password_hash.is_some())
    }
}

#[async_trait::async_trait]
impl UserSecurityStampStore for DocumentUserStore {
    async fn set_security_stamp(
        &self,
        user: &mut IdentityUser,
        stamp: &str,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.security_stamp = Some(require_non_blank(stamp, "stamp")?.to_string());
        Ok(())
    }

    async fn get_security_stamp(
        &self,
        user: &IdentityUser,
    ) -> Result<Option<String>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.security_stamp.clone())
    }
}

// endregion

// region logins, claims, roles

#[async_trait::async_trait]
impl UserLoginStore for DocumentUserStore {
    async fn add_login(
        &self,
        user: &mut IdentityUser,
        login: &UserLoginInfo,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        if !user.logins.iter().any(|l| l.same_as(login)) {
            user.logins.push(login.clone());
        }
        Ok(())
    }

    async fn remove_login(
        &self,
        user: &mut IdentityUser,
        login: &UserLoginInfo,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.logins.retain(|l| !l.same_as(login));
        Ok(())
    }

    async fn get_logins(
        &self,
        user: &IdentityUser,
    ) -> Result<Vec<UserLoginInfo>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.logins.clone())
    }

    async fn find_by_login(
        &self,
        login: &UserLoginInfo,
    ) -> Result<Option<IdentityUser>, IdentityStoreError> {
        let predicate = Predicate::any_element_matches(
            fields::LOGINS,
            [
                (fields::LOGIN_PROVIDER, login.login_provider.as_str()),
                (fields::PROVIDER_KEY, login.provider_key.as_str()),
            ],
        );
        let value = format!("{}/{}", login.login_provider, login.provider_key);
        self.find_single(predicate, "login", &value).await
    }
}

#[async_trait::async_trait]
impl UserClaimStore for DocumentUserStore {
    async fn get_claims(&self, user: &IdentityUser) -> Result<Vec<Claim>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user
            .claims
            .iter()
            .map(|c| Claim::new(c.claim_type.as_str(), c.value.as_str()))
            .collect())
    }

    async fn add_claim(
        &self,
        user: &mut IdentityUser,
        claim: &Claim,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        if !user.claims.iter().any(|c| c.same_as(claim)) {
            user.claims.push(claim.clone());
        }
        Ok(())
    }

    async fn remove_claim(
        &self,
        user: &mut IdentityUser,
        claim: &Claim,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.claims.retain(|c| !c.same_as(claim));
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserRoleStore for DocumentUserStore {
    async fn add_to_role(
        &self,
        user: &mut IdentityUser,
        role_name: &str,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        let role_name = require_non_blank(role_name, "role_name")?;
        if !user.roles.iter().any(|r| r == role_name) {
            user.roles.push(role_name.to_string());
        }
        Ok(())
    }

    async fn remove_from_role(
        &self,
        user: &mut IdentityUser,
        role_name: &str,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        let role_name = require_non_blank(role_name, "role_name")?;
        user.roles.retain(|r| r != role_name);
        Ok(())
    }

    async fn get_roles(&self, user: &IdentityUser) -> Result<Vec<String>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.roles.clone())
    }

    async fn is_in_role(
        &self,
        user: &IdentityUser,
        role_name: &str,
    ) -> Result<bool, IdentityStoreError> {
        self.ensure_not_disposed()?;
        let role_name = require_non_blank(role_name, "role_name")?;
        Ok(user.roles.iter().any(|r| r == role_name))
    }
}

// endregion

// region email, phone, two factor

#[async_trait::async_trait]
impl UserEmailStore for DocumentUserStore {
    async fn set_email(
        &self,
        user: &mut IdentityUser,
        email: &str,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.email = Some(require_non_blank(email, "email")?.to_string());
        Ok(())
    }

    async fn get_email(&self, user: &IdentityUser) -> Result<Option<String>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.email.clone())
    }

    async fn get_email_confirmed(&self, user: &IdentityUser) -> Result<bool, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.email_confirmed)
    }

    async fn set_email_confirmed(
        &self,
        user: &mut IdentityUser,
        confirmed: bool,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.email_confirmed = confirmed;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>, IdentityStoreError> {
        let email = require_non_blank(email, "email")?;
        self.find_single(Predicate::field_equals(fields::EMAIL, email), "email", email)
            .await
    }
}

#[async_trait::async_trait]
impl UserPhoneNumberStore for DocumentUserStore {
    async fn set_phone_number(
        &self,
        user: &mut IdentityUser,
        phone_number: &str,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.phone_number = Some(require_non_blank(phone_number, "phone_number")?.to_string());
        Ok(())
    }

    async fn get_phone_number(
        &self,
        user: &IdentityUser,
    ) -> Result<Option<String>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.phone_number.clone())
    }

    async fn get_phone_number_confirmed(
        &self,
        user: &IdentityUser,
    ) -> Result<bool, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.phone_number_confirmed)
    }

    async fn set_phone_number_confirmed(
        &self,
        user: &mut IdentityUser,
        confirmed: bool,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.phone_number_confirmed = confirmed;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserTwoFactorStore for DocumentUserStore {
    async fn set_two_factor_enabled(
        &self,
        user: &mut IdentityUser,
        enabled: bool,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.two_factor_enabled = enabled;
        Ok(())
    }

    async fn get_two_factor_enabled(
        &self,
        user: &IdentityUser,
    ) -> Result<bool, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.two_factor_enabled)
    }
}

// endregion

// region lockout

#[async_trait::async_trait]
impl UserLockoutStore for DocumentUserStore {
    async fn get_lockout_end_date(
        &self,
        user: &IdentityUser,
    ) -> Result<DateTime<FixedOffset>, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user
            .lockout_end_date_utc
            .map(|end| end.fixed_offset())
            .unwrap_or_else(no_lockout_end))
    }

    async fn set_lockout_end_date(
        &self,
        user: &mut IdentityUser,
        lockout_end: DateTime<FixedOffset>,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.lockout_end_date_utc =
            (lockout_end != no_lockout_end()).then(|| lockout_end.with_timezone(&Utc));
        Ok(())
    }

    async fn increment_access_failed_count(
        &self,
        user: &mut IdentityUser,
    ) -> Result<u32, IdentityStoreError> {
        self.ensure_not_disposed()?;
        let id = user_id(user)?.to_string();
        let mut session = self.session.lock().await;

        session
            .patch(&id, &[PatchCommand::inc(fields::ACCESS_FAILED_COUNT, 1)])
            .await?;
        *user = from_document(session.refresh(&id).await?)?;

        debug!(user_id = %id, count = user.access_failed_count, "access failed count incremented");
        Ok(user.access_failed_count)
    }

    async fn reset_access_failed_count(
        &self,
        user: &mut IdentityUser,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.access_failed_count = 0;
        Ok(())
    }

    async fn get_access_failed_count(&self, user: &IdentityUser) -> Result<u32, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.access_failed_count)
    }

    async fn get_lockout_enabled(&self, user: &IdentityUser) -> Result<bool, IdentityStoreError> {
        self.ensure_not_disposed()?;
        Ok(user.lockout_enabled)
    }

    async fn set_lockout_enabled(
        &self,
        user: &mut IdentityUser,
        enabled: bool,
    ) -> Result<(), IdentityStoreError> {
        self.ensure_not_disposed()?;
        user.lockout_enabled = enabled;
        Ok(())
    }
}

// endregion

impl QueryableUserStore for DocumentUserStore {
    fn users(&self) -> BoxStream<'_, Result<IdentityUser, IdentityStoreError>> {
        stream::try_unfold(Some(0usize), move |next| async move {
            let Some(skip) = next else {
                return Ok::<_, IdentityStoreError>(None);
            };
            self.ensure_not_disposed()?;

            let query = DocumentQuery::new(IdentityUser::COLLECTION)
                .skip(skip)
                .take(USERS_PAGE_SIZE);
            let page = self.session.lock().await.query(&query).await?;
            let next = (page.len() == USERS_PAGE_SIZE).then_some(skip + page.len());

            let users = page
                .into_iter()
                .map(from_document)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some((
                stream::iter(users.into_iter().map(Ok::<_, IdentityStoreError>)),
                next,
            )))
        })
        .try_flatten()
        .boxed()
    }
}
