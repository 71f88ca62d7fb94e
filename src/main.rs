use anyhow::{Result, anyhow, bail};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use chrono::{TimeDelta, Utc};
use futures_util::TryStreamExt;
use identity_docstore::application_impl::*;
use identity_docstore::application_port::*;
use identity_docstore::domain_model::*;
use identity_docstore::domain_port::*;
use identity_docstore::infra_memory::*;
use identity_docstore::infra_redis::*;
use identity_docstore::logger::*;
use identity_docstore::settings::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    debug!(?project_settings);
    let logger_config = LogConfig {
        filter: project_settings.log.filter.clone(),
    };
    logger.reload_from_config(&logger_config)?;

    let document_store = open_document_store(&project_settings.store).await?;
    let options = UserStoreOptions {
        auto_save_changes: project_settings.user_store.auto_save_changes,
        dispose_session: project_settings.user_store.dispose_session,
    };
    let users = DocumentUserStore::with_options(document_store.open_session(), options)?;

    let result = run(&users, cli.command).await;
    if !options.auto_save_changes && result.is_ok() {
        users.save_changes().await?;
    }
    users.dispose().await;
    result
}

async fn open_document_store(settings: &Store) -> Result<Arc<dyn DocumentStore>> {
    let unique_constraints = Arc::new(UniqueConstraintsListener::for_identity_users());

    let store: Arc<dyn DocumentStore> = match settings.backend {
        StoreBackend::Memory => {
            warn!("memory backend selected, users live only as long as this process");
            MemoryDocumentStore::builder()
                .register_listener(unique_constraints)
                .enforce_unique_constraints(settings.enforce_unique_constraints)
                .indexing_delay(Duration::from_millis(settings.indexing_delay_ms))
                .build()
        }
        StoreBackend::Redis => Arc::new(
            RedisDocumentStore::connect(&settings.redis_url, settings.key_prefix.as_str())
                .await?
                .register_listener(unique_constraints),
        ),
    };
    Ok(store)
}

async fn run(users: &DocumentUserStore, command: Command) -> Result<()> {
    match command {
        Command::Create {
            user_name,
            email,
            phone,
        } => {
            let mut user = IdentityUser::new(user_name);
            if let Some(email) = email {
                users.set_email(&mut user, &email).await?;
            }
            if let Some(phone) = phone {
                users.set_phone_number(&mut user, &phone).await?;
            }
            users
                .set_security_stamp(&mut user, &new_security_stamp())
                .await?;
            users.create(&mut user).await?;
            println!("{}", user.id().unwrap_or_default());
        }
        Command::Show { id } => {
            let user = require_user(users, &id).await?;
            print_user(&user)?;
            if user.is_locked_out_at(Utc::now()) {
                println!("locked out");
            }
        }
        Command::Find {
            username,
            email,
            provider,
            key,
        } => {
            let found = match (username, email, provider.zip(key)) {
                (Some(user_name), _, _) => users.find_by_name(&user_name).await?,
                (_, Some(email), _) => users.find_by_email(&email).await?,
                (_, _, Some((provider, key))) => {
                    users
                        .find_by_login(&UserLoginInfo::new(provider, key))
                        .await?
                }
                _ => bail!("one of --username, --email or --provider with --key is required"),
            };
            match found {
                Some(user) => print_user(&user)?,
                None => bail!("no matching user"),
            }
        }
        Command::List => {
            let mut all = users.users();
            while let Some(user) = all.try_next().await? {
                println!(
                    "{}\t{}\t{}",
                    user.id().unwrap_or_default(),
                    user.user_name,
                    user.email.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Delete { id } => {
            let user = require_user(users, &id).await?;
            users.delete(&user).await?;
        }
        Command::AddRole { id, role } => {
            let mut user = require_user(users, &id).await?;
            users.add_to_role(&mut user, &role).await?;
            users.update(&user).await?;
        }
        Command::RemoveRole { id, role } => {
            let mut user = require_user(users, &id).await?;
            users.remove_from_role(&mut user, &role).await?;
            users.update(&user).await?;
        }
        Command::AddClaim {
            id,
            claim_type,
            value,
        } => {
            let mut user = require_user(users, &id).await?;
            users
                .add_claim(&mut user, &Claim::new(claim_type, value))
                .await?;
            users.update(&user).await?;
        }
        Command::RemoveClaim {
            id,
            claim_type,
            value,
        } => {
            let mut user = require_user(users, &id).await?;
            users
                .remove_claim(&mut user, &Claim::new(claim_type, value))
                .await?;
            users.update(&user).await?;
        }
        Command::AddLogin { id, provider, key } => {
            let mut user = require_user(users, &id).await?;
            users
                .add_login(&mut user, &UserLoginInfo::new(provider, key))
                .await?;
            users.update(&user).await?;
        }
        Command::SetPassword { id, password } => {
            let mut user = require_user(users, &id).await?;
            let password_hash = hash_password(&password)?;
            users
                .set_password_hash(&mut user, Some(&password_hash))
                .await?;
            users
                .set_security_stamp(&mut user, &new_security_stamp())
                .await?;
            users.update(&user).await?;
        }
        Command::Lock { id, minutes } => {
            if minutes <= 0 {
                bail!("--minutes must be positive");
            }
            let lockout_end = TimeDelta::try_minutes(minutes)
                .and_then(|span| Utc::now().checked_add_signed(span))
                .ok_or_else(|| anyhow!("--minutes is out of range"))?;

            let mut user = require_user(users, &id).await?;
            users.set_lockout_enabled(&mut user, true).await?;
            users
                .set_lockout_end_date(&mut user, lockout_end.fixed_offset())
                .await?;
            users.update(&user).await?;
            println!("locked out until {lockout_end}");
        }
        Command::Unlock { id } => {
            let mut user = require_user(users, &id).await?;
            users
                .set_lockout_end_date(&mut user, no_lockout_end())
                .await?;
            users.reset_access_failed_count(&mut user).await?;
            users.update(&user).await?;
        }
        Command::Fail { id } => {
            let mut user = require_user(users, &id).await?;
            let count = users.increment_access_failed_count(&mut user).await?;
            println!("{count}");
        }
        Command::ResetFailures { id } => {
            let mut user = require_user(users, &id).await?;
            users.reset_access_failed_count(&mut user).await?;
            users.update(&user).await?;
        }
    }
    Ok(())
}

async fn require_user(users: &DocumentUserStore, id: &str) -> Result<IdentityUser> {
    users
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow!("user {id} not found"))
}

fn print_user(user: &IdentityUser) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(hash)
}

fn new_security_stamp() -> String {
    uuid::Uuid::new_v4().to_string()
}
