use serde::{Deserialize, Serialize};

/// External login, keyed by provider name and the provider's user key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserLoginInfo {
    pub login_provider: String,
    pub provider_key: String,
}

impl UserLoginInfo {
    pub fn new(login_provider: impl Into<String>, provider_key: impl Into<String>) -> Self {
        Self {
            login_provider: login_provider.into(),
            provider_key: provider_key.into(),
        }
    }

    pub fn same_as(&self, other: &UserLoginInfo) -> bool {
        self.login_provider == other.login_provider && self.provider_key == other.provider_key
    }
}
