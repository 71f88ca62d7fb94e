use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
    #[serde(rename = "Type")]
    pub claim_type: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }

    pub fn same_as(&self, other: &Claim) -> bool {
        self.claim_type == other.claim_type && self.value == other.value
    }
}
