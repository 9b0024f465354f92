use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::models::identity::Identity;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` means the token is not recognised.
    async fn resolve(&self, token: &str) -> Option<Identity>;
}

#[derive(Debug, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    #[serde(flatten)]
    pub identity: Identity,
}

/// Bearer-token table, filled from configuration or by tests.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: DashMap<String, Identity>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<TokenEntry>) -> Self {
        let provider = Self::new();
        for entry in entries {
            provider.register(entry.token, entry.identity);
        }
        provider
    }

    pub fn register(&self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn resolve(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityProvider, StaticTokenProvider, TokenEntry};
    use crate::models::identity::Capability;

    #[tokio::test]
    async fn entries_parse_from_json_with_flattened_identity() {
        let raw = r#"[
            {"token": "t-1", "user_id": "ops", "is_staff": true},
            {"token": "t-2", "user_id": "rev", "capabilities": ["approve_parcel"]}
        ]"#;
        let entries: Vec<TokenEntry> = serde_json::from_str(raw).unwrap();
        let provider = StaticTokenProvider::from_entries(entries);

        assert_eq!(provider.len(), 2);
        let reviewer = provider.resolve("t-2").await.unwrap();
        assert!(reviewer.can(Capability::ApproveParcel));
        assert!(!reviewer.can(Capability::AssignDriver));
        assert!(provider.resolve("unknown").await.is_none());
    }
}
