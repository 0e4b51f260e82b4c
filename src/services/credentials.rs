//! Default credential and assistant lookups backed by configuration

use async_trait::async_trait;

use crate::{config::BackendProfile, error::Result};

use super::{AssistantDirectory, CredentialProvider};

/// Inline profile key, else the profile's environment variable
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

#[async_trait]
impl CredentialProvider for EnvCredentials {
    async fn bearer_token(&self, profile: &BackendProfile) -> Option<String> {
        profile
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(profile.effective_api_key_env()).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Assistants listed in the profile
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredAssistants;

#[async_trait]
impl AssistantDirectory for ConfiguredAssistants {
    async fn list_assistants(&self, profile: &BackendProfile) -> Result<Vec<String>> {
        Ok(profile.assistant_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[tokio::test]
    async fn test_inline_key_wins() {
        let mut profile = BackendProfile::new("kb", BackendKind::Retrieval);
        profile.api_key = Some("inline".into());
        profile.api_key_env = Some("CHATSTREAM_TEST_UNUSED_KEY".into());
        assert_eq!(
            EnvCredentials.bearer_token(&profile).await.as_deref(),
            Some("inline")
        );
    }

    #[tokio::test]
    async fn test_env_key_fallback() {
        let mut profile = BackendProfile::new("kb", BackendKind::Retrieval);
        profile.api_key = Some(String::new());
        profile.api_key_env = Some("CHATSTREAM_TEST_ENV_KEY".into());

        std::env::set_var("CHATSTREAM_TEST_ENV_KEY", "from-env");
        assert_eq!(
            EnvCredentials.bearer_token(&profile).await.as_deref(),
            Some("from-env")
        );

        profile.api_key_env = Some("CHATSTREAM_TEST_MISSING_KEY".into());
        assert!(EnvCredentials.bearer_token(&profile).await.is_none());
    }

    #[tokio::test]
    async fn test_configured_assistants() {
        let mut profile = BackendProfile::new("kb", BackendKind::Retrieval);
        profile.assistant_ids = vec!["first".into(), "second".into()];
        let ids = ConfiguredAssistants.list_assistants(&profile).await.unwrap();
        assert_eq!(ids, vec!["first".to_string(), "second".to_string()]);
    }
}
