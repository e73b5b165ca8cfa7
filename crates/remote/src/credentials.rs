//! Credential providers for remote sessions.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};

/// Username and password for a remote session.
///
/// The password is never printed by [`Debug`].
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}
impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Parse a JSON secret of the form `{"username": "...", "password": "..."}`.
    pub fn from_json(secret: &str) -> Result<Self> {
        serde_json::from_str(secret).map_err(|e| exn::Exn::from(ErrorKind::Credentials(format!("malformed secret: {e}"))))
    }
}
impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Credentials").field("username", &self.username).field("password", &"<redacted>").finish()
    }
}

/// Source of session credentials, looked up by secret name.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self, secret_name: &str) -> Result<Credentials>;
}

/// Hands out the same credentials for every secret name.
#[derive(Debug, Clone)]
pub struct StaticCredentials(Credentials);
impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self(credentials)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn fetch(&self, _secret_name: &str) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

#[cfg(feature = "secrets")]
pub use self::secrets::SecretsManagerProvider;

#[cfg(feature = "secrets")]
mod secrets {
    use super::{CredentialProvider, Credentials};
    use crate::error::{ErrorKind, Result};
    use async_trait::async_trait;
    use aws_sdk_secretsmanager::Client;
    use aws_sdk_secretsmanager::error::DisplayErrorContext;
    use exn::{OptionExt, ResultExt};

    /// Version stage holding the live value of a secret.
    const CURRENT_STAGE: &str = "AWSCURRENT";

    /// Reads JSON credentials from AWS Secrets Manager.
    #[derive(Debug, Clone)]
    pub struct SecretsManagerProvider {
        client: Client,
    }
    impl SecretsManagerProvider {
        pub fn new(client: Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl CredentialProvider for SecretsManagerProvider {
        async fn fetch(&self, secret_name: &str) -> Result<Credentials> {
            tracing::debug!(secret = secret_name, "Fetching credentials");
            let output = self
                .client
                .get_secret_value()
                .secret_id(secret_name)
                .version_stage(CURRENT_STAGE)
                .send()
                .await
                .map_err(|e| {
                    let detail = match e.as_service_error() {
                        Some(service) if service.is_resource_not_found_exception() => {
                            format!("secret {secret_name:?} does not exist")
                        },
                        _ => DisplayErrorContext(&e).to_string(),
                    };
                    ErrorKind::Credentials(detail)
                })?;
            let secret = output
                .secret_string()
                .ok_or_raise(|| ErrorKind::Credentials(format!("secret {secret_name:?} has no string value")))?;
            Credentials::from_json(secret).or_raise(|| ErrorKind::Credentials(secret_name.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use aws_sdk_secretsmanager::operation::get_secret_value::{GetSecretValueError, GetSecretValueOutput};
        use aws_sdk_secretsmanager::types::error::ResourceNotFoundException;
        use aws_smithy_mocks::{RuleMode, mock, mock_client};

        #[tokio::test]
        async fn test_fetch_current_version() {
            let rule = mock!(Client::get_secret_value)
                .match_requests(|req| req.secret_id() == Some("sftp-secret") && req.version_stage() == Some("AWSCURRENT"))
                .then_output(|| {
                    GetSecretValueOutput::builder().secret_string(r#"{"username":"ferry","password":"hunter2"}"#).build()
                });
            let client = mock_client!(aws_sdk_secretsmanager, RuleMode::MatchAny, [&rule]);
            let provider = SecretsManagerProvider::new(client);
            let credentials = provider.fetch("sftp-secret").await.unwrap();
            assert_eq!(credentials, Credentials::new("ferry", "hunter2"));
            assert_eq!(rule.num_calls(), 1);
        }

        #[tokio::test]
        async fn test_missing_secret() {
            let rule = mock!(Client::get_secret_value).then_error(|| {
                GetSecretValueError::ResourceNotFoundException(ResourceNotFoundException::builder().build())
            });
            let client = mock_client!(aws_sdk_secretsmanager, RuleMode::MatchAny, [&rule]);
            let err = SecretsManagerProvider::new(client).fetch("nope").await.unwrap_err();
            assert!(matches!(&*err, ErrorKind::Credentials(detail) if detail.contains("does not exist")));
        }

        #[tokio::test]
        async fn test_binary_secret_is_rejected() {
            let rule = mock!(Client::get_secret_value).then_output(|| GetSecretValueOutput::builder().build());
            let client = mock_client!(aws_sdk_secretsmanager, RuleMode::MatchAny, [&rule]);
            let err = SecretsManagerProvider::new(client).fetch("binary").await.unwrap_err();
            assert!(matches!(&*err, ErrorKind::Credentials(_)));
        }
    }
}
