use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::user_repository::UserRepository;
use crate::utils::encryption::{decrypt_secret, EncryptionError};

const DB_SECRET_PREFIX: &str = "db:";

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("credential {0} not found")]
    CredentialNotFound(Uuid),
    #[error("secret reference '{0}' is malformed")]
    InvalidReference(String),
    #[error("secret {0} not found")]
    SecretNotFound(Uuid),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error("external secret store error: {0}")]
    External(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// AWS-style secret store collaborator. Only the contract lives here; the
/// production backend is injected at process start.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExternalSecretStore: Send + Sync {
    async fn fetch(&self, secret_ref: &str) -> Result<String, SecretError>;
}

/// Stand-in for deployments that keep every secret in the database; any
/// external reference is a configuration error.
pub struct NoExternalSecretStore;

#[async_trait]
impl ExternalSecretStore for NoExternalSecretStore {
    async fn fetch(&self, secret_ref: &str) -> Result<String, SecretError> {
        Err(SecretError::External(format!(
            "no external secret store configured for reference '{secret_ref}'"
        )))
    }
}

/// Resolves credential references to plaintext on demand. `db:`-prefixed
/// references decrypt a local row; everything else goes to the external
/// store. Plaintext must stay in executor locals and never reach resources,
/// outputs or logs.
pub struct SecretResolver {
    users: Arc<dyn UserRepository>,
    external: Arc<dyn ExternalSecretStore>,
    encryption_key: Vec<u8>,
}

impl SecretResolver {
    pub fn new(
        users: Arc<dyn UserRepository>,
        external: Arc<dyn ExternalSecretStore>,
        encryption_key: Vec<u8>,
    ) -> Self {
        SecretResolver {
            users,
            external,
            encryption_key,
        }
    }

    pub async fn resolve(&self, secret_ref: &str) -> Result<String, SecretError> {
        match secret_ref.strip_prefix(DB_SECRET_PREFIX) {
            Some(raw_id) => {
                let secret_id = Uuid::parse_str(raw_id)
                    .map_err(|_| SecretError::InvalidReference(secret_ref.to_string()))?;
                let secret = self
                    .users
                    .find_db_secret_by_id(secret_id)
                    .await?
                    .ok_or(SecretError::SecretNotFound(secret_id))?;
                Ok(decrypt_secret(
                    &self.encryption_key,
                    &secret.nonce,
                    &secret.encrypted_value,
                )?)
            }
            None => self.external.fetch(secret_ref).await,
        }
    }

    /// Looks up a credential row and resolves its secret reference.
    pub async fn resolve_credential(&self, credential_id: Uuid) -> Result<String, SecretError> {
        let credential = self
            .users
            .find_credential_by_id(credential_id)
            .await?
            .ok_or(SecretError::CredentialNotFound(credential_id))?;
        self.resolve(&credential.secret_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::user_repository::MockUserRepository;
    use crate::models::credential::{Credential, DbSecret};
    use crate::utils::encryption::encrypt_secret;
    use time::OffsetDateTime;

    fn key() -> Vec<u8> {
        vec![9u8; 32]
    }

    #[tokio::test]
    async fn resolves_db_prefixed_reference_through_decryption() {
        let secret_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let (nonce, encrypted) = encrypt_secret(&key(), "hunter2").unwrap();

        let mut users = MockUserRepository::new();
        users
            .expect_find_db_secret_by_id()
            .returning(move |id| {
                assert_eq!(id, secret_id);
                let nonce = nonce.clone();
                let encrypted = encrypted.clone();
                Ok(Some(DbSecret {
                    id: secret_id,
                    user_id,
                    encrypted_value: encrypted,
                    nonce,
                    created_at: OffsetDateTime::now_utc(),
                }))
            });

        let resolver = SecretResolver::new(
            Arc::new(users),
            Arc::new(MockExternalSecretStore::new()),
            key(),
        );
        let value = resolver
            .resolve(&format!("db:{}", secret_id))
            .await
            .unwrap();
        assert_eq!(value, "hunter2");
    }

    #[tokio::test]
    async fn delegates_external_references() {
        let mut external = MockExternalSecretStore::new();
        external
            .expect_fetch()
            .returning(|_| Ok("external-value".to_string()));

        let resolver = SecretResolver::new(
            Arc::new(MockUserRepository::new()),
            Arc::new(external),
            key(),
        );
        let value = resolver
            .resolve("arn:aws:secretsmanager:us-east-1:123:secret:x")
            .await
            .unwrap();
        assert_eq!(value, "external-value");
    }

    #[tokio::test]
    async fn malformed_db_reference_is_rejected() {
        let resolver = SecretResolver::new(
            Arc::new(MockUserRepository::new()),
            Arc::new(MockExternalSecretStore::new()),
            key(),
        );
        let err = resolver.resolve("db:not-a-uuid").await.unwrap_err();
        assert!(matches!(err, SecretError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn credential_lookup_chains_into_secret_resolution() {
        let credential_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let mut users = MockUserRepository::new();
        users.expect_find_credential_by_id().returning(move |id| {
            Ok(Some(Credential {
                id,
                user_id,
                name: "api key".into(),
                secret_ref: "vault-ref".into(),
                is_db_secret: false,
                created_at: OffsetDateTime::now_utc(),
            }))
        });
        let mut external = MockExternalSecretStore::new();
        external.expect_fetch().returning(|secret_ref| {
            assert_eq!(secret_ref, "vault-ref");
            Ok("sk-123".to_string())
        });

        let resolver = SecretResolver::new(Arc::new(users), Arc::new(external), key());
        let value = resolver.resolve_credential(credential_id).await.unwrap();
        assert_eq!(value, "sk-123");
    }

    #[tokio::test]
    async fn missing_credential_is_an_error() {
        let mut users = MockUserRepository::new();
        users.expect_find_credential_by_id().returning(|_| Ok(None));

        let resolver = SecretResolver::new(
            Arc::new(users),
            Arc::new(MockExternalSecretStore::new()),
            key(),
        );
        let err = resolver
            .resolve_credential(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::CredentialNotFound(_)));
    }
}
