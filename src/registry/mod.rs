pub mod credentials;

pub use credentials::{decode_authorization_token, registry_host, RegistryCredentials};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::ecr::policy::LifecyclePolicy;

/// A repository as reported back by the registry after it was created or found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Repository name, e.g. "prod/dmnd-client"
    pub name: String,
    /// Full repository URL without tag,
    /// e.g. "123456789012.dkr.ecr.eu-west-1.amazonaws.com/prod/dmnd-client"
    pub url: String,
    /// Registry (account) the repository lives in
    pub registry_id: String,
}

/// What a repository should carry besides its name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// Resource tags applied when the repository is created
    pub tags: Vec<(String, String)>,
    /// Image tags that stay overwritable in an otherwise immutable repository
    pub mutable_tags: Vec<String>,
}

/// Trait for container registry providers
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Create the repository, or converge an existing one to immutable tags with
    /// scan-on-push disabled. `options.mutable_tags` are exempt from immutability.
    async fn ensure_repository(&self, name: &str, options: &RepositoryOptions)
        -> Result<Repository>;

    /// Replace the lifecycle policy of a repository
    async fn put_lifecycle_policy(
        &self,
        repository_name: &str,
        policy: &LifecyclePolicy,
    ) -> Result<()>;

    /// Issue a short-lived authorization token for the given registry.
    ///
    /// The token is base64 of "username:password".
    async fn authorization_token(&self, registry_id: &str) -> Result<String>;

    /// Delete a repository together with its images.
    ///
    /// Returns true if deleted, false if it didn't exist.
    async fn delete_repository(&self, name: &str) -> Result<bool>;

    /// Get the registry type identifier
    fn registry_type(&self) -> &str;
}
