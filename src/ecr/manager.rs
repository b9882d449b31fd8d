use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecr::types::{
    ImageScanningConfiguration, ImageTagMutability, ImageTagMutabilityExclusionFilter,
    ImageTagMutabilityExclusionFilterType, Tag,
};
use aws_sdk_ecr::Client as EcrClient;

use super::policy::LifecyclePolicy;
use crate::registry::{RegistryProvider, Repository, RepositoryOptions};
use crate::settings::AwsSettings;

/// Extract a clean error message from an AWS SDK error's Debug output
///
/// The AWS SDK errors have verbose Debug output, but we can extract just the
/// meaningful message by parsing for the `message: Some("...")` pattern.
fn format_sdk_error<E: std::fmt::Debug>(err: &E) -> String {
    let debug_str = format!("{:?}", err);

    if let Some(start) = debug_str.find("message: Some(\"") {
        let start = start + 15; // length of 'message: Some("'
        if let Some(end) = debug_str[start..].find("\")") {
            return debug_str[start..start + end].to_string();
        }
    }

    if let Some(start) = debug_str.find("\"Message\":\"") {
        let start = start + 11; // length of '"Message":"'
        if let Some(end) = debug_str[start..].find('"') {
            return debug_str[start..start + end].to_string();
        }
    }

    if debug_str.len() > 200 {
        let cut = (0..=200)
            .rev()
            .find(|i| debug_str.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}...", &debug_str[..cut])
    } else {
        debug_str
    }
}

/// Tag mutability and scanning settings a managed repository should have
#[derive(Debug, Clone, PartialEq)]
struct RepositoryConfig {
    tag_mutability: ImageTagMutability,
    /// Literal tags that stay mutable while every other tag is immutable
    mutable_tags: Vec<String>,
    scanning: ImageScanningConfiguration,
}

impl RepositoryConfig {
    /// Immutable tags with scan-on-push disabled. Tags in `options.mutable_tags`
    /// (the build cache) are excluded from immutability so they can be overwritten.
    fn for_options(options: &RepositoryOptions) -> Self {
        let mut mutable_tags = options.mutable_tags.clone();
        mutable_tags.sort();
        mutable_tags.dedup();

        let tag_mutability = if mutable_tags.is_empty() {
            ImageTagMutability::Immutable
        } else {
            ImageTagMutability::ImmutableWithExclusion
        };

        Self {
            tag_mutability,
            mutable_tags,
            scanning: ImageScanningConfiguration::builder()
                .scan_on_push(false)
                .build(),
        }
    }

    /// Exclusion filters for `PutImageTagMutability`/`CreateRepository`, None
    /// when every tag is immutable
    fn exclusion_filters(&self) -> Result<Option<Vec<ImageTagMutabilityExclusionFilter>>> {
        if self.mutable_tags.is_empty() {
            return Ok(None);
        }

        self.mutable_tags
            .iter()
            .map(|tag| {
                ImageTagMutabilityExclusionFilter::builder()
                    .filter_type(ImageTagMutabilityExclusionFilterType::Wildcard)
                    .filter(tag)
                    .build()
                    .with_context(|| format!("Failed to build tag exclusion filter for {}", tag))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    /// Which calls bring an existing repository to this configuration
    fn required_updates(&self, repo: &aws_sdk_ecr::types::Repository) -> RepositoryUpdates {
        let mut current_mutable_tags: Vec<String> = repo
            .image_tag_mutability_exclusion_filters()
            .iter()
            .map(|f| f.filter().to_string())
            .collect();
        current_mutable_tags.sort();
        current_mutable_tags.dedup();

        let scan_on_push = repo
            .image_scanning_configuration()
            .map(|c| c.scan_on_push())
            .unwrap_or(false);

        RepositoryUpdates {
            tag_mutability: repo.image_tag_mutability() != Some(&self.tag_mutability)
                || current_mutable_tags != self.mutable_tags,
            scanning: scan_on_push != self.scanning.scan_on_push(),
        }
    }
}

/// Updates an existing repository needs
#[derive(Debug, Default, PartialEq, Eq)]
struct RepositoryUpdates {
    tag_mutability: bool,
    scanning: bool,
}

fn to_tags(tags: &[(String, String)]) -> Result<Vec<Tag>> {
    tags.iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .with_context(|| format!("Failed to build tag {}", key))
        })
        .collect()
}

/// ECR-backed registry provider
///
/// Repositories are created with immutable tags and scan-on-push disabled.
/// Credentials come from the static keys in the settings when both are set,
/// otherwise from the default AWS credential chain.
pub struct EcrRegistry {
    client: EcrClient,
}

impl EcrRegistry {
    /// Create a new ECR registry client
    pub async fn new(settings: &AwsSettings) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &settings.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            let creds =
                aws_sdk_ecr::config::Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(creds);
        }

        let aws_config = loader.load().await;
        if aws_config.region().is_none() {
            anyhow::bail!(
                "No AWS region configured. Set [aws] region in config, IMAGE__AWS__REGION or AWS_REGION"
            );
        }

        Ok(Self {
            client: EcrClient::new(&aws_config),
        })
    }

    /// Look up a repository by name, returning None if it doesn't exist
    async fn describe_repository(
        &self,
        name: &str,
    ) -> Result<Option<aws_sdk_ecr::types::Repository>> {
        match self
            .client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await
        {
            Ok(response) => Ok(response.repositories().first().cloned()),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_repository_not_found_exception() {
                        return Ok(None);
                    }
                }
                Err(anyhow::anyhow!(
                    "Failed to check ECR repository existence for '{}': {}",
                    name,
                    format_sdk_error(&err)
                ))
            }
        }
    }

    /// Bring an existing repository to the desired configuration
    async fn converge_repository(
        &self,
        repo: &aws_sdk_ecr::types::Repository,
        config: &RepositoryConfig,
    ) -> Result<()> {
        let name = repo.repository_name().unwrap_or_default();
        let updates = config.required_updates(repo);

        if updates.tag_mutability {
            tracing::info!(
                "Setting tag mutability of ECR repository {} to {} (mutable tags: {:?})",
                name,
                config.tag_mutability.as_str(),
                config.mutable_tags
            );
            self.client
                .put_image_tag_mutability()
                .repository_name(name)
                .image_tag_mutability(config.tag_mutability.clone())
                .set_image_tag_mutability_exclusion_filters(config.exclusion_filters()?)
                .send()
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to set tag mutability of ECR repository '{}': {}",
                        name,
                        format_sdk_error(&e)
                    )
                })?;
        }

        if updates.scanning {
            tracing::info!("Disabling scan-on-push for ECR repository {}", name);
            self.client
                .put_image_scanning_configuration()
                .repository_name(name)
                .image_scanning_configuration(config.scanning.clone())
                .send()
                .await
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to update scanning configuration of ECR repository '{}': {}",
                        name,
                        format_sdk_error(&e)
                    )
                })?;
        }

        Ok(())
    }
}

fn to_repository(repo: &aws_sdk_ecr::types::Repository) -> Result<Repository> {
    Ok(Repository {
        name: repo
            .repository_name()
            .context("ECR returned a repository without a name")?
            .to_string(),
        url: repo
            .repository_uri()
            .context("ECR returned a repository without a URI")?
            .to_string(),
        registry_id: repo
            .registry_id()
            .context("ECR returned a repository without a registry ID")?
            .to_string(),
    })
}

#[async_trait]
impl RegistryProvider for EcrRegistry {
    async fn ensure_repository(
        &self,
        name: &str,
        options: &RepositoryOptions,
    ) -> Result<Repository> {
        let config = RepositoryConfig::for_options(options);

        if let Some(existing) = self.describe_repository(name).await? {
            tracing::debug!("ECR repository {} already exists", name);
            self.converge_repository(&existing, &config).await?;
            return to_repository(&existing);
        }

        tracing::info!("Creating ECR repository: {}", name);

        let response = self
            .client
            .create_repository()
            .repository_name(name)
            .image_tag_mutability(config.tag_mutability.clone())
            .set_image_tag_mutability_exclusion_filters(config.exclusion_filters()?)
            .image_scanning_configuration(config.scanning.clone())
            .set_tags(Some(to_tags(&options.tags)?))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create ECR repository '{}': {}",
                    name,
                    format_sdk_error(&e)
                )
            })?;

        let created = response
            .repository()
            .context("ECR did not return the created repository")?;

        tracing::info!("Created ECR repository: {}", name);
        to_repository(created)
    }

    async fn put_lifecycle_policy(
        &self,
        repository_name: &str,
        policy: &LifecyclePolicy,
    ) -> Result<()> {
        let text = policy.to_json()?;

        tracing::info!("Applying lifecycle policy to ECR repository {}", repository_name);
        tracing::debug!("Lifecycle policy: {}", text);

        self.client
            .put_lifecycle_policy()
            .repository_name(repository_name)
            .lifecycle_policy_text(text)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to put lifecycle policy on ECR repository '{}': {}",
                    repository_name,
                    format_sdk_error(&e)
                )
            })?;

        Ok(())
    }

    async fn authorization_token(&self, registry_id: &str) -> Result<String> {
        tracing::info!("Getting ECR authorization token for registry {}", registry_id);

        let response = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to get ECR authorization token: {}",
                    format_sdk_error(&e)
                )
            })?;

        let auth_data = response
            .authorization_data()
            .first()
            .context("No authorization data returned from ECR")?;

        let token = auth_data
            .authorization_token()
            .context("No authorization token in response")?;

        Ok(token.to_string())
    }

    async fn delete_repository(&self, name: &str) -> Result<bool> {
        if self.describe_repository(name).await?.is_none() {
            tracing::debug!("ECR repository {} does not exist, nothing to delete", name);
            return Ok(false);
        }

        tracing::info!("Deleting ECR repository: {}", name);

        // force = true deletes images too
        self.client
            .delete_repository()
            .repository_name(name)
            .force(true)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to delete ECR repository '{}': {}",
                    name,
                    format_sdk_error(&e)
                )
            })?;

        tracing::info!("Deleted ECR repository: {}", name);
        Ok(true)
    }

    fn registry_type(&self) -> &str {
        "ecr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct FakeSdkError {
        message: Option<String>,
    }

    #[test]
    fn test_format_sdk_error_extracts_message() {
        let err = FakeSdkError {
            message: Some("Repository already exists".to_string()),
        };
        assert_eq!(format_sdk_error(&err), "Repository already exists");
    }

    #[test]
    fn test_format_sdk_error_truncates_long_output() {
        let long = "x".repeat(500);
        let formatted = format_sdk_error(&long);
        assert!(formatted.ends_with("..."));
        assert!(formatted.len() <= 203);
    }

    fn repository(
        mutability: ImageTagMutability,
        mutable_tags: &[&str],
        scan_on_push: bool,
    ) -> aws_sdk_ecr::types::Repository {
        let filters = mutable_tags
            .iter()
            .map(|tag| {
                ImageTagMutabilityExclusionFilter::builder()
                    .filter_type(ImageTagMutabilityExclusionFilterType::Wildcard)
                    .filter(*tag)
                    .build()
                    .unwrap()
            })
            .collect::<Vec<_>>();
        aws_sdk_ecr::types::Repository::builder()
            .repository_name("client")
            .repository_uri("123456789012.dkr.ecr.eu-west-1.amazonaws.com/client")
            .registry_id("123456789012")
            .image_tag_mutability(mutability)
            .set_image_tag_mutability_exclusion_filters(Some(filters))
            .image_scanning_configuration(
                ImageScanningConfiguration::builder()
                    .scan_on_push(scan_on_push)
                    .build(),
            )
            .build()
    }

    fn cache_options() -> RepositoryOptions {
        RepositoryOptions {
            tags: Vec::new(),
            mutable_tags: vec!["cache".to_string()],
        }
    }

    #[test]
    fn test_config_without_cache_is_immutable_and_unscanned() {
        let config = RepositoryConfig::for_options(&RepositoryOptions::default());
        assert_eq!(config.tag_mutability, ImageTagMutability::Immutable);
        assert!(config.mutable_tags.is_empty());
        assert!(!config.scanning.scan_on_push());
        assert!(config.exclusion_filters().unwrap().is_none());
    }

    #[test]
    fn test_config_with_cache_excludes_only_cache_tag() {
        let config = RepositoryConfig::for_options(&cache_options());
        assert_eq!(config.tag_mutability, ImageTagMutability::ImmutableWithExclusion);
        assert!(!config.scanning.scan_on_push());

        let filters = config.exclusion_filters().unwrap().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].filter(), "cache");
        assert_eq!(
            filters[0].filter_type(),
            &ImageTagMutabilityExclusionFilterType::Wildcard
        );
    }

    #[test]
    fn test_mutable_repository_needs_tag_mutability_update() {
        let config = RepositoryConfig::for_options(&RepositoryOptions::default());
        let repo = repository(ImageTagMutability::Mutable, &[], false);
        assert_eq!(
            config.required_updates(&repo),
            RepositoryUpdates {
                tag_mutability: true,
                scanning: false,
            }
        );
    }

    #[test]
    fn test_scan_on_push_repository_needs_scanning_update() {
        let config = RepositoryConfig::for_options(&RepositoryOptions::default());
        let repo = repository(ImageTagMutability::Immutable, &[], true);
        assert_eq!(
            config.required_updates(&repo),
            RepositoryUpdates {
                tag_mutability: false,
                scanning: true,
            }
        );
    }

    #[test]
    fn test_repository_with_right_settings_needs_no_update() {
        let config = RepositoryConfig::for_options(&RepositoryOptions::default());
        let repo = repository(ImageTagMutability::Immutable, &[], false);
        assert_eq!(config.required_updates(&repo), RepositoryUpdates::default());

        let config = RepositoryConfig::for_options(&cache_options());
        let repo = repository(ImageTagMutability::ImmutableWithExclusion, &["cache"], false);
        assert_eq!(config.required_updates(&repo), RepositoryUpdates::default());
    }

    #[test]
    fn test_enabling_cache_adds_exclusion_to_immutable_repository() {
        let config = RepositoryConfig::for_options(&cache_options());
        let repo = repository(ImageTagMutability::Immutable, &[], false);
        assert!(config.required_updates(&repo).tag_mutability);
    }

    #[test]
    fn test_disabling_cache_removes_exclusion() {
        let config = RepositoryConfig::for_options(&RepositoryOptions::default());
        let repo = repository(ImageTagMutability::ImmutableWithExclusion, &["cache"], false);
        assert!(config.required_updates(&repo).tag_mutability);
    }

    #[test]
    fn test_to_tags() {
        let tags = to_tags(&[("image-management:app".to_string(), "client".to_string())]).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].key(), "image-management:app");
        assert_eq!(tags[0].value(), "client");
    }
}
