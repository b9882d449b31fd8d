// Image Management component: repository + retention policy + image build/push

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::build::{build_date, BuildRequest, ImageBuilder, CACHE_TAG};
use crate::ecr::policy::LifecyclePolicy;
use crate::error::DeployError;
use crate::registry::{decode_authorization_token, RegistryProvider, RepositoryOptions};
use crate::settings::BuildSettings;

/// Tag used when no image tag is given
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Placeholder for the repository URL in a plan, which only exists once the
/// repository has been created
const REPOSITORY_URL_PLACEHOLDER: &str = "<repository-url>";

// ECR repository name segments and image tag formats
static REPOSITORY_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*$").expect("valid regex"));
static IMAGE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"));

/// Construction arguments of the component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageManagementArgs {
    pub app_name: String,
    pub docker_context: String,
    pub dockerfile: String,
    /// Defaults to "latest"
    pub image_tag: Option<String>,
    /// Prefixes the repository name as "{env}/{app_name}" when set
    pub env: Option<String>,
}

/// Outputs exposed to downstream consumers after a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManagementOutputs {
    pub repository_url: String,
    pub repository_name: String,
    /// "{repository_url}:{tag}"
    pub image_uri: String,
    /// "{repository_url}@sha256:..." once pushed
    pub image_digest: Option<String>,
    /// The digest reference when known, otherwise the tagged URI
    pub image_ref: String,
}

/// What a deployment would declare, computed without calling any service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPlan {
    pub component: String,
    pub repository_resource: String,
    pub lifecycle_resource: String,
    pub image_resource: String,
    pub repository_name: String,
    pub image_tag: String,
    pub lifecycle_policy: LifecyclePolicy,
    pub build: BuildRequest,
}

/// A declared repository, retention policy and image, all derived from one
/// set of arguments
#[derive(Debug, Clone)]
pub struct ImageManagement {
    name: String,
    args: ImageManagementArgs,
    repository_name: String,
    image_tag: String,
    resource_prefix: String,
}

impl ImageManagement {
    /// Declare the component, validating the arguments and deriving names
    pub fn new(name: impl Into<String>, args: ImageManagementArgs) -> Result<Self, DeployError> {
        let name = name.into();

        for (field, value) in [
            ("appName", &args.app_name),
            ("dockerContext", &args.docker_context),
            ("dockerfile", &args.dockerfile),
        ] {
            if value.trim().is_empty() {
                return Err(DeployError::Config(format!(
                    "'{}' is required for component '{}'",
                    field, name
                )));
            }
        }

        let (repository_name, resource_prefix) = match args.env.as_deref() {
            Some(env) if env.trim().is_empty() => {
                return Err(DeployError::Config(format!(
                    "'env' must not be empty for component '{}'",
                    name
                )));
            }
            Some(env) => (
                format!("{}/{}", env, args.app_name),
                format!("{}-{}", env, args.app_name),
            ),
            None => (args.app_name.clone(), args.app_name.clone()),
        };

        if !repository_name
            .split('/')
            .all(|segment| REPOSITORY_SEGMENT.is_match(segment))
        {
            return Err(DeployError::Config(format!(
                "Invalid repository name '{}': segments must be lowercase alphanumerics separated by '.', '_' or '-'",
                repository_name
            )));
        }

        let image_tag = args
            .image_tag
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string());
        if !IMAGE_TAG.is_match(&image_tag) {
            return Err(DeployError::Config(format!(
                "Invalid image tag '{}'",
                image_tag
            )));
        }

        Ok(Self {
            name,
            args,
            repository_name,
            image_tag,
            resource_prefix,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// "{env}/{app_name}" or "{app_name}"
    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    /// Effective image tag
    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    /// Logical name of one of the declared resources, e.g. "prod-client-repo"
    pub fn resource_name(&self, kind: &str) -> String {
        format!("{}-{}", self.resource_prefix, kind)
    }

    /// Repository tags, plus the cache tag left mutable when the build exports a cache
    fn repository_options(&self, build: &BuildSettings) -> RepositoryOptions {
        RepositoryOptions {
            tags: vec![
                ("image-management:component".to_string(), self.name.clone()),
                ("image-management:app".to_string(), self.args.app_name.clone()),
            ],
            mutable_tags: if build.cache {
                vec![CACHE_TAG.to_string()]
            } else {
                Vec::new()
            },
        }
    }

    /// Describe the image build against a repository URL
    pub fn build_request(
        &self,
        repository_url: &str,
        build: &BuildSettings,
        build_date: String,
    ) -> BuildRequest {
        BuildRequest {
            image_name: format!("{}:{}", repository_url, self.image_tag),
            context: self.args.docker_context.clone(),
            dockerfile: self.args.dockerfile.clone(),
            platform: build.platform.clone(),
            build_args: BTreeMap::from([("BUILD_DATE".to_string(), build_date)]),
            cache_ref: build
                .cache
                .then(|| format!("{}:{}", repository_url, CACHE_TAG)),
            push: build.push,
        }
    }

    /// Declaration-shape view of what `deploy` would do
    pub fn plan(&self, build: &BuildSettings) -> DeployPlan {
        DeployPlan {
            component: self.name.clone(),
            repository_resource: self.resource_name("repo"),
            lifecycle_resource: self.resource_name("lifecycle"),
            image_resource: self.resource_name("image"),
            repository_name: self.repository_name.clone(),
            image_tag: self.image_tag.clone(),
            lifecycle_policy: LifecyclePolicy::default(),
            build: self.build_request(REPOSITORY_URL_PLACEHOLDER, build, build_date()),
        }
    }

    /// Apply the component: repository, then retention policy, then credentials,
    /// then the image build/push.
    ///
    /// The first failure aborts the run. Resources applied before it stay as they are.
    pub async fn deploy(
        &self,
        registry: &dyn RegistryProvider,
        builder: &dyn ImageBuilder,
        build: &BuildSettings,
    ) -> Result<ImageManagementOutputs, DeployError> {
        if build.cache && self.image_tag == CACHE_TAG {
            return Err(DeployError::Config(format!(
                "Image tag '{}' is reserved for the build cache",
                CACHE_TAG
            )));
        }

        info!(
            "Deploying {} ({}) to {} registry",
            self.name,
            self.resource_name("repo"),
            registry.registry_type()
        );

        let repository = registry
            .ensure_repository(&self.repository_name, &self.repository_options(build))
            .await
            .map_err(DeployError::provider)?;
        debug!("Repository ready: {:?}", repository);

        info!("Applying {}", self.resource_name("lifecycle"));
        registry
            .put_lifecycle_policy(&repository.name, &LifecyclePolicy::default())
            .await
            .map_err(DeployError::provider)?;

        let token = registry
            .authorization_token(&repository.registry_id)
            .await
            .map_err(|e| DeployError::Authentication(format!("{:#}", e)))?;
        let credentials = decode_authorization_token(&token, &repository.url)?;

        let request = self.build_request(&repository.url, build, build_date());
        info!("Applying {}: {}", self.resource_name("image"), request.image_name);
        let image_digest = builder
            .build_and_push(&request, &credentials)
            .await
            .map_err(DeployError::build)?;

        let image_ref = image_digest
            .clone()
            .unwrap_or_else(|| request.image_name.clone());

        info!("Deployed {}", image_ref);

        Ok(ImageManagementOutputs {
            repository_url: repository.url,
            repository_name: repository.name,
            image_uri: request.image_name,
            image_digest,
            image_ref,
        })
    }

    /// Tear down the repository and every image in it.
    ///
    /// Returns true if the repository existed.
    pub async fn destroy(&self, registry: &dyn RegistryProvider) -> Result<bool, DeployError> {
        info!("Destroying {}", self.resource_name("repo"));
        registry
            .delete_repository(&self.repository_name)
            .await
            .map_err(DeployError::provider)
    }
}
