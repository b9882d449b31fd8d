// Docker/Dockerfile builds

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::registry::{docker_login, docker_push, docker_repo_digest};
use super::{repository_of, BuildRequest, ImageBuilder};
use crate::registry::{registry_host, RegistryCredentials};
use crate::settings::BuildSettings;

/// Builds images with the Docker or Podman CLI
pub struct DockerBuilder {
    container_cli: String,
    use_buildx: bool,
}

impl DockerBuilder {
    pub fn new(settings: &BuildSettings) -> Self {
        Self {
            container_cli: settings.container_cli.clone(),
            use_buildx: settings.use_buildx,
        }
    }

    /// Only buildx can import/export a registry cache and push during build
    fn buildx_for(&self, request: &BuildRequest) -> bool {
        self.use_buildx || request.cache_ref.is_some()
    }

    async fn check_cli(&self, buildx: bool) -> Result<()> {
        let cli_check = Command::new(&self.container_cli)
            .arg("--version")
            .output()
            .await;
        if cli_check.is_err() {
            bail!(
                "{} CLI not found. Please install Docker or Podman.",
                self.container_cli
            );
        }

        if buildx {
            let buildx_check = Command::new(&self.container_cli)
                .args(["buildx", "version"])
                .output()
                .await;
            if !matches!(buildx_check, Ok(ref out) if out.status.success()) {
                bail!(
                    "{} buildx not available. Install it or disable build.use_buildx and build.cache.",
                    self.container_cli
                );
            }
        }

        Ok(())
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        let mut cmd = Command::new(&self.container_cli);
        cmd.args(args);

        debug!("Executing command: {:?}", cmd);

        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to execute {} build", self.container_cli))?;

        if !status.success() {
            bail!("{} build failed with status: {}", self.container_cli, status);
        }
        Ok(())
    }

    async fn build_with_buildx(&self, request: &BuildRequest) -> Result<Option<String>> {
        let temp_dir = tempfile::tempdir().context("Failed to create temp directory")?;
        let metadata_file = temp_dir.path().join("metadata.json");

        info!(
            "Building image with {} buildx: {}",
            self.container_cli, request.image_name
        );
        self.run(&build_command_args(request, true, Some(&metadata_file)))
            .await?;

        if !request.push {
            return Ok(None);
        }

        let digest = read_metadata_digest(&metadata_file)?;
        Ok(Some(format!("{}@{}", repository_of(&request.image_name), digest)))
    }

    async fn build_with_docker(&self, request: &BuildRequest) -> Result<Option<String>> {
        info!(
            "Building image with {}: {}",
            self.container_cli, request.image_name
        );
        self.run(&build_command_args(request, false, None)).await?;

        if !request.push {
            return Ok(None);
        }

        // Regular docker build and podman build don't support --push
        docker_push(&self.container_cli, &request.image_name).await?;
        docker_repo_digest(&self.container_cli, &request.image_name)
            .await
            .map(Some)
    }
}

#[async_trait]
impl ImageBuilder for DockerBuilder {
    async fn build_and_push(
        &self,
        request: &BuildRequest,
        credentials: &RegistryCredentials,
    ) -> Result<Option<String>> {
        let buildx = self.buildx_for(request);
        self.check_cli(buildx).await?;

        // The cache import needs registry access even when the image isn't pushed
        if request.push || request.cache_ref.is_some() {
            docker_login(
                &self.container_cli,
                registry_host(&credentials.server),
                &credentials.username,
                &credentials.password,
            )
            .await?;
        }

        if buildx {
            self.build_with_buildx(request).await
        } else {
            self.build_with_docker(request).await
        }
    }
}

/// Arguments for `{cli} [buildx] build ...`
pub(crate) fn build_command_args(
    request: &BuildRequest,
    buildx: bool,
    metadata_file: Option<&Path>,
) -> Vec<String> {
    let mut args = Vec::new();
    if buildx {
        args.push("buildx".to_string());
    }
    args.push("build".to_string());

    args.push("--platform".to_string());
    args.push(request.platform.clone());

    args.push("--file".to_string());
    args.push(request.dockerfile.clone());

    args.push("-t".to_string());
    args.push(request.image_name.clone());

    for (key, value) in &request.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }

    if buildx {
        if let Some(cache_ref) = &request.cache_ref {
            args.push("--cache-from".to_string());
            args.push(format!("type=registry,ref={}", cache_ref));
            args.push("--cache-to".to_string());
            args.push(format!("type=registry,ref={},mode=max", cache_ref));
        }

        if let Some(path) = metadata_file {
            args.push("--metadata-file".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        // For buildx without push, --load gets the image into the local daemon
        args.push(if request.push { "--push" } else { "--load" }.to_string());
    }

    args.push(request.context.clone());
    args
}

/// Read the pushed manifest digest from a buildx metadata file
fn read_metadata_digest(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read build metadata {}", path.display()))?;
    let metadata: serde_json::Value =
        serde_json::from_str(&contents).context("Failed to parse build metadata")?;
    metadata
        .get("containerimage.digest")
        .and_then(|d| d.as_str())
        .map(String::from)
        .context("Build metadata contains no containerimage.digest")
}
