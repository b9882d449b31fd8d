// Build module - container image build and push
//
// The component describes what to build in a `BuildRequest`; an `ImageBuilder`
// turns it into an image in the registry. `DockerBuilder` drives the Docker or
// Podman CLI (with or without buildx).

mod docker;
mod registry;

pub use docker::DockerBuilder;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::registry::RegistryCredentials;

/// Tag of the registry cache image, next to the application tags
pub const CACHE_TAG: &str = "cache";

/// Everything the build engine needs to build and push one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    /// Fully qualified image name, "{repository_url}:{tag}"
    pub image_name: String,
    /// Build context directory
    pub context: String,
    /// Path of the Dockerfile
    pub dockerfile: String,
    /// Target platform, e.g. "linux/amd64"
    pub platform: String,
    /// `--build-arg` values
    pub build_args: BTreeMap<String, String>,
    /// Registry cache reference, "{repository_url}:cache"
    pub cache_ref: Option<String>,
    pub push: bool,
}

/// Builds an image and pushes it to a registry
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the image and, if requested, push it using `credentials`.
    ///
    /// Returns the registry digest reference ("repo@sha256:...") when the image
    /// was pushed.
    async fn build_and_push(
        &self,
        request: &BuildRequest,
        credentials: &RegistryCredentials,
    ) -> Result<Option<String>>;
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision,
/// e.g. "2026-10-18T12:00:00.000Z"
pub fn build_date() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Strip the tag from an image name: "host:5000/app:1.0" -> "host:5000/app"
pub(crate) fn repository_of(image_name: &str) -> &str {
    match image_name.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => image_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_date_format() {
        let date = build_date();
        assert!(date.ends_with('Z'));
        // 2026-10-18T12:00:00.000Z
        assert_eq!(date.len(), 24);
        assert!(chrono::DateTime::parse_from_rfc3339(&date).is_ok());
    }

    #[test]
    fn test_repository_of() {
        assert_eq!(
            repository_of("123.dkr.ecr.eu-west-1.amazonaws.com/client:1.2.3"),
            "123.dkr.ecr.eu-west-1.amazonaws.com/client"
        );
        assert_eq!(repository_of("registry:5000/app:latest"), "registry:5000/app");
        assert_eq!(repository_of("registry:5000/app"), "registry:5000/app");
    }
}
