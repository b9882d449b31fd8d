// Container registry operations (push, login and digest lookup)

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::repository_of;

/// Push image to container registry
pub(crate) async fn docker_push(container_cli: &str, image_tag: &str) -> Result<()> {
    info!("Pushing image to registry: {}", image_tag);

    let mut cmd = Command::new(container_cli);
    cmd.arg("push").arg(image_tag);

    debug!("Executing command: {:?}", cmd);

    let status = cmd
        .status()
        .await
        .with_context(|| format!("Failed to execute {} push", container_cli))?;

    if !status.success() {
        bail!("{} push failed with status: {}", container_cli, status);
    }

    Ok(())
}

/// Login to container registry, passing the password on stdin
pub(crate) async fn docker_login(
    container_cli: &str,
    registry: &str,
    username: &str,
    password: &str,
) -> Result<()> {
    debug!(
        "Executing: {} login {} --username {} --password-stdin",
        container_cli, registry, username
    );

    let mut child = Command::new(container_cli)
        .arg("login")
        .arg(registry)
        .arg("--username")
        .arg(username)
        .arg("--password-stdin")
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute {} login", container_cli))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(password.as_bytes())
            .await
            .with_context(|| format!("Failed to pass password to {} login", container_cli))?;
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for {} login", container_cli))?;

    if !status.success() {
        bail!("{} login failed with status: {}", container_cli, status);
    }

    Ok(())
}

/// Pick the repo digest belonging to the repository of `image_tag` out of
/// `inspect` output (one "repo@sha256:..." per line). A locally cached image
/// can carry digests of other repositories it was pushed to.
pub(crate) fn select_repo_digest(inspect_output: &str, image_tag: &str) -> Option<String> {
    let prefix = format!("{}@", repository_of(image_tag));
    inspect_output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(&prefix))
        .map(str::to_string)
}

/// Look up the registry digest reference ("repo@sha256:...") of a pushed image
pub(crate) async fn docker_repo_digest(container_cli: &str, image_tag: &str) -> Result<String> {
    let output = Command::new(container_cli)
        .arg("inspect")
        .arg("--format")
        .arg("{{range .RepoDigests}}{{println .}}{{end}}")
        .arg(image_tag)
        .output()
        .await
        .with_context(|| format!("Failed to execute {} inspect", container_cli))?;

    if !output.status.success() {
        bail!(
            "{} inspect failed for {}: {}",
            container_cli,
            image_tag,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match select_repo_digest(&stdout, image_tag) {
        Some(digest) => Ok(digest),
        None => bail!(
            "{} inspect returned no repo digest for {} (got: {})",
            container_cli,
            image_tag,
            stdout.trim()
        ),
    }
}
