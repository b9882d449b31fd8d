use thiserror::Error;

/// Errors that abort a deployment run.
///
/// Nothing is retried locally. Each variant names the stage that failed so the
/// operator can tell which resources were already applied.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry authentication failed: {0}")]
    Authentication(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Registry provider error: {0}")]
    Provider(String),
}

impl DeployError {
    /// Wrap an error from a registry call, keeping its full chain in the message
    pub fn provider(err: anyhow::Error) -> Self {
        Self::Provider(format!("{:#}", err))
    }

    /// Wrap an error from the build engine, keeping its full chain in the message
    pub fn build(err: anyhow::Error) -> Self {
        Self::Build(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_keeps_context_chain() {
        let err = anyhow::anyhow!("AccessDenied").context("Failed to create ECR repository 'client'");
        let err = DeployError::provider(err);
        assert_eq!(
            err.to_string(),
            "Registry provider error: Failed to create ECR repository 'client': AccessDenied"
        );
    }

    #[test]
    fn test_authentication_error_message() {
        let err = DeployError::Authentication("token is not valid base64".to_string());
        assert!(err.to_string().starts_with("Registry authentication failed"));
    }
}
