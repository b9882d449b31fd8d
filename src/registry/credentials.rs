use base64::Engine;
use std::fmt;

use crate::error::DeployError;

/// Credentials used to push to a registry
///
/// Derived at deploy time and never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    /// Registry address the credentials are valid for (the repository URL)
    pub server: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode an ECR authorization token into a username/password pair
///
/// The token is base64 of "username:password" (the username is "AWS" for ECR).
/// Only the first ':' separates the two halves.
pub fn decode_authorization_token(
    token: &str,
    server: &str,
) -> Result<RegistryCredentials, DeployError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .map_err(|e| DeployError::Authentication(format!("token is not valid base64: {}", e)))?;

    let decoded = String::from_utf8(decoded)
        .map_err(|_| DeployError::Authentication("token is not valid UTF-8".to_string()))?;

    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        DeployError::Authentication("token is not in 'username:password' format".to_string())
    })?;

    if username.is_empty() || password.is_empty() {
        return Err(DeployError::Authentication(
            "token has an empty username or password".to_string(),
        ));
    }

    Ok(RegistryCredentials {
        server: server.to_string(),
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Host part of a repository URL, as used by `docker login`
///
/// "123.dkr.ecr.eu-west-1.amazonaws.com/prod/app" -> "123.dkr.ecr.eu-west-1.amazonaws.com"
pub fn registry_host(repository_url: &str) -> &str {
    let without_scheme = repository_url
        .strip_prefix("https://")
        .or_else(|| repository_url.strip_prefix("http://"))
        .unwrap_or(repository_url);
    without_scheme
        .split_once('/')
        .map(|(host, _)| host)
        .unwrap_or(without_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    const SERVER: &str = "123456789012.dkr.ecr.eu-west-1.amazonaws.com/client";

    #[test]
    fn test_decode_valid_token() {
        let creds = decode_authorization_token(&encode("AWS:s3cr3t"), SERVER).unwrap();
        assert_eq!(creds.username, "AWS");
        assert_eq!(creds.password, "s3cr3t");
        assert_eq!(creds.server, SERVER);
    }

    #[test]
    fn test_decode_password_containing_colon() {
        let creds = decode_authorization_token(&encode("AWS:pa:ss"), SERVER).unwrap();
        assert_eq!(creds.password, "pa:ss");
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        let err = decode_authorization_token("not base64!!", SERVER).unwrap_err();
        assert!(matches!(err, DeployError::Authentication(_)));
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        let err = decode_authorization_token(&encode("AWSsecret"), SERVER).unwrap_err();
        assert!(matches!(err, DeployError::Authentication(_)));
    }

    #[test]
    fn test_decode_rejects_empty_password() {
        let err = decode_authorization_token(&encode("AWS:"), SERVER).unwrap_err();
        assert!(matches!(err, DeployError::Authentication(_)));
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = decode_authorization_token(&encode("AWS:s3cr3t"), SERVER).unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(
            registry_host("123456789012.dkr.ecr.eu-west-1.amazonaws.com/prod/app"),
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com"
        );
        assert_eq!(registry_host("https://registry.local:5000/app"), "registry.local:5000");
        assert_eq!(registry_host("registry.local"), "registry.local");
    }
}
