use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::sync::LazyLock;

/// Deployment configuration for one stack
///
/// Sources, lowest to highest precedence:
/// 1. `{config_dir}/default.{toml,yaml,yml}`
/// 2. `{config_dir}/{stack}.{toml,yaml,yml}`
/// 3. `{config_dir}/local.{toml,yaml,yml}` (not checked into git)
/// 4. `IMAGE__*` environment variables, e.g. `IMAGE__VERSION=1.2.3`
///
/// String values may reference environment variables as `${VAR}` or `${VAR:-default}`.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Image version, used as the image tag. Required.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub aws: AwsSettings,
    #[serde(default)]
    pub build: BuildSettings,
}

/// Application metadata the component is instantiated with
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Logical component name
    pub name: String,
    pub app_name: String,
    pub docker_context: String,
    pub dockerfile: String,
    /// Optional environment prefix for the repository name ("{env}/{app_name}")
    pub env: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "dmnd-client-image".to_string(),
            app_name: "client".to_string(),
            docker_context: "../../".to_string(),
            dockerfile: "../../Dockerfile".to_string(),
            env: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AwsSettings {
    /// AWS region (e.g., "eu-west-1"). Falls back to the default region chain.
    pub region: Option<String>,
    /// Optional: AWS access key ID (if not using IAM role or profile)
    pub access_key_id: Option<String>,
    /// Optional: AWS secret access key (if not using IAM role or profile)
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BuildSettings {
    /// Container CLI to use (docker or podman)
    pub container_cli: String,
    /// Build with `buildx` (implied when `cache` is enabled)
    pub use_buildx: bool,
    /// Target platform of the image
    pub platform: String,
    /// Import/export the build cache from the `:cache` tag of the repository
    pub cache: bool,
    /// Push the image after building
    pub push: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            container_cli: "docker".to_string(),
            use_buildx: false,
            platform: "linux/amd64".to_string(),
            cache: false,
            push: true,
        }
    }
}

impl Settings {
    /// Load settings for a stack from `IMAGE_CONFIG_DIR` (default: "config")
    pub fn new(stack: &str) -> Result<Self, ConfigError> {
        let config_dir = env::var("IMAGE_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load(&config_dir, stack)
    }

    /// Load settings for a stack from an explicit config directory
    pub fn load(config_dir: &str, stack: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, stack)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            .add_source(Environment::with_prefix("IMAGE").separator("__"))
            .build()?;

        let mut unused_fields = Vec::new();
        let mut settings: Settings = serde_ignored::deserialize(config, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field: {}", field);
        }

        settings.substitute_env_vars();
        settings.validate()?;

        Ok(settings)
    }

    /// The required image version
    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.version.as_deref().map_or(true, |v| v.trim().is_empty()) {
            return Err(ConfigError::Message(
                "Missing required configuration value 'version'. Set version in the stack config or IMAGE__VERSION".to_string(),
            ));
        }
        if self.build.container_cli.is_empty() {
            return Err(ConfigError::Message(
                "build.container_cli must not be empty".to_string(),
            ));
        }
        if self.build.platform.is_empty() {
            return Err(ConfigError::Message(
                "build.platform must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn substitute_env_vars(&mut self) {
        let sub = |value: &mut String| *value = substitute_env_vars_in_string(value);
        let sub_opt = |value: &mut Option<String>| {
            if let Some(v) = value.as_mut() {
                *v = substitute_env_vars_in_string(v);
            }
        };

        sub_opt(&mut self.version);
        sub(&mut self.app.name);
        sub(&mut self.app.app_name);
        sub(&mut self.app.docker_context);
        sub(&mut self.app.dockerfile);
        sub_opt(&mut self.app.env);
        sub_opt(&mut self.aws.region);
        sub_opt(&mut self.aws.access_key_id);
        sub_opt(&mut self.aws.secret_access_key);
        sub(&mut self.build.container_cli);
        sub(&mut self.build.platform);
    }
}

static ENV_VAR_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("valid regex")
});

/// Replace `${VAR_NAME}` or `${VAR_NAME:-default}` with environment variable values
fn substitute_env_vars_in_string(s: &str) -> String {
    if !s.contains("${") {
        return s.to_string();
    }

    ENV_VAR_REFERENCE.replace_all(s, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default_value = caps.get(2).map(|m| m.as_str());

        match env::var(var_name) {
            Ok(val) => val,
            Err(_) => default_value.unwrap_or("").to_string(),
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &std::path::Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_substitute_env_vars_in_string_basic() {
        env::set_var("SETTINGS_TEST_VAR", "test_value");
        let result = substitute_env_vars_in_string("${SETTINGS_TEST_VAR}");
        assert_eq!(result, "test_value");
        env::remove_var("SETTINGS_TEST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_in_string_with_default() {
        env::remove_var("SETTINGS_MISSING_VAR");
        let result = substitute_env_vars_in_string("${SETTINGS_MISSING_VAR:-default_value}");
        assert_eq!(result, "default_value");
    }

    #[test]
    fn test_substitute_env_vars_in_string_no_substitution() {
        assert_eq!(substitute_env_vars_in_string("plain_value"), "plain_value");
    }

    #[test]
    fn test_load_stack_overrides_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            temp_dir.path(),
            "default.toml",
            r#"
[aws]
region = "eu-west-1"
"#,
        );
        write(
            temp_dir.path(),
            "prod.toml",
            r#"
version = "1.2.3"

[app]
env = "prod"
app_name = "dmnd-client"
"#,
        );

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "prod").unwrap();
        assert_eq!(settings.version(), "1.2.3");
        assert_eq!(settings.app.env.as_deref(), Some("prod"));
        assert_eq!(settings.app.app_name, "dmnd-client");
        // Untouched app fields keep their defaults
        assert_eq!(settings.app.dockerfile, "../../Dockerfile");
        assert_eq!(settings.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.build, BuildSettings::default());
    }

    #[test]
    fn test_load_fails_without_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            temp_dir.path(),
            "default.toml",
            r#"
[app]
app_name = "client"
"#,
        );

        let err = Settings::load(temp_dir.path().to_str().unwrap(), "missing-version-stack")
            .unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_load_fails_with_empty_version() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(temp_dir.path(), "empty.toml", "version = \"\"\n");

        assert!(Settings::load(temp_dir.path().to_str().unwrap(), "empty").is_err());
    }

    #[test]
    fn test_load_tolerates_unknown_fields() {
        let temp_dir = tempfile::tempdir().unwrap();
        write(
            temp_dir.path(),
            "extra.toml",
            r#"
version = "2.0.0"
unknown_field = "test"

[build]
cache = true
another_unknown = 123
"#,
        );

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "extra").unwrap();
        assert_eq!(settings.version(), "2.0.0");
        assert!(settings.build.cache);
    }
}
