// Command handlers

use anyhow::{Context, Result};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Attribute, Cell, Table};
use tracing::info;

use crate::build::DockerBuilder;
use crate::component::{DeployPlan, ImageManagement, ImageManagementArgs, ImageManagementOutputs};
use crate::ecr::EcrRegistry;
use crate::error::DeployError;
use crate::settings::Settings;

/// Load the stack settings. Configuration errors surface here, before any
/// resource is touched.
fn load_settings(stack: &str) -> Result<Settings> {
    Settings::new(stack)
        .map_err(|e| DeployError::Config(e.to_string()))
        .with_context(|| format!("Failed to load configuration for stack '{}'", stack))
}

/// Instantiate the component from the application metadata, tagged with the
/// configured version
pub(crate) fn component_from_settings(settings: &Settings) -> Result<ImageManagement, DeployError> {
    ImageManagement::new(
        settings.app.name.clone(),
        ImageManagementArgs {
            app_name: settings.app.app_name.clone(),
            docker_context: settings.app.docker_context.clone(),
            dockerfile: settings.app.dockerfile.clone(),
            image_tag: Some(settings.version().to_string()),
            env: settings.app.env.clone(),
        },
    )
}

fn kv_table(rows: Vec<(&str, String)>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("KEY").add_attribute(Attribute::Bold),
            Cell::new("VALUE").add_attribute(Attribute::Bold),
        ]);
    for (key, value) in rows {
        table.add_row(vec![Cell::new(key), Cell::new(value)]);
    }
    table
}

fn print_plan(plan: &DeployPlan, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    let mut rows = vec![
        ("component", plan.component.clone()),
        ("repository", plan.repository_resource.clone()),
        ("repository name", plan.repository_name.clone()),
        ("lifecycle policy", plan.lifecycle_resource.clone()),
        ("policy", plan.lifecycle_policy.to_json()?),
        ("image", plan.image_resource.clone()),
        ("image name", plan.build.image_name.clone()),
        ("context", plan.build.context.clone()),
        ("dockerfile", plan.build.dockerfile.clone()),
        ("platform", plan.build.platform.clone()),
        ("push", plan.build.push.to_string()),
    ];
    if let Some(cache_ref) = &plan.build.cache_ref {
        rows.push(("cache", cache_ref.clone()));
    }
    for (key, value) in &plan.build.build_args {
        rows.push(("build arg", format!("{}={}", key, value)));
    }

    println!("{}", kv_table(rows));
    Ok(())
}

fn print_outputs(outputs: &ImageManagementOutputs, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outputs)?);
        return Ok(());
    }

    println!(
        "{}",
        kv_table(vec![
            ("repositoryUrl", outputs.repository_url.clone()),
            ("repositoryName", outputs.repository_name.clone()),
            ("imageUri", outputs.image_uri.clone()),
            (
                "imageDigest",
                outputs.image_digest.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("imageRef", outputs.image_ref.clone()),
        ])
    );
    Ok(())
}

pub(crate) fn handle_preview(stack: &str, json: bool) -> Result<()> {
    let settings = load_settings(stack)?;
    let component = component_from_settings(&settings)?;
    print_plan(&component.plan(&settings.build), json)
}

pub(crate) async fn handle_up(stack: &str, json: bool) -> Result<()> {
    let settings = load_settings(stack)?;
    let component = component_from_settings(&settings)?;

    info!(
        "Deploying stack '{}': {} -> {}:{}",
        stack,
        component.name(),
        component.repository_name(),
        component.image_tag()
    );

    let registry = EcrRegistry::new(&settings.aws).await?;
    let builder = DockerBuilder::new(&settings.build);

    let outputs = component
        .deploy(&registry, &builder, &settings.build)
        .await
        .with_context(|| format!("Deployment of '{}' failed", component.name()))?;

    print_outputs(&outputs, json)
}

pub(crate) async fn handle_destroy(stack: &str) -> Result<()> {
    let settings = load_settings(stack)?;
    let component = component_from_settings(&settings)?;
    let registry = EcrRegistry::new(&settings.aws).await?;

    if component.destroy(&registry).await? {
        println!("Deleted repository {}", component.repository_name());
    } else {
        println!(
            "Repository {} does not exist, nothing to delete",
            component.repository_name()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_uses_version_as_tag() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("ci.toml"), "version = \"1.2.3\"\n").unwrap();

        let settings = Settings::load(temp_dir.path().to_str().unwrap(), "ci").unwrap();
        let component = component_from_settings(&settings).unwrap();

        assert_eq!(component.name(), "dmnd-client-image");
        assert_eq!(component.repository_name(), "client");
        assert_eq!(component.image_tag(), "1.2.3");
        let plan = component.plan(&settings.build);
        assert_eq!(plan.build.context, "../../");
        assert_eq!(plan.build.dockerfile, "../../Dockerfile");
    }

    #[test]
    fn test_missing_version_fails_before_any_resource() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::env::set_var("IMAGE_CONFIG_DIR", temp_dir.path());
        let err = load_settings("no-such-stack").unwrap_err();
        std::env::remove_var("IMAGE_CONFIG_DIR");

        assert!(format!("{:#}", err).contains("version"));
    }
}
