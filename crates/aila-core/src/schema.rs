//! JSON schema and annotated example configuration.
//!
//! Editors that understand `"$schema"` in TOML (taplo, Even Better TOML) use
//! the schema to validate `config.toml` and complete keys.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use schemars::Schema;
use schemars::generate::SchemaSettings;
use serde_json::json;

use crate::config::AppConfig;
use crate::paths::CONFIG_FILE_NAME;

/// File name of the generated schema.
pub const SCHEMA_FILENAME: &str = "config.schema.json";

/// Where published schemas live, one directory per project.
const SCHEMA_BASE_URL: &str = "https://raw.githubusercontent.com/aila-dev/schemas/main";

/// Draft-07 JSON schema of [`AppConfig`].
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn generate_schema(project_name: &str, repo_url: &str) -> Result<String> {
    // draft-07 is the newest draft taplo understands
    let mut schema: Schema = SchemaSettings::draft07()
        .into_generator()
        .into_root_schema_for::<AppConfig>();

    for (key, value) in [
        ("$id", format!("{repo_url}/schemas/{SCHEMA_FILENAME}")),
        ("title", format!("{project_name} configuration")),
        (
            "description",
            format!("Portal login, language model and schedule settings for {project_name}"),
        ),
    ] {
        schema.insert(key.to_string(), json!(value));
    }

    // `$schema` is skipped on the struct but editors still write it
    if let Some(props) = schema.get_mut("properties").and_then(|p| p.as_object_mut()) {
        props.insert(
            "$schema".to_string(),
            json!({ "type": "string", "description": "JSON Schema reference for editor support" }),
        );
    }

    serde_json::to_string_pretty(&schema).context("serializing JSON schema")
}

/// The default configuration as TOML, headed by a `$schema` reference and a
/// note on environment overrides.
///
/// # Errors
///
/// Returns an error if TOML serialization fails.
pub fn generate_example_config(project_name: &str) -> Result<String> {
    let body = toml::to_string_pretty(&AppConfig::default())
        .context("serializing default config to TOML")?;
    let env = project_name.to_uppercase();

    let mut output = String::new();
    let _ = writeln!(
        output,
        "\"$schema\" = \"{SCHEMA_BASE_URL}/{project_name}/{SCHEMA_FILENAME}\""
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "# Configuration for {project_name}.");
    let _ = writeln!(
        output,
        "# Copy to $XDG_CONFIG_HOME/{project_name}/{CONFIG_FILE_NAME}. Any key can be"
    );
    let _ = writeln!(
        output,
        "# overridden from the environment, e.g. {env}__CREDENTIALS__PASSWORD."
    );
    let _ = writeln!(output);
    output.push_str(&body);
    Ok(output)
}

/// Write the schema and the example config into `output_dir` and return
/// their paths.
///
/// # Errors
///
/// Returns an error if directory creation or file writing fails.
pub fn write_generated_files(
    output_dir: &Path,
    project_name: &str,
    repo_url: &str,
) -> Result<[PathBuf; 2]> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory {}", output_dir.display()))?;

    let schema_path = output_dir.join(SCHEMA_FILENAME);
    let config_path = output_dir.join(CONFIG_FILE_NAME);
    for (path, contents) in [
        (&schema_path, generate_schema(project_name, repo_url)?),
        (&config_path, generate_example_config(project_name)?),
    ] {
        fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok([schema_path, config_path])
}
