//! Config command - show or edit configuration

use crate::calib::CalibrationType;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{SlitredError, SlitredResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;
use tokio::fs;

const VALID_KEYS: &[&str] = &[
    "general.verbose",
    "general.log_format",
    "general.qa_log",
    "reduce.reuse_master",
    "reduce.prep_only",
    "reduce.stale_fallback",
    "mosaic.ndet",
    "output.directory",
    "propagation.tags.<type>",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> SlitredResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            if local {
                set_local_value(&key, &value).await?
            } else {
                set_value(manager, config, &key, &value).await?
            }
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> SlitredResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> SlitredResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> SlitredResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "verbose"] => config.general.verbose = parse_bool(value)?,
        ["general", "log_format"] => config.general.log_format = parse_log_format(value)?,
        ["general", "qa_log"] => config.general.qa_log = parse_bool(value)?,

        ["reduce", "reuse_master"] => config.reduce.reuse_master = parse_bool(value)?,
        ["reduce", "prep_only"] => config.reduce.prep_only = parse_bool(value)?,
        ["reduce", "stale_fallback"] => config.reduce.stale_fallback = parse_bool(value)?,

        ["mosaic", "ndet"] => config.mosaic.ndet = parse_usize(value)?,
        ["output", "directory"] => config.output.directory = PathBuf::from(value),

        ["propagation", "tags", kind] => {
            validate_tag(kind, value)?;
            config
                .propagation
                .tags
                .insert((*kind).to_string(), value.to_string());
        }

        _ => {
            ui::step_error_detail(&ctx, "Unknown config key", key);
            ui::remark(&ctx, "Valid keys:");
            print_valid_keys();
            return Ok(());
        }
    }

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));
    Ok(())
}

async fn set_local_value(key: &str, value: &str) -> SlitredResult<()> {
    let ctx = UiContext::detect();

    let cwd =
        std::env::current_dir().map_err(|e| SlitredError::io("getting current directory", e))?;
    let local_path = cwd.join(LOCAL_CONFIG_NAME);

    validate_config_key(key, value)?;

    // Only the keys the user has explicitly set are written back
    let mut doc: toml::Value = if local_path.exists() {
        let content = fs::read_to_string(&local_path)
            .await
            .map_err(|e| SlitredError::io(format!("reading {}", local_path.display()), e))?;
        content
            .parse()
            .map_err(|e: toml::de::Error| SlitredError::ConfigInvalid {
                path: local_path.clone(),
                reason: e.to_string(),
            })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut doc, key, value)?;

    let content = toml::to_string_pretty(&doc)?;
    fs::write(&local_path, content)
        .await
        .map_err(|e| SlitredError::io(format!("writing {}", local_path.display()), e))?;

    ui::step_ok(
        &ctx,
        &format!("Set {} = {} in {}", key, value, local_path.display()),
    );
    Ok(())
}

/// Validate that a config key is one we recognise and its value parses.
fn validate_config_key(key: &str, value: &str) -> SlitredResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "verbose" | "qa_log"]
        | ["reduce", "reuse_master" | "prep_only" | "stale_fallback"] => {
            parse_bool(value).map(|_| ())
        }
        ["general", "log_format"] => parse_log_format(value).map(|_| ()),
        ["mosaic", "ndet"] => parse_usize(value).map(|_| ()),
        ["output", "directory"] => Ok(()),
        ["propagation", "tags", kind] => validate_tag(kind, value),
        _ => Err(SlitredError::User(format!("Unknown config key: {}", key))),
    }
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed.
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> SlitredResult<()> {
    let parts: Vec<&str> = key.split('.').collect();
    let Some((leaf, parents)) = parts.split_last() else {
        return Err(SlitredError::User("Empty config key".to_string()));
    };

    let mut current = doc;
    for &part in parents {
        current = current
            .as_table_mut()
            .ok_or_else(|| SlitredError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }

    let table = current
        .as_table_mut()
        .ok_or_else(|| SlitredError::User(format!("Expected table for key: {}", key)))?;

    let toml_value = if let Ok(b) = value.parse::<bool>() {
        toml::Value::Boolean(b)
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    };

    table.insert((*leaf).to_string(), toml_value);
    Ok(())
}

fn validate_tag(kind: &str, value: &str) -> SlitredResult<()> {
    kind.parse::<CalibrationType>().map_err(SlitredError::User)?;
    value.parse::<CalibrationType>().map_err(SlitredError::User)?;
    Ok(())
}

fn parse_bool(value: &str) -> SlitredResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SlitredError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_usize(value: &str) -> SlitredResult<usize> {
    value
        .parse()
        .map_err(|_| SlitredError::User(format!("Invalid number: {}", value)))
}

fn parse_log_format(value: &str) -> SlitredResult<String> {
    match value {
        "text" | "json" => Ok(value.to_string()),
        _ => Err(SlitredError::User(format!(
            "Invalid log format: {}. Use text or json",
            value
        ))),
    }
}

fn print_valid_keys() {
    for key in VALID_KEYS {
        eprintln!("  {}", key);
    }
}
