//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use es_domain::config::{Config, ConfigSeverity};
use es_domain::error::{Error, Result};

#[derive(Parser)]
#[command(name = "echoscribe", about = "Audio transcription and summarization service")]
pub struct Cli {
    /// Configuration file path. Falls back to `ES_CONFIG`, then
    /// `./echoscribe.toml`, then built-in defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the API server and pipeline workers (default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration file and report issues.
    Validate,
    /// Print the effective configuration as TOML.
    Show,
}

/// Load configuration. A missing file yields built-in defaults; a present
/// but unparseable file is an error.
pub fn load_config(cli_path: Option<&PathBuf>) -> Result<(Config, PathBuf)> {
    let path = cli_path
        .cloned()
        .or_else(|| std::env::var("ES_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./echoscribe.toml"));

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    Ok((config, path))
}

/// Print validation issues; returns false when any error-severity issue
/// exists.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: ok", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}

/// Print the effective configuration.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => println!("failed to render config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = PathBuf::from("/nonexistent/echoscribe.toml");
        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 3210);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = nope").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn valid_file_loads_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("es.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();
        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9999);
    }
}
