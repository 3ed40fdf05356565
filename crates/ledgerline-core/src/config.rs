//! Engine configuration
//!
//! Config is loaded with a three-layer resolution:
//! 1. Embedded defaults (compiled into binary)
//! 2. Override file in the config dir (~/.config/ledgerline/config.toml)
//! 3. `LEDGERLINE_*` environment variables

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/ledgerline.toml");

/// Default page size for full-collection listing calls
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Which backend implementation to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// REST API over HTTP
    Http,
    /// In-process store
    Memory,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" | "rest" => Ok(Self::Http),
            "memory" | "mem" => Ok(Self::Memory),
            _ => Err(format!("Unknown backend kind: {}", s)),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend_kind: BackendKind,
    /// Base URL of the REST API
    pub backend_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Page size used for full-collection listings
    pub page_size: usize,
    /// Directory for export artifacts (None = platform default)
    pub export_dir: Option<PathBuf>,
    /// Gzip artifacts when writing them
    pub compress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend_kind: BackendKind::Http,
            backend_url: "http://127.0.0.1:8000".to_string(),
            timeout: Duration::from_secs(60),
            page_size: DEFAULT_PAGE_SIZE,
            export_dir: None,
            compress: false,
        }
    }
}

impl EngineConfig {
    /// Load from the default override path and the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path().as_deref())
    }

    /// Load from an explicit override path and the process environment
    pub fn load_from(override_path: Option<&Path>) -> Result<Self> {
        let mut config = parse_config(DEFAULT_CONFIG)?;
        if let Some(path) = override_path {
            if path.exists() {
                let content = fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                apply_raw(&mut config, parse_raw(&content)?)?;
                tracing::debug!(path = %path.display(), "Loaded config override");
            }
        }
        apply_env(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Directory artifacts are written to
    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(default_export_dir)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ledgerline").join("config.toml"))
}

/// Default export directory
pub fn default_export_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ledgerline")
        .join("exports")
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    backend: Option<RawBackend>,
    export: Option<RawExport>,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    kind: Option<String>,
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawExport {
    page_size: Option<usize>,
    dir: Option<PathBuf>,
    compress: Option<bool>,
}

fn parse_raw(content: &str) -> Result<RawConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))
}

/// Parse config from TOML content on top of the built-in defaults
fn parse_config(content: &str) -> Result<EngineConfig> {
    let mut config = EngineConfig::default();
    apply_raw(&mut config, parse_raw(content)?)?;
    Ok(config)
}

fn apply_raw(config: &mut EngineConfig, raw: RawConfig) -> Result<()> {
    if let Some(backend) = raw.backend {
        if let Some(kind) = backend.kind {
            config.backend_kind = kind.parse().map_err(Error::Config)?;
        }
        if let Some(url) = backend.url {
            config.backend_url = url;
        }
        if let Some(timeout) = backend.timeout_secs {
            config.timeout = Duration::from_secs(timeout);
        }
    }

    if let Some(export) = raw.export {
        if let Some(page_size) = export.page_size {
            config.page_size = validate_page_size(page_size)?;
        }
        if let Some(dir) = export.dir {
            config.export_dir = Some(dir);
        }
        if let Some(compress) = export.compress {
            config.compress = compress;
        }
    }

    Ok(())
}

fn apply_env(config: &mut EngineConfig, var: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(url) = var("LEDGERLINE_BACKEND_URL") {
        config.backend_url = url;
    }
    if let Some(kind) = var("LEDGERLINE_BACKEND") {
        config.backend_kind = kind.parse().map_err(Error::Config)?;
    }
    if let Some(size) = var("LEDGERLINE_PAGE_SIZE") {
        let size = size
            .parse()
            .map_err(|_| Error::Config(format!("LEDGERLINE_PAGE_SIZE is not a number: {}", size)))?;
        config.page_size = validate_page_size(size)?;
    }
    if let Some(secs) = var("LEDGERLINE_TIMEOUT_SECS") {
        let secs = secs.parse().map_err(|_| {
            Error::Config(format!("LEDGERLINE_TIMEOUT_SECS is not a number: {}", secs))
        })?;
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(dir) = var("LEDGERLINE_EXPORT_DIR") {
        config.export_dir = Some(PathBuf::from(dir));
    }
    Ok(())
}

fn validate_page_size(size: usize) -> Result<usize> {
    if size == 0 {
        return Err(Error::Config("page_size must be greater than zero".into()));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_default_config() {
        let config = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.backend_kind, BackendKind::Http);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert!(!config.compress);
    }

    #[test]
    fn test_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[backend]\nkind = \"memory\"\n\n[export]\npage_size = 500\ncompress = true\n",
        )
        .unwrap();

        let config = EngineConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.backend_kind, BackendKind::Memory);
        assert_eq!(config.page_size, 500);
        assert!(config.compress);
    }

    #[test]
    fn test_missing_override_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LEDGERLINE_BACKEND_URL", "http://finance.local"),
            ("LEDGERLINE_PAGE_SIZE", "250"),
            ("LEDGERLINE_EXPORT_DIR", "/tmp/exports"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        apply_env(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.backend_url, "http://finance.local");
        assert_eq!(config.page_size, 250);
        assert_eq!(config.export_dir(), PathBuf::from("/tmp/exports"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = EngineConfig::default();
        let err = apply_env(&mut config, |k| {
            (k == "LEDGERLINE_PAGE_SIZE").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(parse_config("[backend]\nkind = \"carrier-pigeon\"\n").is_err());
        assert!(parse_config("not toml [").is_err());
    }
}
