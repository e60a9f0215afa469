//! core::config
//!
//! Where cache settings come from and how they are written back.
//!
//! # Locations
//!
//! Searched in order, first hit wins:
//! 1. `$STRATA_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/strata/config.toml`
//! 3. `~/.strata/config.toml` (canonical write location)
//!
//! A missing file is not an error; defaults are used.
//!
//! # Example
//!
//! ```no_run
//! use strata::core::config::Config;
//!
//! let result = Config::load().unwrap();
//! for warning in &result.warnings {
//!     eprintln!("{}: {}", warning.path.display(), warning.message);
//! }
//! println!("fallback tcps: {}", result.config.fallback_tcps);
//! ```

pub mod schema;

pub use schema::CacheConfig;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where the config lives when nothing else is configured.
const HOME_CONFIG: &str = ".strata/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("{}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("cannot write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("no home directory to place the config in")]
    NoHomeDir,
}

/// A config file that was found but not used.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub path: PathBuf,
}

/// The loaded settings plus anything worth telling the user about them.
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: CacheConfig,
    /// `None` when defaults were used.
    pub loaded_from: Option<PathBuf>,
    pub warnings: Vec<ConfigWarning>,
}

/// Entry points for reading and writing [`CacheConfig`] files.
pub struct Config;

impl Config {
    /// Load the first config file found in the search order.
    ///
    /// # Errors
    ///
    /// Fails only for a file that exists and cannot be read, parsed or
    /// validated.
    pub fn load() -> Result<ConfigLoadResult, ConfigError> {
        let mut found = Self::search_order().into_iter().filter(|p| p.is_file());
        let Some(path) = found.next() else {
            return Ok(ConfigLoadResult {
                config: CacheConfig::default(),
                loaded_from: None,
                warnings: Vec::new(),
            });
        };
        let warnings = found
            .map(|shadowed| ConfigWarning {
                message: format!("ignored; shadowed by '{}'", path.display()),
                path: shadowed,
            })
            .collect();

        Ok(ConfigLoadResult {
            config: Self::load_from(&path)?,
            loaded_from: Some(path),
            warnings,
        })
    }

    /// Read, parse and validate one config file.
    pub fn load_from(path: &Path) -> Result<CacheConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CacheConfig = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn search_order() -> Vec<PathBuf> {
        let explicit = std::env::var_os("STRATA_CONFIG").map(PathBuf::from);
        let xdg = std::env::var_os("XDG_CONFIG_HOME").map(|dir| PathBuf::from(dir).join("strata/config.toml"));
        let home = dirs::home_dir().map(|dir| dir.join(HOME_CONFIG));
        [explicit, xdg, home].into_iter().flatten().collect()
    }

    /// `~/.strata/config.toml`, where [`Config::write`] puts new files.
    pub fn global_config_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|dir| dir.join(HOME_CONFIG))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// Validate `config` and write it to `path` through a sibling temp file.
    pub fn write(path: &Path, config: &CacheConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let text = toml::to_string_pretty(config).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let staged = path.with_extension("toml.tmp");

        let write_err = |at: &Path| {
            let at = at.to_path_buf();
            move |source| ConfigError::Write { path: at, source }
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(write_err(dir))?;
        }
        let mut file = fs::File::create(&staged).map_err(write_err(&staged))?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(write_err(&staged))?;
        fs::rename(&staged, path).map_err(write_err(path))
    }
}
