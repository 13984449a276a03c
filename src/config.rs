//! Render settings loaded from `config.toml`.
//!
//! ```toml
//! left_delim = "[["
//! right_delim = "]]"
//! missing_key = "error"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::MissingKey;
use crate::template::Template;

/// Settings applied to templates before parsing. Unset fields keep the
/// template defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub left_delim: Option<String>,
    pub right_delim: Option<String>,
    pub missing_key: Option<MissingKey>,
}

impl Config {
    /// `<config dir>/sqltemplate/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sqltemplate").join("config.toml"))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load the file at [`default_path`](Self::default_path), or the empty
    /// config when there is none.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Fields set in `other` take precedence.
    pub fn merge(self, other: Config) -> Config {
        Config {
            left_delim: other.left_delim.or(self.left_delim),
            right_delim: other.right_delim.or(self.right_delim),
            missing_key: other.missing_key.or(self.missing_key),
        }
    }

    /// Apply these settings to `template`.
    pub fn apply(&self, template: Template) -> Template {
        let mut template = template;
        if self.left_delim.is_some() || self.right_delim.is_some() {
            template = template.delims(
                self.left_delim.as_deref().unwrap_or(""),
                self.right_delim.as_deref().unwrap_or(""),
            );
        }
        match self.missing_key {
            Some(policy) => template.missing_key_policy(policy),
            None => template,
        }
    }
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_toml(s)
    }
}
