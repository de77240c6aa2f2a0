//! Host configuration, read from `canopy.toml`.

use std::{
    collections::HashMap,
    io,
    net::IpAddr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    scan::{ScanError, ScanRules},
    sorting::SortConfig,
};

pub const CONFIG_FILE_NAME: &str = "canopy.toml";

pub const DEFAULT_LOG_CAPACITY: usize = 1000;
pub const DEFAULT_PORT: u16 = 34877;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case", deny_unknown_fields)]
pub struct CanopyConfig {
    /// Roots opened when the host starts. Relative paths are resolved against
    /// the directory holding the config file.
    pub roots: Vec<PathBuf>,

    /// How many changes each root keeps before clients have to fall back to a
    /// full snapshot.
    pub log_capacity: usize,

    /// Glob patterns matched against each path component.
    pub ignore: Vec<String>,

    /// Extra extensions treated as code, mapped to their language tag.
    pub code_extensions: HashMap<String, String>,

    pub sort: SortConfig,

    pub serve_address: Option<IpAddr>,

    pub serve_port: Option<u16>,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            ignore: vec![
                ".git".to_owned(),
                "node_modules".to_owned(),
                ".DS_Store".to_owned(),
            ],
            code_extensions: HashMap::new(),
            sort: SortConfig::default(),
            serve_address: None,
            serve_port: None,
        }
    }
}

impl CanopyConfig {
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            for root in &mut config.roots {
                if root.is_relative() {
                    *root = base.join(&*root);
                }
            }
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs_err::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&contents, path)
    }

    /// Loads `canopy.toml` from `directory` if there is one.
    pub fn load_from_dir(directory: &Path) -> Result<Option<Self>, ConfigError> {
        let path = directory.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }

        Self::load(&path).map(Some)
    }

    pub fn scan_rules(&self) -> Result<ScanRules, ConfigError> {
        Ok(ScanRules::new(&self.ignore, &self.code_extensions)?)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Invalid config file {}", .path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Scan {
        #[from]
        source: ScanError,
    },
}

#[cfg(test)]
mod test {
    use fs_err as fs;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::sorting::{Collation, SortKey};

    #[test]
    fn empty_file_gives_defaults() {
        let config = CanopyConfig::from_toml("", Path::new("/etc/canopy.toml")).unwrap();

        assert_eq!(config, CanopyConfig::default());
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn parses_every_field() {
        let config = CanopyConfig::from_toml(
            r#"
            roots = ["notes", "/abs/code"]
            log_capacity = 50
            ignore = ["target"]
            serve_address = "0.0.0.0"
            serve_port = 4000

            [code_extensions]
            zig = "zig"

            [sort]
            key = "modified"
            collation = "raw"
            "#,
            Path::new("/home/me/canopy.toml"),
        )
        .unwrap();

        assert_eq!(
            config.roots,
            vec![PathBuf::from("/home/me/notes"), PathBuf::from("/abs/code")]
        );
        assert_eq!(config.log_capacity, 50);
        assert_eq!(config.ignore, vec!["target".to_owned()]);
        assert_eq!(config.serve_port, Some(4000));
        assert_eq!(config.code_extensions["zig"], "zig");
        assert_eq!(
            config.sort,
            SortConfig {
                key: SortKey::Modified,
                collation: Collation::Raw,
                directories_first: true,
            }
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CanopyConfig::from_toml("colour = 3", Path::new("canopy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn load_from_dir_without_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(CanopyConfig::load_from_dir(dir.path()).unwrap().is_none());

        fs::write(dir.path().join(CONFIG_FILE_NAME), "log_capacity = 3").unwrap();
        let config = CanopyConfig::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(config.log_capacity, 3);
    }

    #[test]
    fn bad_ignore_pattern_fails_scan_rules() {
        let config = CanopyConfig {
            ignore: vec!["[".to_owned()],
            ..CanopyConfig::default()
        };

        assert!(matches!(config.scan_rules(), Err(ConfigError::Scan { .. })));
    }
}
