// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration.
//!
//! Built from defaults, an optional TOML file, then the environment:
//!
//! | variable | effect |
//! |---|---|
//! | `KEEL_LIB` | directories appended to the load path (platform list separator) |
//! | `KEEL_GEMS_ROOT` | install root appended after them |
//! | `KEEL_REQUIRE` | comma-separated names required at install time |

use serde::Deserialize;
use std::ffi::OsString;
use std::path::Path;

use crate::error::{RequireError, Result};

/// Path-list variable supplying initial load path entries.
pub const LIB_PATH_ENV: &str = "KEEL_LIB";
/// Install-root variable appended to the load path.
pub const GEMS_ROOT_ENV: &str = "KEEL_GEMS_ROOT";
/// Comma-separated names to require eagerly.
pub const PRELOAD_ENV: &str = "KEEL_REQUIRE";
/// Default prefix of native extension entry symbols.
pub const DEFAULT_SYMBOL_PREFIX: &str = "mrb";

/// Configuration for the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Initial load path entries, in order
    pub search_path: Vec<String>,
    /// Install root, appended after `search_path`
    pub gems_root: Option<String>,
    /// Names required at install time, in order
    pub preload: Vec<String>,
    /// Prefix of `<prefix>_<stem>_gem_init` / `_gem_final`
    pub symbol_prefix: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_path: Vec::new(),
            gems_root: option_env!("KEEL_GEMS_ROOT").map(str::to_string),
            preload: Vec::new(),
            symbol_prefix: DEFAULT_SYMBOL_PREFIX.to_string(),
        }
    }
}

/// On-disk form; absent keys leave the current value alone.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    search_path: Vec<String>,
    gems_root: Option<String>,
    preload: Vec<String>,
    symbol_prefix: Option<String>,
}

impl LoaderConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = LoaderConfig::default();
        if let Some(path) = file {
            config.merge_from_file(path)?;
        }
        config.merge_env(|name| std::env::var_os(name));
        Ok(config)
    }

    /// Merge settings from a TOML file.
    pub fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RequireError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.merge_toml(&content)
            .map_err(|e| RequireError::config(format!("{}: {}", path.display(), e)))
    }

    fn merge_toml(&mut self, content: &str) -> std::result::Result<(), toml::de::Error> {
        let file: ConfigFile = toml::from_str(content)?;
        self.search_path.extend(file.search_path);
        if file.gems_root.is_some() {
            self.gems_root = file.gems_root;
        }
        self.preload.extend(file.preload);
        if let Some(prefix) = file.symbol_prefix {
            self.symbol_prefix = prefix;
        }
        Ok(())
    }

    /// Merge settings from environment variables obtained through `lookup`.
    pub fn merge_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(list) = lookup(LIB_PATH_ENV) {
            self.search_path.extend(
                std::env::split_paths(&list)
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.to_string_lossy().into_owned()),
            );
        }

        if let Some(root) = lookup(GEMS_ROOT_ENV).filter(|r| !r.is_empty()) {
            self.gems_root = Some(root.to_string_lossy().into_owned());
        }

        if let Some(names) = lookup(PRELOAD_ENV) {
            self.preload.extend(
                names
                    .to_string_lossy()
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            );
        }
    }

    /// The initial load path: configured entries followed by the install root.
    pub fn load_path(&self) -> Vec<String> {
        self.search_path
            .iter()
            .cloned()
            .chain(self.gems_root.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_path_list_and_root() {
        let list = std::env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        let mut config = LoaderConfig {
            gems_root: None,
            ..LoaderConfig::default()
        };
        config.merge_env(env(&[
            (LIB_PATH_ENV, list.to_str().unwrap()),
            (GEMS_ROOT_ENV, "/opt/gems"),
        ]));
        assert_eq!(config.load_path(), vec!["/opt/a", "/opt/b", "/opt/gems"]);
    }

    #[test]
    fn test_env_preload_is_comma_separated() {
        let mut config = LoaderConfig::default();
        config.merge_env(env(&[(PRELOAD_ENV, "json,,net-http")]));
        assert_eq!(config.preload, vec!["json", "net-http"]);
    }

    #[test]
    fn test_empty_env_changes_nothing() {
        let mut config = LoaderConfig::default();
        let before = config.clone();
        config.merge_env(env(&[]));
        assert_eq!(config, before);
    }

    #[test]
    fn test_merge_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(
            &path,
            "search_path = [\"lib\"]\npreload = [\"boot\"]\nsymbol_prefix = \"keel\"\n",
        )
        .unwrap();

        let mut config = LoaderConfig::default();
        config.merge_from_file(&path).unwrap();
        assert_eq!(config.search_path, vec!["lib"]);
        assert_eq!(config.preload, vec!["boot"]);
        assert_eq!(config.symbol_prefix, "keel");
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "unknown_key = 1\n").unwrap();

        let err = LoaderConfig::default().merge_from_file(&path).unwrap_err();
        assert!(matches!(err, RequireError::Config(_)));

        let missing = dir.path().join("missing.toml");
        assert!(LoaderConfig::default().merge_from_file(&missing).is_err());
    }
}
