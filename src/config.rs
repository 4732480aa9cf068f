use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Settings read from `.texref.toml`. Every section is optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub documents: DocumentsConfig,
    pub backup: BackupConfig,
    pub verify: VerifyConfig,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentsConfig {
    /// Extensions picked up when discovering documents
    pub extensions: Vec<String>,
    /// Glob patterns, relative to the search root
    pub exclude: Vec<String>,
    pub recursive: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        DocumentsConfig {
            extensions: vec!["tex".to_string()],
            exclude: Vec::new(),
            recursive: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    /// Abort the write when the backup cannot be created
    pub strict: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig { strict: true }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VerifyConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            timeout_secs: 10,
            user_agent: "texref (bibliography checker)".to_string(),
        }
    }
}

impl Config {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Config> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(e) => return Err(Error::read(path, e)),
        };
        Self::parse(&content).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> std::result::Result<Config, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.backup.strict);
        assert_eq!(config.documents.extensions, vec!["tex"]);
        assert_eq!(config.verify.timeout_secs, 10);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [documents]
            exclude = ["build/**"]
            recursive = false

            [backup]
            strict = false
            "#,
        )
        .unwrap();

        assert_eq!(config.documents.extensions, vec!["tex"]);
        assert_eq!(config.documents.exclude, vec!["build/**"]);
        assert!(!config.documents.recursive);
        assert!(!config.backup.strict);
        assert_eq!(config.verify, VerifyConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("[backup]\nstirct = true\n").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".texref.toml");
        fs::write(&path, "[verify]\ntimeout_secs = \"ten\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config { .. })));
    }
}
