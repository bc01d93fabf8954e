//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ErrorPolicy;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = Config::from_yaml("{}").unwrap();
        assert!(config.target.is_none());
        assert_eq!(config.loader.batch_size, 1);
        assert_eq!(config.loader.error_policy, ErrorPolicy::Halt);
        assert!(config.loader.autocommit);
        assert!(!config.loader.identity_override);
        assert!(config.codec.pretty_print);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
target:
  host: db.internal
  database: app
  user: loader
  password: secret
loader:
  batch_size: 500
  error_policy: continue
  case_sensitive: true
  autocommit: false
codec:
  pretty_print: false
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let target = config.target.as_ref().unwrap();
        assert_eq!(target.port, 5432);
        assert_eq!(target.schema, "public");
        assert_eq!(target.host, "db.internal");
        assert_eq!(target.ssl_mode, "disable");

        let options = config.loader.options();
        assert_eq!(options.batch_size, 500);
        assert_eq!(options.error_policy, ErrorPolicy::Continue);
        assert!(options.case_sensitive);
        assert!(!config.loader.autocommit);
        assert!(!config.codec.pretty_print);
    }

    #[test]
    fn test_invalid_document_is_rejected() {
        assert!(Config::from_yaml("loader:\n  batch_size: 0\n").is_err());
        assert!(Config::from_yaml("loader:\n  error_policy: retry\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "loader:\n  batch_size: 3\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.loader.batch_size, 3);
    }
}
