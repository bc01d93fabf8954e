//! Configuration validation.

use super::Config;
use crate::error::{Result, RowportError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(target) = &config.target {
        if target.host.is_empty() {
            return Err(RowportError::Config("target.host is required".into()));
        }
        if target.database.is_empty() {
            return Err(RowportError::Config("target.database is required".into()));
        }
        if target.user.is_empty() {
            return Err(RowportError::Config("target.user is required".into()));
        }
    }

    if config.loader.batch_size == 0 {
        return Err(RowportError::Config(
            "loader.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoaderConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            target: Some(TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "target_db".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
            }),
            loader: LoaderConfig::default(),
            codec: Default::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_target_is_optional() {
        let mut config = valid_config();
        config.target = None;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_target_host() {
        let mut config = valid_config();
        if let Some(target) = config.target.as_mut() {
            target.host = "".to_string();
        }
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.loader.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        if let Some(target) = config.target.as_mut() {
            target.password = "super_secret_password_456".to_string();
        }
        let debug_output = format!("{:?}", config.target);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_456"),
            "Debug output should not contain actual password value"
        );
    }
}
