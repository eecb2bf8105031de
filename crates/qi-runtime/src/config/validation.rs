//! Configuration validation: the rules a loaded [`BusConfig`] must satisfy
//! before the bus starts, plus the `dev_mode` log-level promotion rule
//! (dev mode forces `log_level` to `debug`).

use super::error::{ConfigError, ConfigResult};
use super::schema::{BusConfig, LogLevel};

/// Validates `config` in place, applying the `dev_mode` log-level
/// promotion when the caller left `log_level` at its default.
pub fn validate_config(mut config: BusConfig) -> ConfigResult<BusConfig> {
    if config.reply_timeout_secs <= 0.0 || config.reply_timeout_secs > 300.0 {
        return Err(ConfigError::validation(format!(
            "reply_timeout_secs must be in (0, 300], got {}",
            config.reply_timeout_secs
        )));
    }
    if config.max_pending_requests_per_session == 0 {
        return Err(ConfigError::validation(
            "max_pending_requests_per_session must be at least 1",
        ));
    }
    if config.ws_path.is_empty() || !config.ws_path.starts_with('/') {
        return Err(ConfigError::validation(format!(
            "ws_path must start with '/', got {:?}",
            config.ws_path
        )));
    }
    if config.bind_addr.port() == 0 {
        return Err(ConfigError::InvalidPort(0));
    }

    if config.dev_mode && matches!(config.log_level, LogLevel::Info) {
        config.log_level = LogLevel::Debug;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_mode_promotes_default_log_level_to_debug() {
        let mut config = BusConfig::default();
        config.dev_mode = true;
        let validated = validate_config(config).unwrap();
        assert_eq!(validated.log_level, LogLevel::Debug);
    }

    #[test]
    fn dev_mode_does_not_override_an_explicit_log_level() {
        let mut config = BusConfig::default();
        config.dev_mode = true;
        config.log_level = LogLevel::Warn;
        let validated = validate_config(config).unwrap();
        assert_eq!(validated.log_level, LogLevel::Warn);
    }

    #[test]
    fn rejects_timeout_out_of_range() {
        let mut config = BusConfig::default();
        config.reply_timeout_secs = 301.0;
        assert!(validate_config(config).is_err());
    }

    #[test]
    fn rejects_ws_path_without_leading_slash() {
        let mut config = BusConfig::default();
        config.ws_path = "ws".to_string();
        assert!(validate_config(config).is_err());
    }
}
