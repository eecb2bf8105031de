//! Layered configuration loading: defaults, then an optional `qi.toml`
//! file, then `QI_`-prefixed environment variables, via `figment`'s
//! provider stack.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use super::error::ConfigResult;
use super::schema::BusConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "QI_";

/// Loads and validates [`BusConfig`] by searching the current directory for
/// `qi.toml`, layering it over the compiled-in defaults, then applying any
/// `QI_`-prefixed environment variable overrides.
pub fn load_config() -> ConfigResult<BusConfig> {
    load_config_from_file(Path::new("qi.toml"))
}

/// Loads and validates [`BusConfig`] from a specific TOML file path. A
/// missing file is not an error: defaults and environment variables still
/// apply.
pub fn load_config_from_file(path: &Path) -> ConfigResult<BusConfig> {
    let figment = Figment::from(Serialized::defaults(BusConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX));

    let config: BusConfig = figment.extract()?;
    validate_config(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config_from_file(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(config.bind_addr.port(), 8000);
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("qi-runtime-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("qi.toml");
        std::fs::write(&path, "ws_path = \"/bus\"\nmax_pending_requests_per_session = 7\n").unwrap();

        let config = load_config_from_file(&path).unwrap();
        assert_eq!(config.ws_path, "/bus");
        assert_eq!(config.max_pending_requests_per_session, 7);

        std::fs::remove_dir_all(&dir).ok();
    }
}
