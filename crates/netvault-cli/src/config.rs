//! Configuration loading for the `netvault` binary.
//!
//! Sources, highest priority first:
//! 1. `NETVAULT_STORE__*` environment variables (e.g. `NETVAULT_STORE__DB_PATH`)
//! 2. `[store]` section of the config file (`netvault.toml` by default)
//! 3. `StoreConfig` defaults

use netvault_core::StoreConfig;

pub fn load_store_config(file_prefix: &str) -> anyhow::Result<StoreConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NETVAULT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let store = match cfg.get::<StoreConfig>("store") {
        Ok(c) => c,
        Err(config::ConfigError::NotFound(_)) => StoreConfig::default(),
        Err(e) => return Err(e.into()),
    };
    store.validate()?;
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let config = load_store_config(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_file_section_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netvault.toml");
        std::fs::write(
            &path,
            "[store]\ndb_path = \"/var/lib/netvault/assets.db\"\npool_size = 20\ngeo_ttl_hours = 6\n",
        )
        .unwrap();

        let prefix = dir.path().join("netvault");
        let config = load_store_config(prefix.to_str().unwrap()).unwrap();
        assert_eq!(config.db_path.to_str(), Some("/var/lib/netvault/assets.db"));
        assert_eq!(config.pool_size, 20);
        assert_eq!(config.geo_ttl_hours, 6);
        assert_eq!(config.min_idle, 10);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "[store]\npool_size = 0\n").unwrap();

        let prefix = dir.path().join("bad");
        assert!(load_store_config(prefix.to_str().unwrap()).is_err());
    }
}
