use crate::config::types::{CacheConfig, Config, CrawlerConfig, SourceConfig, StorageConfig};
use crate::ConfigError;

const MAX_QUEUE_SIZE: usize = 65_536;
const MAX_BATCH_SIZE: usize = 1_000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_cache_config(&config.cache)?;
    validate_storage_config(&config.storage)?;
    validate_source_config(&config.source)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.queue_size < 1 || config.queue_size > MAX_QUEUE_SIZE {
        return Err(ConfigError::Validation(format!(
            "queue-size must be between 1 and {}, got {}",
            MAX_QUEUE_SIZE, config.queue_size
        )));
    }

    if config.batch_size < 1 || config.batch_size > MAX_BATCH_SIZE {
        return Err(ConfigError::Validation(format!(
            "batch-size must be between 1 and {}, got {}",
            MAX_BATCH_SIZE, config.batch_size
        )));
    }

    validate_delay("yield", config.delays.yield_delay)?;
    validate_delay("empty-source", config.delays.empty_source)?;

    if config.delays.empty_source < config.delays.yield_delay {
        return Err(ConfigError::Validation(format!(
            "empty-source delay ({}s) must not be shorter than the yield delay ({}s)",
            config.delays.empty_source, config.delays.yield_delay
        )));
    }

    Ok(())
}

fn validate_delay(name: &str, seconds: f64) -> Result<(), ConfigError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} delay must be a non-negative number of seconds, got {}",
            name, seconds
        )));
    }
    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<(), ConfigError> {
    if config.size == Some(0) {
        return Err(ConfigError::Validation(
            "cache size must be >= 1; omit it for an unbounded cache".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    if config.archive_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "archive-path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::DelayConfig;

    fn valid_config() -> Config {
        Config {
            crawler: CrawlerConfig {
                queue_size: 256,
                batch_size: 100,
                delays: DelayConfig {
                    yield_delay: 0.5,
                    empty_source: 60.0,
                },
            },
            cache: CacheConfig { size: Some(10_000) },
            storage: StorageConfig {
                database_path: "statline.db".to_string(),
            },
            source: SourceConfig {
                archive_path: "export.json".to_string(),
                guild_ids: vec![1],
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_queue_and_batch_bounds() {
        let mut config = valid_config();
        config.crawler.queue_size = 0;
        assert!(validate(&config).is_err());

        config.crawler.queue_size = MAX_QUEUE_SIZE;
        assert!(validate(&config).is_ok());
        config.crawler.queue_size = MAX_QUEUE_SIZE + 1;
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.crawler.batch_size = 1_001;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_delays() {
        let mut config = valid_config();
        config.crawler.delays.yield_delay = -1.0;
        assert!(validate(&config).is_err());

        config.crawler.delays.yield_delay = f64::NAN;
        assert!(validate(&config).is_err());

        config.crawler.delays.yield_delay = 0.0;
        config.crawler.delays.empty_source = f64::INFINITY;
        assert!(validate(&config).is_err());

        // Idle backoff shorter than the yield delay
        let mut config = valid_config();
        config.crawler.delays.yield_delay = 10.0;
        config.crawler.delays.empty_source = 1.0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_cache_and_paths() {
        let mut config = valid_config();
        config.cache.size = Some(0);
        assert!(validate(&config).is_err());
        config.cache.size = None;
        assert!(validate(&config).is_ok());

        let mut config = valid_config();
        config.storage.database_path = "  ".to_string();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.source.archive_path = String::new();
        assert!(validate(&config).is_err());
    }
}
