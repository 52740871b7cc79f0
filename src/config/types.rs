use serde::Deserialize;

/// Main configuration structure for Statline
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub source: SourceConfig,
}

/// Crawl engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Pages buffered between producer and consumer
    #[serde(rename = "queue-size")]
    pub queue_size: usize,

    /// Events requested per page
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    pub delays: DelayConfig,
}

/// Pauses between producer rounds, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    /// Pause while some source still has data
    #[serde(rename = "yield")]
    pub yield_delay: f64,

    /// Pause once every source is exhausted
    #[serde(rename = "empty-source")]
    pub empty_source: f64,
}

/// Write-dedup cache configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached rows; unbounded when omitted
    #[serde(default)]
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Where platform data is read from
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Path to the JSON export replayed by the archive source
    #[serde(rename = "archive-path")]
    pub archive_path: String,

    /// Guilds to crawl; every visible guild when empty
    #[serde(rename = "guild-ids", default)]
    pub guild_ids: Vec<u64>,
}

impl SourceConfig {
    /// Returns true if the guild passes the `guild-ids` filter
    pub fn wants_guild(&self, guild_id: u64) -> bool {
        self.guild_ids.is_empty() || self.guild_ids.contains(&guild_id)
    }
}
