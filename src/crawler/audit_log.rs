//! Continuous polling of guild audit logs

use crate::crawler::policy::{CrawlPolicy, ProgressTable};
use crate::model::{AuditLogEntry, Guild};
use crate::snowflake;
use crate::source::{EventSource, SourceFetchError};
use crate::storage::records::insert_audit_entry;
use crate::storage::{StorageResult, Transaction};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Polls the audit log of every guild the bot may read it in
///
/// Audit logs only grow, so the crawl never stops. The platform answers a
/// read past the newest entry with entries at or below the cursor; the
/// engine drops those, which turns the page into an exhaustion marker.
pub struct AuditLogCrawler<E> {
    source: Arc<E>,
    guild_ids: Vec<u64>,
    clock: fn() -> u64,
}

impl<E: EventSource + 'static> AuditLogCrawler<E> {
    pub fn new(source: Arc<E>, guild_ids: Vec<u64>) -> Self {
        Self {
            source,
            guild_ids,
            clock: snowflake::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl<E: EventSource + 'static> CrawlPolicy for AuditLogCrawler<E> {
    type Source = Guild;
    type Event = AuditLogEntry;

    fn name(&self) -> &str {
        "audit-log"
    }

    fn continuous(&self) -> bool {
        true
    }

    fn progress_table(&self) -> ProgressTable {
        ProgressTable::AUDIT_LOG
    }

    fn source_id(&self, guild: &Guild) -> u64 {
        guild.id
    }

    async fn discover(&self) -> Result<Vec<Guild>, SourceFetchError> {
        self.source.guilds().await
    }

    fn accepts(&self, guild: &Guild) -> bool {
        guild.can_view_audit_log
            && (self.guild_ids.is_empty() || self.guild_ids.contains(&guild.id))
    }

    async fn read(
        &self,
        guild: &Guild,
        after: u64,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, SourceFetchError> {
        self.source.fetch_audit_log(guild.id, after, limit).await
    }

    fn event_id(&self, entry: &AuditLogEntry) -> u64 {
        entry.id
    }

    fn write(
        &self,
        tx: &mut dyn Transaction,
        guild: &Guild,
        entries: &[AuditLogEntry],
    ) -> StorageResult<()> {
        let mut written = 0usize;
        for entry in entries {
            if insert_audit_entry(tx, entry)? {
                written += 1;
            }
        }
        debug!(
            "audit-log: guild {} wrote {} of {} entries",
            guild.id,
            written,
            entries.len()
        );
        Ok(())
    }

    fn now_position(&self) -> u64 {
        (self.clock)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::engine::{Crawler, EngineSettings, RoundOutcome};
    use crate::source::{Archive, ArchiveSource};
    use crate::storage::{Row, SqliteStore, Store};
    use std::time::Duration;

    fn entry(id: u64) -> AuditLogEntry {
        AuditLogEntry {
            id,
            guild_id: 1,
            user_id: 7,
            action: "member_kick".to_string(),
            target_id: Some(8),
            reason: None,
        }
    }

    fn source() -> Arc<ArchiveSource> {
        Arc::new(ArchiveSource::new(Archive {
            guilds: vec![
                Guild {
                    id: 1,
                    name: "visible".to_string(),
                    can_view_audit_log: true,
                },
                Guild {
                    id: 2,
                    name: "hidden".to_string(),
                    can_view_audit_log: false,
                },
            ],
            audit_log: (1..=5).map(entry).collect(),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_only_readable_guilds() {
        let policy = AuditLogCrawler::new(source(), Vec::new());
        let guilds: Vec<u64> = policy
            .discover()
            .await
            .unwrap()
            .iter()
            .filter(|guild| policy.accepts(guild))
            .map(|guild| guild.id)
            .collect();
        assert_eq!(guilds, vec![1]);
    }

    #[tokio::test]
    async fn test_repeated_terminal_id_is_exhaustion() {
        let archive = source();
        let policy = AuditLogCrawler::new(Arc::clone(&archive), Vec::new()).with_clock(|| 0);
        let store = Arc::new(SqliteStore::new_in_memory(None).unwrap());
        let settings = EngineSettings {
            page_size: 3,
            yield_delay: Duration::from_millis(1),
            idle_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let (_handle, mut producer, mut consumer) =
            Crawler::new(policy, Arc::clone(&store), settings).init().await.unwrap();

        assert_eq!(producer.run_round().await, RoundOutcome::Busy);
        assert_eq!(producer.run_round().await, RoundOutcome::Idle);
        assert_eq!(producer.progress(1).unwrap().last_position, 5);

        // The platform repeats its newest page; the cursor stays put
        assert_eq!(producer.run_round().await, RoundOutcome::Idle);
        assert_eq!(producer.progress(1).unwrap().last_position, 5);

        archive.push_audit_entry(entry(6));
        producer.run_round().await;
        assert_eq!(producer.progress(1).unwrap().last_position, 6);

        consumer.process_pending();
        assert_eq!(consumer.committed(1), Some(6));
        let stored = store
            .transaction(|tx| tx.count("audit_log", &Row::new()))
            .unwrap();
        assert_eq!(stored, 6);
    }
}
