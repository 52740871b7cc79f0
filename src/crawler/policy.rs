//! The strategy a crawler plugs into the engine
//!
//! A `CrawlPolicy` says what the sources are, how to page through one, and
//! how a page lands in the store. The engine owns scheduling, queueing,
//! progress and retries.

use crate::snowflake;
use crate::source::SourceFetchError;
use crate::storage::{sql_id, Row, StorageResult, Store, Transaction};
use async_trait::async_trait;
use std::fmt;

/// A table holding one `(source_id, last_position)` row per source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTable(&'static str);

impl ProgressTable {
    pub const CHANNELS: Self = Self("channel_crawl");
    pub const THREADS: Self = Self("thread_crawl");
    pub const AUDIT_LOG: Self = Self("audit_log_crawl");

    pub fn name(&self) -> &'static str {
        self.0
    }

    fn filter(source_id: u64) -> Row {
        Row::new().with("source_id", sql_id(source_id))
    }

    /// Returns the persisted position of a source, if it has a row
    pub fn lookup(&self, tx: &mut dyn Transaction, source_id: u64) -> StorageResult<Option<u64>> {
        let rows = tx.select(self.0, &Self::filter(source_id))?;
        Ok(rows
            .first()
            .and_then(|row| row.get_i64("last_position"))
            .map(|position| position as u64))
    }

    /// Inserts a row at position 0 unless one exists
    pub fn create(&self, tx: &mut dyn Transaction, source_id: u64) -> StorageResult<bool> {
        let values = Self::filter(source_id).with("last_position", 0i64);
        tx.insert_if_absent(self.0, &values)
    }

    /// Moves a source's persisted position
    ///
    /// The row is not recreated if the source was removed in the meantime.
    pub fn update(
        &self,
        tx: &mut dyn Transaction,
        source_id: u64,
        position: u64,
    ) -> StorageResult<bool> {
        let values = Row::new().with("last_position", sql_id(position));
        Ok(tx.update(self.0, &Self::filter(source_id), &values)? > 0)
    }

    pub fn delete(&self, tx: &mut dyn Transaction, source_id: u64) -> StorageResult<bool> {
        Ok(tx.delete(self.0, &Self::filter(source_id))? > 0)
    }
}

impl fmt::Display for ProgressTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One crawl policy, e.g. channel history backfill or audit-log polling
#[async_trait]
pub trait CrawlPolicy: Send + Sync + 'static {
    /// One independently progressing unit of work
    type Source: Clone + fmt::Debug + Send + Sync + 'static;

    /// One record read from a source
    type Event: Send + Sync + 'static;

    /// Name used in log lines
    fn name(&self) -> &str;

    /// Continuous policies keep polling exhausted sources
    fn continuous(&self) -> bool {
        false
    }

    fn progress_table(&self) -> ProgressTable;

    fn source_id(&self, source: &Self::Source) -> u64;

    /// Lists the sources to crawl at startup
    async fn discover(&self) -> Result<Vec<Self::Source>, SourceFetchError>;

    /// Determines if a source should be crawled at all
    fn accepts(&self, _source: &Self::Source) -> bool {
        true
    }

    /// Reads up to `limit` events after position `after`
    async fn read(
        &self,
        source: &Self::Source,
        after: u64,
        limit: usize,
    ) -> Result<Vec<Self::Event>, SourceFetchError>;

    /// Position of an event, used as the pagination cursor
    fn event_id(&self, event: &Self::Event) -> u64;

    /// Writes one page of events
    fn write(
        &self,
        tx: &mut dyn Transaction,
        source: &Self::Source,
        events: &[Self::Event],
    ) -> StorageResult<()>;

    /// Persists a source's new position
    fn update(
        &self,
        tx: &mut dyn Transaction,
        source: &Self::Source,
        position: u64,
    ) -> StorageResult<()> {
        self.progress_table()
            .update(tx, self.source_id(source), position)?;
        Ok(())
    }

    /// Ensures a source has a progress row, returning its position
    fn create_progress(
        &self,
        tx: &mut dyn Transaction,
        source: &Self::Source,
    ) -> StorageResult<u64> {
        let table = self.progress_table();
        let source_id = self.source_id(source);
        match table.lookup(tx, source_id)? {
            Some(position) => Ok(position),
            None => {
                table.create(tx, source_id)?;
                Ok(0)
            }
        }
    }

    fn delete_progress(
        &self,
        tx: &mut dyn Transaction,
        source: &Self::Source,
    ) -> StorageResult<()> {
        self.progress_table().delete(tx, self.source_id(source))?;
        Ok(())
    }

    /// Position standing for "everything up to now"
    fn now_position(&self) -> u64 {
        snowflake::now()
    }

    /// Discovers sources and loads or creates their progress rows
    ///
    /// Returns every accepted source with the position to resume from.
    async fn init<St: Store + 'static>(
        &self,
        store: &St,
    ) -> crate::Result<Vec<(Self::Source, u64)>> {
        let sources: Vec<Self::Source> = self
            .discover()
            .await?
            .into_iter()
            .filter(|source| self.accepts(source))
            .collect();

        let positioned = store.transaction(|tx| {
            sources
                .into_iter()
                .map(|source| {
                    let position = self.create_progress(tx, &source)?;
                    Ok((source, position))
                })
                .collect::<StorageResult<Vec<_>>>()
        })?;

        Ok(positioned)
    }
}
