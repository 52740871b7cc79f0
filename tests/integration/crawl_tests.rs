//! Integration tests for Statline
//!
//! These drive complete crawlers over an archive source and a real SQLite
//! store, exercising the producer, the consumer, the hooks and the live
//! ingestor together.

use statline::crawler::{
    AuditLogCrawler, Crawler, EngineSettings, HistoryCrawler, ProgressTable, RoundOutcome,
};
use statline::ingest::LiveIngestor;
use statline::model::{AuditLogEntry, Channel, ChannelKind, Guild, LiveEvent, Message, User};
use statline::source::{Archive, ArchiveSource};
use statline::storage::{
    open_store, Row, SqliteStore, StorageError, StorageResult, Store, Transaction,
};
use statline::SourceState;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn settings(page_size: usize) -> EngineSettings {
    EngineSettings {
        queue_size: 4,
        page_size,
        yield_delay: Duration::from_millis(1),
        idle_backoff: Duration::from_millis(10),
    }
}

fn guild(id: u64) -> Guild {
    Guild {
        id,
        name: format!("guild-{}", id),
        can_view_audit_log: true,
    }
}

fn channel(id: u64, kind: ChannelKind) -> Channel {
    Channel {
        id,
        guild_id: 1,
        name: format!("channel-{}", id),
        kind,
        parent_id: None,
        readable: true,
    }
}

fn message(channel_id: u64, id: u64) -> Message {
    Message {
        id,
        channel_id,
        author: User {
            id: 7 + id % 3,
            name: format!("user-{}", id % 3),
            discriminator: None,
            avatar: None,
            bot: false,
        },
        content: format!("message {}", id),
        edited_at: None,
        pinned: false,
        reactions: Vec::new(),
    }
}

/// One guild with channel 10 holding `messages` messages numbered from 1
fn archive(messages: u64) -> Arc<ArchiveSource> {
    Arc::new(ArchiveSource::new(Archive {
        guilds: vec![guild(1)],
        channels: vec![channel(10, ChannelKind::Text)],
        messages: (1..=messages).map(|id| message(10, id)).collect(),
        ..Default::default()
    }))
}

fn count<St: Store>(store: &St, table: &str) -> u64 {
    store
        .transaction(|tx| tx.count(table, &Row::new()))
        .unwrap()
}

fn position<St: Store>(store: &St, table: ProgressTable, source_id: u64) -> Option<u64> {
    store
        .transaction(|tx| table.lookup(tx, source_id))
        .unwrap()
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_backfill_drains_in_three_rounds() {
    let source = archive(250);
    let store = Arc::new(SqliteStore::new_in_memory(None).unwrap());
    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let (_handle, mut producer, mut consumer) =
        Crawler::new(policy, Arc::clone(&store), settings(100))
            .init()
            .await
            .unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(producer.run_round().await);
        consumer.process_pending();
    }

    assert_eq!(
        outcomes,
        vec![RoundOutcome::Busy, RoundOutcome::Busy, RoundOutcome::Idle]
    );
    assert_eq!(producer.progress(10).unwrap().state, SourceState::Exhausted);
    assert_eq!(count(&*store, "messages"), 250);
    assert_eq!(count(&*store, "users"), 3);
    assert_eq!(position(&*store, ProgressTable::CHANNELS, 10), Some(250));

    let history = consumer.history(10).unwrap();
    assert_eq!(history.first(), Some(1));
    assert!(history.is_finished());
    assert!(history.is_complete());
    assert_eq!(history.find_first_hole(400, 1, 100), (400, 0));
}

#[tokio::test]
async fn test_running_crawlers_sync_everything() {
    let source = Arc::new(ArchiveSource::new(Archive {
        guilds: vec![guild(1)],
        channels: vec![
            channel(10, ChannelKind::Text),
            channel(11, ChannelKind::Text),
            channel(30, ChannelKind::Thread),
        ],
        messages: (1..=120)
            .map(|id| message(10, id))
            .chain((200..=260).map(|id| message(11, id)))
            .chain((300..=305).map(|id| message(30, id)))
            .collect(),
        audit_log: (1..=5)
            .map(|id| AuditLogEntry {
                id,
                guild_id: 1,
                user_id: 7,
                action: "channel_create".to_string(),
                target_id: None,
                reason: None,
            })
            .collect(),
        ..Default::default()
    }));
    let store = Arc::new(SqliteStore::new_in_memory(NonZeroUsize::new(1000)).unwrap());

    let channels = Crawler::new(
        HistoryCrawler::channels(Arc::clone(&source), Vec::new()),
        Arc::clone(&store),
        settings(25),
    )
    .start()
    .await
    .unwrap();
    let threads = Crawler::new(
        HistoryCrawler::threads(Arc::clone(&source), Vec::new()),
        Arc::clone(&store),
        settings(25),
    )
    .start()
    .await
    .unwrap();
    let audit = Crawler::new(
        AuditLogCrawler::new(Arc::clone(&source), Vec::new()).with_clock(|| 0),
        Arc::clone(&store),
        settings(25),
    )
    .start()
    .await
    .unwrap();

    wait_for(|| count(&*store, "messages") == 120 + 61 + 6 && count(&*store, "audit_log") == 5)
        .await;

    // The audit log keeps being polled
    source.push_audit_entry(AuditLogEntry {
        id: 6,
        guild_id: 1,
        user_id: 7,
        action: "member_ban_add".to_string(),
        target_id: Some(9),
        reason: Some("spam".to_string()),
    });
    wait_for(|| count(&*store, "audit_log") == 6).await;

    let (_, channel_summary) = channels.stop().await.unwrap();
    let (_, thread_summary) = threads.stop().await.unwrap();
    let (_, audit_summary) = audit.stop().await.unwrap();

    assert_eq!(channel_summary.committed.get(&10), Some(&120));
    assert_eq!(channel_summary.committed.get(&11), Some(&260));
    assert_eq!(thread_summary.committed.get(&30), Some(&305));
    assert_eq!(audit_summary.committed.get(&1), Some(&6));
    assert_eq!(position(&*store, ProgressTable::THREADS, 30), Some(305));
    assert_eq!(position(&*store, ProgressTable::AUDIT_LOG, 1), Some(6));
}

#[tokio::test]
async fn test_restart_resumes_from_persisted_position() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("statline.db");
    let source = archive(250);

    {
        let store = Arc::new(open_store(&path, None).unwrap());
        let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
        let (_handle, mut producer, mut consumer) =
            Crawler::new(policy, Arc::clone(&store), settings(100))
                .init()
                .await
                .unwrap();
        producer.run_round().await;
        consumer.process_pending();
        assert_eq!(count(&*store, "messages"), 100);
    }

    let store = Arc::new(open_store(&path, None).unwrap());
    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let (_handle, mut producer, mut consumer) =
        Crawler::new(policy, Arc::clone(&store), settings(100))
            .init()
            .await
            .unwrap();

    assert_eq!(producer.progress(10).unwrap().last_position, 100);
    assert_eq!(consumer.committed(10), Some(100));

    producer.run_round().await;
    producer.run_round().await;
    consumer.process_pending();
    assert_eq!(count(&*store, "messages"), 250);
    assert_eq!(position(&*store, ProgressTable::CHANNELS, 10), Some(250));
}

#[tokio::test]
async fn test_removed_channel_is_never_fetched_again() {
    let source = Arc::new(ArchiveSource::new(Archive {
        guilds: vec![guild(1)],
        channels: vec![channel(10, ChannelKind::Text), channel(11, ChannelKind::Text)],
        messages: (1..=300)
            .map(|id| message(10, id))
            .chain((1000..=1300).map(|id| message(11, id)))
            .collect(),
        ..Default::default()
    }));
    let store = Arc::new(SqliteStore::new_in_memory(None).unwrap());
    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let (handle, mut producer, mut consumer) =
        Crawler::new(policy, Arc::clone(&store), settings(100))
            .init()
            .await
            .unwrap();
    let ingestor = LiveIngestor::new(Arc::clone(&store)).with_channel_crawler(handle);

    producer.run_round().await;
    consumer.process_pending();
    assert_eq!(count(&*store, "messages"), 200);

    let removed = source.remove_channel(11).unwrap();
    ingestor
        .handle(&LiveEvent::ChannelDelete { channel: removed })
        .unwrap();

    producer.run_round().await;
    producer.run_round().await;
    consumer.process_pending();

    assert!(producer.progress(11).is_none());
    assert_eq!(position(&*store, ProgressTable::CHANNELS, 11), None);
    assert_eq!(consumer.committed(11), None);
    assert_eq!(count(&*store, "messages"), 300 + 100);

    // Another restart does not bring it back
    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let (_handle, producer, _consumer) = Crawler::new(policy, Arc::clone(&store), settings(100))
        .init()
        .await
        .unwrap();
    assert!(producer.progress(11).is_none());
    assert_eq!(producer.sources().len(), 1);
}

#[tokio::test]
async fn test_new_channel_is_backfilled() {
    let source = archive(10);
    let store = Arc::new(SqliteStore::new_in_memory(None).unwrap());
    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let running = Crawler::new(policy, Arc::clone(&store), settings(100))
        .start()
        .await
        .unwrap();
    let ingestor = LiveIngestor::new(Arc::clone(&store)).with_channel_crawler(running.handle());

    wait_for(|| count(&*store, "messages") == 10).await;

    let created = channel(12, ChannelKind::Text);
    source.push_channel(created.clone());
    for id in 500..=520 {
        source.push_message(message(12, id));
    }
    ingestor
        .handle(&LiveEvent::ChannelCreate { channel: created })
        .unwrap();

    wait_for(|| count(&*store, "messages") == 31).await;
    let (producer, _) = running.stop().await.unwrap();
    assert_eq!(producer.progress.len(), 2);
    assert_eq!(position(&*store, ProgressTable::CHANNELS, 12), Some(520));
}

#[tokio::test]
async fn test_live_and_crawled_messages_are_deduplicated() {
    let source = archive(150);
    let store = Arc::new(SqliteStore::new_in_memory(None).unwrap());
    let ingestor = LiveIngestor::new(Arc::clone(&store));

    // Live traffic delivers the newest messages before the crawl reaches them
    for id in 141..=150 {
        ingestor
            .handle(&LiveEvent::MessageCreate {
                message: message(10, id),
            })
            .unwrap();
    }
    let before = store.stats().unwrap();

    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let (_handle, mut producer, mut consumer) =
        Crawler::new(policy, Arc::clone(&store), settings(100))
            .init()
            .await
            .unwrap();
    producer.run_round().await;
    producer.run_round().await;
    consumer.process_pending();

    let after = store.stats().unwrap();
    assert_eq!(count(&*store, "messages"), 150);

    // Ten messages and their authors were already current
    assert!(after.suppressed - before.suppressed >= 10);
    assert_eq!(after.rollbacks, 0);
}

/// Fails the next `fail_next` transactions after running them
struct FlakyStore {
    inner: SqliteStore,
    fail_next: AtomicUsize,
}

impl Store for FlakyStore {
    fn transaction<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut dyn Transaction) -> StorageResult<R>,
    {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.inner.transaction(|tx| {
            let value = f(tx)?;
            if failing {
                return Err(StorageError::Constraint("disk full".to_string()));
            }
            Ok(value)
        })
    }
}

#[tokio::test]
async fn test_failed_page_is_fetched_again() {
    let source = archive(250);
    let store = Arc::new(FlakyStore {
        inner: SqliteStore::new_in_memory(None).unwrap(),
        fail_next: AtomicUsize::new(0),
    });
    let policy = HistoryCrawler::channels(Arc::clone(&source), Vec::new());
    let (_handle, mut producer, mut consumer) =
        Crawler::new(policy, Arc::clone(&store), settings(100))
            .init()
            .await
            .unwrap();

    // The second page is queued before the first one fails, so it goes stale
    producer.run_round().await;
    producer.run_round().await;
    store.fail_next.store(1, Ordering::SeqCst);
    assert_eq!(consumer.process_pending(), 2);

    assert_eq!(count(&*store, "messages"), 0);
    assert_eq!(position(&*store, ProgressTable::CHANNELS, 10), Some(0));
    assert_eq!(consumer.committed(10), Some(0));

    for _ in 0..4 {
        producer.run_round().await;
        consumer.process_pending();
    }

    assert_eq!(count(&*store, "messages"), 250);
    assert_eq!(position(&*store, ProgressTable::CHANNELS, 10), Some(250));
    assert_eq!(producer.progress(10).unwrap().state, SourceState::Exhausted);
}
