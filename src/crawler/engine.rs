//! Producer/consumer crawl engine
//!
//! The producer pages through every source of a policy and pushes pages onto
//! a bounded queue; the consumer commits them one transaction at a time.
//! Lifecycle hooks and consumer feedback reach the producer as control
//! messages, so the producer is the only owner of the progress map.

use crate::config::CrawlerConfig;
use crate::crawler::policy::CrawlPolicy;
use crate::history::MessageHistory;
use crate::state::CrawlProgress;
use crate::storage::{StorageResult, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tuning knobs shared by the producer and the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Pages the queue holds before the producer blocks
    pub queue_size: usize,

    /// Events requested per read
    pub page_size: usize,

    /// Pause between rounds while some source is active
    pub yield_delay: Duration,

    /// Pause between rounds once every source is exhausted
    pub idle_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_size: 256,
            page_size: 100,
            yield_delay: Duration::from_millis(500),
            idle_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&CrawlerConfig> for EngineSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            queue_size: config.queue_size,
            page_size: config.batch_size,
            yield_delay: Duration::from_secs_f64(config.delays.yield_delay),
            idle_backoff: Duration::from_secs_f64(config.delays.empty_source),
        }
    }
}

/// One page read from a source
///
/// `from` is the position the read started after and `to` the position the
/// source reaches once the page is committed. A page without events is a
/// progress-only marker. `exhausted` is set on the last page a read could
/// return.
#[derive(Debug, Clone)]
pub struct Batch<S, E> {
    pub source: S,
    pub source_id: u64,
    pub from: u64,
    pub to: u64,
    pub events: Vec<E>,
    pub exhausted: bool,
}

impl<S, E> Batch<S, E> {
    pub fn is_marker(&self) -> bool {
        self.events.is_empty()
    }
}

/// An item on the producer to consumer queue
#[derive(Debug, Clone)]
pub enum QueueItem<S, E> {
    Page(Batch<S, E>),

    /// The source was removed; drop its committed position
    Forget(u64),
}

/// A message to the producer, applied before its next round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control<S> {
    Created(S),
    Updated(S),
    Removed(S),

    /// A page failed to commit; resume reading from `position`
    Rewind { source_id: u64, position: u64 },
}

/// How a producer round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// At least one source is still active
    Busy,

    /// Every source is exhausted
    Idle,

    /// The consumer is gone
    Closed,
}

/// What the consumer did with one queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Committed,

    /// Dropped because it does not start at the committed position
    Stale,

    /// The transaction rolled back and the producer was asked to rewind
    Failed,

    Forgotten,
}

/// Final state of a producer
#[derive(Debug, Clone)]
pub struct ProducerSummary<S> {
    pub rounds: u64,
    pub progress: Vec<CrawlProgress<S>>,
}

/// Final state of a consumer
#[derive(Debug, Clone, Default)]
pub struct ConsumerSummary {
    pub pages: u64,
    pub committed: HashMap<u64, u64>,
    pub histories: HashMap<u64, MessageHistory>,
}

/// Queue item carrying a policy's source and event types.
pub type Queue<P> = QueueItem<<P as CrawlPolicy>::Source, <P as CrawlPolicy>::Event>;

/// Reads pages from every source of a policy
pub struct Producer<P: CrawlPolicy, St> {
    policy: Arc<P>,
    store: Arc<St>,
    settings: EngineSettings,
    progress: Vec<CrawlProgress<P::Source>>,
    pending: Vec<Control<P::Source>>,
    queue: mpsc::Sender<Queue<P>>,
    control: mpsc::UnboundedReceiver<Control<P::Source>>,
    shutdown: watch::Receiver<bool>,
    rounds: u64,
}

impl<P: CrawlPolicy, St: Store + 'static> Producer<P, St> {
    /// Returns the entry of a source, if it is still crawled
    pub fn progress(&self, source_id: u64) -> Option<&CrawlProgress<P::Source>> {
        self.progress.iter().find(|entry| entry.source_id == source_id)
    }

    pub fn sources(&self) -> &[CrawlProgress<P::Source>] {
        &self.progress
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    fn index_of(&self, source_id: u64) -> Option<usize> {
        self.progress
            .iter()
            .position(|entry| entry.source_id == source_id)
    }

    /// Runs one round: applies control messages, then reads one page from
    /// every source due for polling
    pub async fn run_round(&mut self) -> RoundOutcome {
        if !self.apply_controls().await {
            return RoundOutcome::Closed;
        }

        let continuous = self.policy.continuous();
        let page_size = self.settings.page_size;
        // Read before any page so records created mid-read stay above a marker
        let now = self.policy.now_position();
        let mut queued = 0usize;

        for index in 0..self.progress.len() {
            if *self.shutdown.borrow() {
                break;
            }
            if !self.progress[index].should_poll(continuous) {
                continue;
            }

            let source = self.progress[index].source.clone();
            let source_id = self.progress[index].source_id;
            let after = self.progress[index].last_position;

            let events = match self.policy.read(&source, after, page_size).await {
                Ok(events) => events,
                Err(e) => {
                    error!(
                        "{}: failed to read source {} after {}: {}",
                        self.policy.name(),
                        source_id,
                        after,
                        e
                    );
                    continue;
                }
            };

            let fetched = events.len();
            let policy = &self.policy;
            let mut events: Vec<P::Event> = events
                .into_iter()
                .filter(|event| policy.event_id(event) > after)
                .collect();
            events.sort_by_key(|event| policy.event_id(event));

            let (to, exhausted) = match events.last() {
                Some(last) => (policy.event_id(last), fetched < page_size),
                None => (now.max(after), true),
            };

            debug!(
                "{}: source {} page {}..{} with {} events",
                self.policy.name(),
                source_id,
                after,
                to,
                events.len()
            );

            let batch = Batch {
                source,
                source_id,
                from: after,
                to,
                events,
                exhausted,
            };
            if self.queue.send(QueueItem::Page(batch)).await.is_err() {
                return RoundOutcome::Closed;
            }
            queued += 1;

            let entry = &mut self.progress[index];
            entry.advance(to);
            if exhausted {
                entry.exhaust();
            }
        }

        self.rounds += 1;
        let exhausted = self
            .progress
            .iter()
            .filter(|entry| entry.is_exhausted())
            .count();

        if queued > 0 {
            info!(
                "{}: round {} queued {} pages ({}/{} sources exhausted)",
                self.policy.name(),
                self.rounds,
                queued,
                exhausted,
                self.progress.len()
            );
        }

        if exhausted == self.progress.len() {
            RoundOutcome::Idle
        } else {
            RoundOutcome::Busy
        }
    }

    /// Applies queued control messages
    ///
    /// Returns false if the consumer is gone.
    async fn apply_controls(&mut self) -> bool {
        while let Ok(control) = self.control.try_recv() {
            self.pending.push(control);
        }

        for control in std::mem::take(&mut self.pending) {
            match self.apply(control.clone()) {
                Ok(Some(source_id)) => {
                    if self.queue.send(QueueItem::Forget(source_id)).await.is_err() {
                        return false;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "{}: could not apply {:?}, retrying next round: {}",
                        self.policy.name(),
                        control,
                        e
                    );
                    self.pending.push(control);
                }
            }
        }

        true
    }

    /// Applies one control message, returning the source to forget if it
    /// was removed
    fn apply(&mut self, control: Control<P::Source>) -> StorageResult<Option<u64>> {
        match control {
            Control::Created(source) => {
                self.add(source)?;
                Ok(None)
            }
            Control::Updated(source) => {
                let source_id = self.policy.source_id(&source);
                match (self.index_of(source_id), self.policy.accepts(&source)) {
                    (Some(index), true) => {
                        self.progress[index].source = source;
                        Ok(None)
                    }
                    (Some(_), false) => self.remove(source),
                    (None, true) => {
                        self.add(source)?;
                        Ok(None)
                    }
                    (None, false) => Ok(None),
                }
            }
            Control::Removed(source) => self.remove(source),
            Control::Rewind {
                source_id,
                position,
            } => {
                if let Some(index) = self.index_of(source_id) {
                    warn!(
                        "{}: rewinding source {} to {}",
                        self.policy.name(),
                        source_id,
                        position
                    );
                    self.progress[index].rewind(position);
                }
                Ok(None)
            }
        }
    }

    fn add(&mut self, source: P::Source) -> StorageResult<()> {
        let source_id = self.policy.source_id(&source);
        if !self.policy.accepts(&source) || self.index_of(source_id).is_some() {
            return Ok(());
        }

        let policy = &self.policy;
        let position = self
            .store
            .transaction(|tx| policy.create_progress(tx, &source))?;

        info!(
            "{}: added source {} at position {}",
            self.policy.name(),
            source_id,
            position
        );
        self.progress
            .push(CrawlProgress::new(source, source_id, position));
        Ok(())
    }

    fn remove(&mut self, source: P::Source) -> StorageResult<Option<u64>> {
        let source_id = self.policy.source_id(&source);
        let Some(index) = self.index_of(source_id) else {
            return Ok(None);
        };

        let policy = &self.policy;
        self.store
            .transaction(|tx| policy.delete_progress(tx, &source))?;

        self.progress.remove(index);
        info!("{}: removed source {}", self.policy.name(), source_id);
        Ok(Some(source_id))
    }

    /// Runs rounds until shutdown or until the consumer goes away
    pub async fn run(mut self) -> ProducerSummary<P::Source> {
        info!(
            "{}: crawling {} sources",
            self.policy.name(),
            self.progress.len()
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let delay = match self.run_round().await {
                RoundOutcome::Closed => break,
                RoundOutcome::Idle => self.settings.idle_backoff,
                RoundOutcome::Busy => self.settings.yield_delay,
            };

            // New control messages cut the pause short
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                Ok(()) = self.shutdown.changed() => {}
                Some(control) = self.control.recv() => self.pending.push(control),
            }
        }

        // Removals sent before shutdown still delete their progress rows
        if *self.shutdown.borrow() && !self.apply_controls().await {
            debug!("{}: consumer gone before final controls", self.policy.name());
        }

        info!(
            "{}: producer stopped after {} rounds",
            self.policy.name(),
            self.rounds
        );
        ProducerSummary {
            rounds: self.rounds,
            progress: self.progress,
        }
    }
}

/// Commits pages in queue order
pub struct Consumer<P: CrawlPolicy, St> {
    policy: Arc<P>,
    store: Arc<St>,
    queue: mpsc::Receiver<Queue<P>>,
    control: mpsc::UnboundedSender<Control<P::Source>>,
    committed: HashMap<u64, u64>,
    histories: HashMap<u64, MessageHistory>,
    pages: u64,
}

impl<P: CrawlPolicy, St: Store + 'static> Consumer<P, St> {
    /// Returns the last committed position of a source
    pub fn committed(&self, source_id: u64) -> Option<u64> {
        self.committed.get(&source_id).copied()
    }

    pub fn history(&self, source_id: u64) -> Option<&MessageHistory> {
        self.histories.get(&source_id)
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Handles one queue item
    pub fn process(&mut self, item: Queue<P>) -> Delivery {
        match item {
            QueueItem::Forget(source_id) => {
                self.committed.remove(&source_id);
                self.histories.remove(&source_id);
                debug!("{}: forgot source {}", self.policy.name(), source_id);
                Delivery::Forgotten
            }
            QueueItem::Page(batch) => self.commit(batch),
        }
    }

    fn commit(&mut self, batch: Batch<P::Source, P::Event>) -> Delivery {
        let source_id = batch.source_id;

        if let Some(&committed) = self.committed.get(&source_id) {
            if batch.from != committed {
                warn!(
                    "{}: dropping stale page {}..{} for source {} (committed {})",
                    self.policy.name(),
                    batch.from,
                    batch.to,
                    source_id,
                    committed
                );
                return Delivery::Stale;
            }
        }

        let policy = &self.policy;
        let result = self.store.transaction(|tx| {
            if !batch.is_marker() {
                policy.write(tx, &batch.source, &batch.events)?;
            }
            policy.update(tx, &batch.source, batch.to)
        });

        match result {
            Ok(()) => {
                self.committed.insert(source_id, batch.to);
                let history = self.histories.entry(source_id).or_default();
                if batch.to > batch.from {
                    if let Err(e) = history.record(batch.from + 1, batch.to) {
                        warn!("{}: could not record span: {}", self.policy.name(), e);
                    }
                }
                if batch.from == 0 {
                    if let Some(first) = batch.events.first() {
                        history.mark_first(self.policy.event_id(first));
                    }
                }
                // Continuous sources can still grow after a short page
                if batch.exhausted && !self.policy.continuous() {
                    history.mark_finished();
                }
                self.pages += 1;
                debug!(
                    "{}: committed {} events for source {}, now at {}",
                    self.policy.name(),
                    batch.events.len(),
                    source_id,
                    batch.to
                );
                Delivery::Committed
            }
            Err(e) => {
                error!(
                    "{}: failed to commit page {}..{} for source {}: {}",
                    self.policy.name(),
                    batch.from,
                    batch.to,
                    source_id,
                    e
                );
                let position = *self.committed.entry(source_id).or_insert(batch.from);
                let rewind = Control::Rewind {
                    source_id,
                    position,
                };
                if self.control.send(rewind).is_err() {
                    debug!("{}: producer already stopped", self.policy.name());
                }
                Delivery::Failed
            }
        }
    }

    /// Handles every item that is already queued, returning the count
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(item) = self.queue.try_recv() {
            self.process(item);
            handled += 1;
        }
        handled
    }

    /// Commits pages until the producer hangs up
    pub async fn run(mut self) -> ConsumerSummary {
        while let Some(item) = self.queue.recv().await {
            self.process(item);
        }

        info!(
            "{}: consumer stopped after {} pages",
            self.policy.name(),
            self.pages
        );
        ConsumerSummary {
            pages: self.pages,
            committed: self.committed,
            histories: self.histories,
        }
    }
}

/// Lifecycle hooks into a running crawler
pub struct CrawlerHandle<S> {
    name: Arc<str>,
    control: mpsc::UnboundedSender<Control<S>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl<S> Clone for CrawlerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            control: self.control.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl<S> CrawlerHandle<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns false once the producer has stopped
    pub fn source_created(&self, source: S) -> bool {
        self.send(Control::Created(source))
    }

    pub fn source_updated(&self, source: S) -> bool {
        self.send(Control::Updated(source))
    }

    pub fn source_removed(&self, source: S) -> bool {
        self.send(Control::Removed(source))
    }

    fn send(&self, control: Control<S>) -> bool {
        if self.control.send(control).is_err() {
            debug!("{}: hook called after the producer stopped", self.name);
            return false;
        }
        true
    }

    /// Asks the producer to stop after its current page
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Wires a policy to a store
pub struct Crawler<P, St> {
    policy: Arc<P>,
    store: Arc<St>,
    settings: EngineSettings,
}

impl<P: CrawlPolicy, St: Store + 'static> Crawler<P, St> {
    pub fn new(policy: P, store: Arc<St>, settings: EngineSettings) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            settings,
        }
    }

    /// Discovers sources and builds the producer and consumer without
    /// spawning them
    pub async fn init(
        self,
    ) -> crate::Result<(
        CrawlerHandle<P::Source>,
        Producer<P, St>,
        Consumer<P, St>,
    )> {
        let sources = self.policy.init(&*self.store).await?;
        info!(
            "{}: initialized {} sources",
            self.policy.name(),
            sources.len()
        );

        let (queue_tx, queue_rx) = mpsc::channel(self.settings.queue_size.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let committed = sources
            .iter()
            .map(|(source, position)| (self.policy.source_id(source), *position))
            .collect();
        let progress = sources
            .into_iter()
            .map(|(source, position)| {
                let source_id = self.policy.source_id(&source);
                CrawlProgress::new(source, source_id, position)
            })
            .collect();

        let handle = CrawlerHandle {
            name: Arc::from(self.policy.name()),
            control: control_tx.clone(),
            shutdown: Arc::new(shutdown_tx),
        };

        let producer = Producer {
            policy: Arc::clone(&self.policy),
            store: Arc::clone(&self.store),
            settings: self.settings,
            progress,
            pending: Vec::new(),
            queue: queue_tx,
            control: control_rx,
            shutdown: shutdown_rx,
            rounds: 0,
        };

        let consumer = Consumer {
            policy: self.policy,
            store: self.store,
            queue: queue_rx,
            control: control_tx,
            committed,
            histories: HashMap::new(),
            pages: 0,
        };

        Ok((handle, producer, consumer))
    }

    /// Initializes and spawns the producer and consumer tasks
    pub async fn start(self) -> crate::Result<RunningCrawler<P>> {
        let (handle, producer, consumer) = self.init().await?;
        Ok(RunningCrawler {
            handle,
            producer: tokio::spawn(producer.run()),
            consumer: tokio::spawn(consumer.run()),
        })
    }
}

/// A crawler whose tasks are running
pub struct RunningCrawler<P: CrawlPolicy> {
    handle: CrawlerHandle<P::Source>,
    producer: JoinHandle<ProducerSummary<P::Source>>,
    consumer: JoinHandle<ConsumerSummary>,
}

impl<P: CrawlPolicy> RunningCrawler<P> {
    pub fn handle(&self) -> CrawlerHandle<P::Source> {
        self.handle.clone()
    }

    /// Waits for both tasks to finish
    pub async fn join(self) -> crate::Result<(ProducerSummary<P::Source>, ConsumerSummary)> {
        let producer = self.producer.await.map_err(std::io::Error::from)?;
        let consumer = self.consumer.await.map_err(std::io::Error::from)?;
        Ok((producer, consumer))
    }

    /// Signals shutdown and waits for the queue to drain
    pub async fn stop(self) -> crate::Result<(ProducerSummary<P::Source>, ConsumerSummary)> {
        self.handle.shutdown();
        self.join().await
    }
}
