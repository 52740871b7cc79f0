use std::fmt;

/// Represents the crawl state of a source
///
/// A removed source has no state at all: its entry is dropped from the
/// progress map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// The source may have unfetched data and is requested every round
    Active,

    /// The last request returned nothing new
    Exhausted,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracks how far the producer has read one source
///
/// The position here runs ahead of the persisted one: it advances as soon
/// as a page is queued, while the row in the database only moves once the
/// consumer commits that page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlProgress<S> {
    pub source: S,
    pub source_id: u64,
    pub last_position: u64,
    pub state: SourceState,
}

impl<S> CrawlProgress<S> {
    /// Creates an active entry resuming from `position`
    pub fn new(source: S, source_id: u64, position: u64) -> Self {
        Self {
            source,
            source_id,
            last_position: position,
            state: SourceState::Active,
        }
    }

    /// Moves the cursor forward after a page was queued
    ///
    /// Positions never move backwards here; see `rewind`.
    pub fn advance(&mut self, position: u64) {
        self.last_position = self.last_position.max(position);
        self.state = SourceState::Active;
    }

    /// Marks the source as having nothing new
    pub fn exhaust(&mut self) {
        self.state = SourceState::Exhausted;
    }

    /// Resets the cursor to the last committed position so the pages after
    /// it are fetched again
    pub fn rewind(&mut self, position: u64) {
        self.last_position = position;
        self.state = SourceState::Active;
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.is_exhausted()
    }

    /// Determines if the source should be read this round
    pub fn should_poll(&self, continuous: bool) -> bool {
        continuous || !self.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_active() {
        let progress = CrawlProgress::new("general", 10, 0);
        assert_eq!(progress.state, SourceState::Active);
        assert_eq!(progress.last_position, 0);
        assert!(progress.should_poll(false));
    }

    #[test]
    fn test_advance_never_goes_back() {
        let mut progress = CrawlProgress::new("general", 10, 50);
        progress.advance(100);
        assert_eq!(progress.last_position, 100);
        progress.advance(20);
        assert_eq!(progress.last_position, 100);
    }

    #[test]
    fn test_exhausted_polling() {
        let mut progress = CrawlProgress::new("general", 10, 0);
        progress.advance(100);
        progress.exhaust();

        assert!(progress.is_exhausted());
        assert!(!progress.should_poll(false));
        assert!(progress.should_poll(true));

        progress.advance(150);
        assert!(!progress.is_exhausted());
    }

    #[test]
    fn test_rewind() {
        let mut progress = CrawlProgress::new("general", 10, 0);
        progress.advance(300);
        progress.exhaust();
        progress.rewind(100);

        assert_eq!(progress.last_position, 100);
        assert_eq!(progress.state, SourceState::Active);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SourceState::Active.to_string(), "active");
        assert_eq!(SourceState::Exhausted.to_string(), "exhausted");
    }
}
