use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::schema::SchemaSnapshot;

pub const MAX_SUGGESTIONS: usize = 10;
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    Table,
    Column,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionCandidate {
    pub name: String,
    pub kind: SuggestionKind,
}

/// Ranks schema names against the typed input: case-insensitive substring
/// match over table names and `table.column` composites, exact matches ahead
/// of partial ones, discovery order preserved within each group, capped at
/// [`MAX_SUGGESTIONS`]. Pure function of the input and schema snapshot.
#[must_use]
pub fn suggest(input: &str, schema: &SchemaSnapshot) -> Vec<SuggestionCandidate> {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() || schema.is_empty() {
        return Vec::new();
    }

    let mut exact = Vec::new();
    let mut partial = Vec::new();
    let mut classify = |name: String, kind: SuggestionKind| {
        let lowered = name.to_lowercase();
        if lowered == needle {
            exact.push(SuggestionCandidate { name, kind });
        } else if lowered.contains(&needle) {
            partial.push(SuggestionCandidate { name, kind });
        }
    };

    for table in &schema.tables {
        classify(table.name.clone(), SuggestionKind::Table);
    }
    for table in &schema.tables {
        for column in &table.columns {
            classify(
                format!("{}.{}", table.name, column.name),
                SuggestionKind::Column,
            );
        }
    }

    let mut candidates = exact;
    candidates.append(&mut partial);
    candidates.truncate(MAX_SUGGESTIONS);
    candidates
}

/// Collapses rapid suggestion requests into a single evaluation: each request
/// aborts the previously scheduled timer and schedules a fresh one, so only
/// the last-seen input within a quiet period is ever evaluated. The pending
/// timer is a scoped resource, aborted on supersession, explicit cancel, or
/// drop, so no late evaluation fires after teardown.
#[derive(Debug)]
pub struct SuggestionDebouncer {
    window: Duration,
    pending: Option<JoinHandle<()>>,
}

impl SuggestionDebouncer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn request(
        &mut self,
        input: String,
        schema: Arc<SchemaSnapshot>,
        output: UnboundedSender<Vec<SuggestionCandidate>>,
    ) {
        self.cancel_pending();
        let window = self.window;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let _ = output.send(suggest(&input, &schema));
        }));
    }

    pub fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Default for SuggestionDebouncer {
    fn default() -> Self {
        Self::new(DEBOUNCE_WINDOW)
    }
}

impl Drop for SuggestionDebouncer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
