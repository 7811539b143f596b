use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use solvetrack_core::{ClassName, ScoreUpdate, StudentScore, Username};
use solvetrack_scraper::{FetchConfig, ProfileFetcher, ScrapeError};
use solvetrack_store_sqlite::{SqliteStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no students found in class {0}")]
    EmptyClass(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build scraper: {0}")]
    Scraper(#[from] ScrapeError),
}

/// Seam between orchestration and the network. The production source is
/// [`ProfileFetcher`]; tests substitute canned results.
///
/// Implementations must return one slot per input username, in input
/// order, with `None` marking a failed fetch.
pub trait ScoreSource: Send + Sync {
    fn fetch_batch(
        &self,
        usernames: &[Username],
    ) -> impl Future<Output = Vec<Option<u32>>> + Send;
}

impl ScoreSource for ProfileFetcher {
    fn fetch_batch(
        &self,
        usernames: &[Username],
    ) -> impl Future<Output = Vec<Option<u32>>> + Send {
        self.scrape_batch(usernames)
    }
}

/// Result of one orchestrator run over a class.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSummary {
    pub class: ClassName,
    pub updated: usize,
    pub skipped: usize,
}

impl UpdateSummary {
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "Scores updated successfully for {} ({} updated, {} skipped)",
            self.class, self.updated, self.skipped
        )
    }
}

/// Facade over store and scraper. Opens the store per call; the scraper
/// client and the per-class update locks are shared across clones.
pub struct SolvetrackApi<S = ProfileFetcher> {
    db_path: PathBuf,
    source: Arc<S>,
    update_locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl<S> Clone for SolvetrackApi<S> {
    fn clone(&self) -> Self {
        Self {
            db_path: self.db_path.clone(),
            source: Arc::clone(&self.source),
            update_locks: Arc::clone(&self.update_locks),
        }
    }
}

impl SolvetrackApi {
    /// Build the production facade with a live profile fetcher.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(db_path: PathBuf, config: FetchConfig) -> Result<Self, ApiError> {
        Ok(Self::with_source(db_path, ProfileFetcher::new(config)?))
    }
}

impl<S: ScoreSource> SolvetrackApi<S> {
    pub fn with_source(db_path: PathBuf, source: S) -> Self {
        Self {
            db_path,
            source: Arc::new(source),
            update_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create the score tables for the configured classes, idempotently.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or a table cannot
    /// be created.
    pub fn init(&self, classes: &[ClassName]) -> Result<(), ApiError> {
        let store = self.open_store()?;
        store.ensure_schema(classes)?;
        Ok(())
    }

    /// All known classes.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or queried.
    pub fn list_classes(&self) -> Result<Vec<ClassName>, ApiError> {
        Ok(self.open_store()?.list_classes()?)
    }

    /// Display rows for one class, in sequence order.
    ///
    /// # Errors
    /// `StoreError::ClassNotFound` (wrapped) when the class is unknown.
    pub fn class_scores(&self, class: &ClassName) -> Result<Vec<StudentScore>, ApiError> {
        Ok(self.open_store()?.list_rows(class)?)
    }

    /// Scrape-and-diff update flow for one class: read usernames, fetch
    /// new counts in order, then per student roll recent into previous,
    /// store the fetched count and the delta.
    ///
    /// Runs for the same class are serialized through a per-class lock;
    /// overlapping read-modify-write sequences would otherwise corrupt the
    /// deltas. A `None` fetch slot skips that student (logged, counted in
    /// the summary). The first store failure aborts the remainder of the
    /// run; rows already written stay written.
    ///
    /// # Errors
    /// `EmptyClass` when the class has no students; store errors for an
    /// unknown class or a row failure mid-run.
    pub async fn update_class(&self, class: &ClassName) -> Result<UpdateSummary, ApiError> {
        let lock = self.class_lock(class);
        let _guard = lock.lock().await;

        let usernames = {
            let store = self.open_store()?;
            store.list_usernames(class)?
        };
        if usernames.is_empty() {
            return Err(ApiError::EmptyClass(class.to_string()));
        }

        tracing::info!(class = %class, students = usernames.len(), "starting score update");
        let fetched = self.source.fetch_batch(&usernames).await;

        let store = self.open_store()?;
        let mut updated = 0usize;
        let mut skipped = 0usize;
        for (username, result) in usernames.iter().zip(&fetched) {
            match result {
                Some(new_count) => {
                    let current = store.get_recent(class, username)?;
                    let update = ScoreUpdate::from_counts(current, *new_count);
                    store.apply_update(class, username, &update)?;
                    updated += 1;
                }
                None => {
                    tracing::warn!(
                        class = %class,
                        username = %username,
                        "fetch failed; keeping previous counts"
                    );
                    skipped += 1;
                }
            }
        }

        let summary = UpdateSummary { class: class.clone(), updated, skipped };
        tracing::info!(class = %class, updated, skipped, "score update finished");
        Ok(summary)
    }

    fn open_store(&self) -> Result<SqliteStore, StoreError> {
        SqliteStore::open(&self.db_path)
    }

    fn class_lock(&self, class: &ClassName) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.update_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(class.to_string()).or_default())
    }
}
