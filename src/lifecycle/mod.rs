//! Lifecycle engine
//!
//! Runs every batch transition through the dual-write protocol:
//!
//! 1. guard, state and payload checks ([`state_machine`]);
//! 2. one atomic conditional write of the new state, `ledgerSync = pending`
//!    and the journal row;
//! 3. the matching ledger call, bounded by a timeout;
//! 4. the ledger outcome written back as an annotation.
//!
//! The committed business state is never rolled back. Ledger failures come
//! back to the caller as [`LedgerOutcome::Failed`], next to the new batch.

pub mod state_machine;

use chrono::Utc;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::domain::{
    Batch, BatchId, CreateBatchRequest, LedgerSync, ManufacturerDetails, Principal, SyncState,
    Transition,
};
use crate::infra::{
    BatchError, BatchRepository, LedgerAnnotation, Result, Retry, RetryConfig,
};
use crate::ledger::{LedgerClient, LedgerError, LedgerWrite, TxHash};
use crate::metrics::{metric_names, timed, MetricsRegistry};

pub use state_machine::{plan_creation, plan_transition, Command};

/// Lost compare-and-set races tolerated before giving up
const MAX_CAS_ATTEMPTS: u32 = 3;

/// Generated ids that may collide before creation gives up
const MAX_ID_ATTEMPTS: u32 = 3;

/// When the caller learns the ledger outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Await the ledger call, bounded by the ledger timeout
    #[default]
    Await,
    /// Return right after the commit; the ledger call runs on a spawned task
    Background,
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "await" => Ok(WriteMode::Await),
            "background" => Ok(WriteMode::Background),
            other => Err(format!("unknown ledger write mode: {other}")),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub ledger_timeout: Duration,
    pub write_mode: WriteMode,
    pub batch_id_prefix: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ledger_timeout: Duration::from_millis(15_000),
            write_mode: WriteMode::Await,
            batch_id_prefix: "VC".to_string(),
        }
    }
}

impl LifecycleConfig {
    /// `LEDGER_TIMEOUT_MS`, `LEDGER_WRITE_MODE`, `BATCH_ID_PREFIX`
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let ledger_timeout = match std::env::var("LEDGER_TIMEOUT_MS") {
            Ok(v) => Duration::from_millis(v.parse().map_err(|_| {
                BatchError::Configuration(format!("LEDGER_TIMEOUT_MS is not a number: {v}"))
            })?),
            Err(_) => defaults.ledger_timeout,
        };
        let write_mode = match std::env::var("LEDGER_WRITE_MODE") {
            Ok(v) => v.parse().map_err(BatchError::Configuration)?,
            Err(_) => defaults.write_mode,
        };
        let batch_id_prefix =
            std::env::var("BATCH_ID_PREFIX").unwrap_or(defaults.batch_id_prefix);
        if !BatchId::is_well_formed(&batch_id_prefix) {
            return Err(BatchError::Configuration(format!(
                "BATCH_ID_PREFIX is not a valid id prefix: {batch_id_prefix}"
            )));
        }

        Ok(Self {
            ledger_timeout,
            write_mode,
            batch_id_prefix,
        })
    }
}

/// What happened to the ledger mirror of a committed transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Confirmed { tx_hash: TxHash },
    Failed { error: LedgerError },
    /// Submitted in the background; see `ledgerSync` later
    Pending,
}

impl LedgerOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, LedgerOutcome::Confirmed { .. })
    }

    pub fn state(&self) -> SyncState {
        match self {
            LedgerOutcome::Confirmed { .. } => SyncState::Confirmed,
            LedgerOutcome::Failed { .. } => SyncState::Failed,
            LedgerOutcome::Pending => SyncState::Pending,
        }
    }
}

/// Result of a successful transition: the committed batch plus the ledger flag
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub batch: Batch,
    pub ledger: LedgerOutcome,
}

/// Submits a committed transition to the ledger and records the outcome.
#[derive(Clone)]
struct LedgerMirror {
    repo: Arc<dyn BatchRepository>,
    ledger: Arc<dyn LedgerClient>,
    metrics: Arc<MetricsRegistry>,
    timeout: Duration,
    retry: Arc<Retry>,
}

impl LedgerMirror {
    /// Returns the observed outcome, and the annotation if it was persisted.
    async fn mirror(
        &self,
        transition: Transition,
        batch: &Batch,
        actor: &Principal,
    ) -> (LedgerOutcome, Option<LedgerAnnotation>) {
        let write = LedgerWrite::for_transition(transition, batch, actor);

        let started = Instant::now();
        let submitted = tokio::time::timeout(self.timeout, write.submit(self.ledger.as_ref()));
        let result = match submitted.await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout),
        };
        self.metrics
            .observe_histogram(metric_names::LEDGER_LATENCY, started.elapsed().as_secs_f64())
            .await;

        let (outcome, annotation) = match result {
            Ok(tx_hash) => {
                info!(
                    batch_id = %batch.batch_id,
                    revision = batch.revision,
                    transition = %transition,
                    tx_hash = %tx_hash,
                    "ledger write confirmed"
                );
                self.metrics
                    .inc_labeled(metric_names::LEDGER_CONFIRMED, transition.as_str())
                    .await;
                let annotation = LedgerAnnotation {
                    state: SyncState::Confirmed,
                    tx_hash: Some(tx_hash.to_string()),
                    error: None,
                    completed_at: Utc::now(),
                };
                (LedgerOutcome::Confirmed { tx_hash }, annotation)
            }
            Err(error) => {
                warn!(
                    batch_id = %batch.batch_id,
                    revision = batch.revision,
                    transition = %transition,
                    error = %error,
                    "ledger write failed, off-chain state kept"
                );
                self.metrics
                    .inc_labeled(metric_names::LEDGER_FAILED, error.kind())
                    .await;
                let annotation = LedgerAnnotation {
                    state: SyncState::Failed,
                    tx_hash: None,
                    error: Some(error.to_string()),
                    completed_at: Utc::now(),
                };
                (LedgerOutcome::Failed { error }, annotation)
            }
        };

        let recorded = self
            .retry
            .run_db("record ledger outcome", || {
                self.repo
                    .record_ledger_outcome(&batch.batch_id, batch.revision, &annotation)
            })
            .await;

        match recorded {
            Ok(true) => (outcome, Some(annotation)),
            Ok(false) => {
                warn!(
                    batch_id = %batch.batch_id,
                    revision = batch.revision,
                    "newer revision committed, ledger outcome kept in journal only"
                );
                self.metrics
                    .inc_counter(metric_names::LEDGER_STALE_ANNOTATIONS)
                    .await;
                (outcome, Some(annotation))
            }
            Err(e) => {
                error!(
                    batch_id = %batch.batch_id,
                    revision = batch.revision,
                    error = %e,
                    "failed to record ledger outcome, batch stays pending"
                );
                self.metrics
                    .inc_counter(metric_names::LEDGER_ANNOTATION_ERRORS)
                    .await;
                (outcome, None)
            }
        }
    }
}

fn annotate(sync: &mut LedgerSync, annotation: &LedgerAnnotation) {
    sync.state = annotation.state;
    sync.tx_hash = annotation.tx_hash.clone();
    sync.last_error = annotation.error.clone();
    sync.completed_at = Some(annotation.completed_at);
}

/// Entry point for every batch mutation
pub struct LifecycleEngine {
    repo: Arc<dyn BatchRepository>,
    mirror: LedgerMirror,
    metrics: Arc<MetricsRegistry>,
    config: LifecycleConfig,
}

impl LifecycleEngine {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        ledger: Arc<dyn LedgerClient>,
        metrics: Arc<MetricsRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        let mirror = LedgerMirror {
            repo: repo.clone(),
            ledger,
            metrics: metrics.clone(),
            timeout: config.ledger_timeout,
            retry: Arc::new(Retry::new(RetryConfig::database())),
        };
        Self {
            repo,
            mirror,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Register a new harvest. Farmers only.
    pub async fn create_batch(
        &self,
        principal: &Principal,
        request: &CreateBatchRequest,
    ) -> Result<TransitionOutcome> {
        let result = self.commit_creation(principal, request).await;
        self.finish(Transition::Create, principal, result).await
    }

    pub async fn verify(
        &self,
        principal: &Principal,
        batch_id: &BatchId,
        remarks: impl Into<String>,
    ) -> Result<TransitionOutcome> {
        let command = Command::Verify {
            remarks: remarks.into(),
        };
        self.transition(principal, batch_id, command).await
    }

    pub async fn reject(
        &self,
        principal: &Principal,
        batch_id: &BatchId,
        remarks: impl Into<String>,
    ) -> Result<TransitionOutcome> {
        let command = Command::Reject {
            remarks: remarks.into(),
        };
        self.transition(principal, batch_id, command).await
    }

    pub async fn collect(
        &self,
        principal: &Principal,
        batch_id: &BatchId,
    ) -> Result<TransitionOutcome> {
        self.transition(principal, batch_id, Command::Collect).await
    }

    pub async fn update_manufacturer_details(
        &self,
        principal: &Principal,
        batch_id: &BatchId,
        details: ManufacturerDetails,
    ) -> Result<TransitionOutcome> {
        self.transition(principal, batch_id, Command::UpdateManufacturerDetails(details))
            .await
    }

    /// Plan and commit `command`, then mirror it.
    pub async fn transition(
        &self,
        principal: &Principal,
        batch_id: &BatchId,
        command: Command,
    ) -> Result<TransitionOutcome> {
        let transition = command.transition();
        let result = self.commit_transition(principal, batch_id, &command).await;
        self.finish(transition, principal, result).await
    }

    async fn commit_creation(
        &self,
        principal: &Principal,
        request: &CreateBatchRequest,
    ) -> Result<Batch> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (batch, record) =
                plan_creation(principal, request, &self.config.batch_id_prefix, Utc::now())?;

            let inserted = timed(
                &self.metrics,
                metric_names::COMMIT_LATENCY,
                self.repo.insert(&batch, &record),
            )
            .await;

            match inserted {
                Ok(()) => return Ok(batch),
                // Only generated identifiers are worth another draw.
                Err(BatchError::DuplicateBatch(id))
                    if request.batch_id.is_none() && attempt < MAX_ID_ATTEMPTS =>
                {
                    debug!(batch_id = %id, attempt, "generated identifier taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn commit_transition(
        &self,
        principal: &Principal,
        batch_id: &BatchId,
        command: &Command,
    ) -> Result<Batch> {
        let transition = command.transition();
        auth::authorize_role(principal, transition)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self
                .repo
                .get(batch_id)
                .await?
                .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))?;

            let update = plan_transition(principal, &current, command, Utc::now())?;

            let applied = timed(
                &self.metrics,
                metric_names::COMMIT_LATENCY,
                self.repo.apply_transition(&update),
            )
            .await?;
            if applied {
                return Ok(update.batch);
            }

            self.metrics.inc_counter(metric_names::CAS_CONFLICTS).await;
            debug!(
                batch_id = %batch_id,
                revision = current.revision,
                transition = %transition,
                attempt,
                "batch changed concurrently, re-reading"
            );
            if attempt >= MAX_CAS_ATTEMPTS {
                return Err(BatchError::invalid_transition(batch_id, transition, current.status)
                    .with_detail("concurrent modification"));
            }
        }
    }

    async fn finish(
        &self,
        transition: Transition,
        principal: &Principal,
        committed: Result<Batch>,
    ) -> Result<TransitionOutcome> {
        let mut batch = match committed {
            Ok(batch) => batch,
            Err(e) => {
                self.metrics
                    .inc_labeled(metric_names::TRANSITIONS_REFUSED, e.kind())
                    .await;
                return Err(e);
            }
        };

        info!(
            batch_id = %batch.batch_id,
            revision = batch.revision,
            transition = %transition,
            status = %batch.status,
            principal = %principal,
            "transition committed"
        );
        self.metrics
            .inc_labeled(metric_names::TRANSITIONS_COMMITTED, transition.as_str())
            .await;

        match self.config.write_mode {
            WriteMode::Background => {
                self.metrics
                    .inc_labeled(metric_names::LEDGER_BACKGROUND, transition.as_str())
                    .await;
                let mirror = self.mirror.clone();
                let snapshot = batch.clone();
                let actor = principal.clone();
                tokio::spawn(async move {
                    mirror.mirror(transition, &snapshot, &actor).await;
                });
                Ok(TransitionOutcome {
                    batch,
                    ledger: LedgerOutcome::Pending,
                })
            }
            WriteMode::Await => {
                let (ledger, annotation) = self.mirror.mirror(transition, &batch, principal).await;
                if let Some(annotation) = annotation {
                    annotate(&mut batch.ledger_sync, &annotation);
                }
                Ok(TransitionOutcome { batch, ledger })
            }
        }
    }
}
