//! Test doubles and builders shared by the processor tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nin_bulk_processor::config::ProcessorSettings;
use nin_bulk_processor::db::memory::MemoryStore;
use nin_bulk_processor::db::store::{RecordStore, StoreError};
use nin_bulk_processor::models::job::{BulkVerificationJob, ReportRequest};
use nin_bulk_processor::models::lookup::ResolvedIdentity;
use nin_bulk_processor::models::record::{ClaimedRecord, RecordJobStatus, Resolution, VerificationRecord};
use nin_bulk_processor::services::downstream::{DispatchError, SideEffects};
use nin_bulk_processor::services::driver::BulkProcessor;
use nin_bulk_processor::services::mock_provider::MockProvider;
use nin_bulk_processor::services::provider::{ProviderError, ProviderResponse, VerificationProvider};

/// What a scripted provider answers for a key.
#[derive(Debug, Clone)]
pub enum Script {
    Found,
    NotFound,
    ClientError(&'static str),
    Unexpected(u16),
    Network,
}

/// Provider with fixed per-key answers that counts calls and tracks the
/// highest number of simultaneous calls.
pub struct ScriptedProvider {
    scripts: HashMap<String, Script>,
    default: Script,
    latency: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(default: Script) -> Self {
        Self {
            scripts: HashMap::new(),
            default,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, key: &str, script: Script) -> Self {
        self.scripts.insert(key.to_string(), script);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls().iter().filter(|k| k.as_str() == key).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

pub fn identity() -> ResolvedIdentity {
    ResolvedIdentity {
        first_name: Some("Ada".to_string()),
        middle_name: None,
        last_name: Some("Obi".to_string()),
        gender: Some("Female".to_string()),
        mobile: Some("08000000000".to_string()),
        date_of_birth: Some("1990-05-17".to_string()),
        photo: None,
    }
}

#[async_trait]
impl VerificationProvider for ScriptedProvider {
    async fn resolve(
        &self,
        search_parameter: &str,
        _subject_consent: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.lock().unwrap().push(search_parameter.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = self.scripts.get(search_parameter).unwrap_or(&self.default).clone();
        match script {
            Script::Found => Ok(ProviderResponse::Found(identity())),
            Script::NotFound => Ok(ProviderResponse::NotFound { status: "not_found".to_string() }),
            Script::ClientError(message) => Ok(ProviderResponse::ClientError { message: message.to_string() }),
            Script::Unexpected(http_status) => Ok(ProviderResponse::Unexpected { http_status }),
            Script::Network => Err(ProviderError::Network),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Notification(i64),
    Report(ReportRequest),
}

/// Side-effect sink that records every dispatch; optionally fails them.
#[derive(Default)]
pub struct RecordingSideEffects {
    dispatched: Mutex<Vec<Dispatched>>,
    fail: bool,
}

impl RecordingSideEffects {
    pub fn failing() -> Self {
        Self { dispatched: Mutex::new(Vec::new()), fail: true }
    }

    pub fn dispatched(&self) -> Vec<Dispatched> {
        self.dispatched.lock().unwrap().clone()
    }

    fn result(&self) -> Result<(), DispatchError> {
        if self.fail {
            Err(DispatchError::Rejected { url: "http://node.test".to_string(), status: 502 })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SideEffects for RecordingSideEffects {
    async fn notify_completion(&self, bulk_pk: i64) -> Result<(), DispatchError> {
        self.dispatched.lock().unwrap().push(Dispatched::Notification(bulk_pk));
        self.result()
    }

    async fn request_report(&self, report: &ReportRequest) -> Result<(), DispatchError> {
        self.dispatched.lock().unwrap().push(Dispatched::Report(report.clone()));
        self.result()
    }
}

pub fn settings(batch_size: u32) -> ProcessorSettings {
    ProcessorSettings {
        batch_size,
        max_concurrency: 16,
        round_delay: Duration::ZERO,
    }
}

/// Everything a test needs to drive and inspect one processor.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub live: Arc<ScriptedProvider>,
    pub side_effects: Arc<RecordingSideEffects>,
    pub processor: BulkProcessor,
}

/// Live mode goes to `live`; mock mode uses the real mock provider without
/// latency.
pub fn harness(live: ScriptedProvider, settings: ProcessorSettings) -> Harness {
    harness_with(live, RecordingSideEffects::default(), settings)
}

pub fn harness_with(
    live: ScriptedProvider,
    side_effects: RecordingSideEffects,
    settings: ProcessorSettings,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let live = Arc::new(live);
    let side_effects = Arc::new(side_effects);
    let processor = BulkProcessor::new(
        store.clone(),
        store.clone(),
        live.clone(),
        Arc::new(MockProvider::without_latency()),
        side_effects.clone(),
        settings,
    );
    Harness { store, live, side_effects, processor }
}

/// Wraps a [`MemoryStore`] to answer some claims with nothing, as if
/// another driver held every row, and to fail job completion for chosen
/// bulks.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    empty_claims: AtomicUsize,
    claims: AtomicUsize,
    failing_completions: Mutex<HashSet<i64>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            empty_claims: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
            failing_completions: Mutex::new(HashSet::new()),
        }
    }

    /// The next `count` claims return no records.
    pub fn empty_claims(&self, count: usize) {
        self.empty_claims.store(count, Ordering::SeqCst);
    }

    /// Claims attempted so far, empty ones included.
    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn fail_completion_of(&self, bulk_pk: i64) {
        self.failing_completions.lock().unwrap().insert(bulk_pk);
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn find_job(&self, bulk_pk: i64) -> Result<Option<BulkVerificationJob>, StoreError> {
        self.inner.find_job(bulk_pk).await
    }

    async fn start_job(&self, bulk_pk: i64) -> Result<bool, StoreError> {
        self.inner.start_job(bulk_pk).await
    }

    async fn count_unprocessed(&self, bulk_pk: i64) -> Result<i64, StoreError> {
        self.inner.count_unprocessed(bulk_pk).await
    }

    async fn claim_batch(&self, bulk_pk: i64, limit: i64) -> Result<Vec<ClaimedRecord>, StoreError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let skip = self
            .empty_claims
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if skip {
            return Ok(Vec::new());
        }
        self.inner.claim_batch(bulk_pk, limit).await
    }

    async fn complete_record(
        &self,
        record_pk: i64,
        resolution: &Resolution,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.complete_record(record_pk, resolution, at).await
    }

    async fn count_incomplete(&self, bulk_pk: i64) -> Result<i64, StoreError> {
        self.inner.count_incomplete(bulk_pk).await
    }

    async fn complete_job(
        &self,
        bulk_pk: i64,
        completed_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.failing_completions.lock().unwrap().contains(&bulk_pk) {
            return Err(StoreError::Unavailable(format!("completion of bulk {} refused", bulk_pk)));
        }
        self.inner.complete_job(bulk_pk, completed_at, expires_at).await
    }

    async fn requeue_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        self.inner.requeue_stale(stale_before).await
    }

    async fn stalled_jobs(&self, stale_before: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        self.inner.stalled_jobs(stale_before).await
    }

    async fn unfinalized_jobs(&self) -> Result<Vec<i64>, StoreError> {
        self.inner.unfinalized_jobs().await
    }
}

/// Like [`harness`], but the processor talks to the store through a
/// [`FaultyStore`]. `Harness::store` is the underlying memory store.
pub fn faulty_harness(live: ScriptedProvider, settings: ProcessorSettings) -> (Harness, Arc<FaultyStore>) {
    let store = Arc::new(MemoryStore::new());
    let faulty = Arc::new(FaultyStore::new(store.clone()));
    let live = Arc::new(live);
    let side_effects = Arc::new(RecordingSideEffects::default());
    let processor = BulkProcessor::new(
        faulty.clone(),
        store.clone(),
        live.clone(),
        Arc::new(MockProvider::without_latency()),
        side_effects.clone(),
        settings,
    );
    (Harness { store, live, side_effects, processor }, faulty)
}

/// Asserts that the record is COMPLETED with one of the defined outcome tuples.
pub fn assert_terminal(record: &VerificationRecord) {
    assert_eq!(record.job_status, Some(RecordJobStatus::Completed), "record {} not completed", record.pk);
    assert!(
        record.terminal_resolution().is_some(),
        "record {} has an invalid outcome tuple: {:?}",
        record.pk,
        record
    );
}
