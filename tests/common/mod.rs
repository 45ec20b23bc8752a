//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use herbtrace::domain::{BatchId, CreateBatchRequest, Location, Principal, QuantityInput};
use herbtrace::infra::SqliteBatchRepository;
use herbtrace::ledger::{
    LedgerClient, LedgerError, ManufacturerSubmission, OnChainRecord, RecordSubmission,
    StatusSubmission, TxHash,
};
use herbtrace::lifecycle::{LifecycleConfig, LifecycleEngine, WriteMode};
use herbtrace::metrics::MetricsRegistry;
use herbtrace::projection::QueryService;

pub const LEDGER_TIMEOUT: Duration = Duration::from_millis(150);

pub fn farmer() -> Principal {
    Principal::farmer("farmer-F")
}

pub fn admin() -> Principal {
    Principal::admin("admin-A")
}

pub fn manufacturer(id: &str) -> Principal {
    Principal::manufacturer(id)
}

/// Tulsi, 10 kg, with a caller-chosen batch id
pub fn tulsi(batch_id: &str) -> CreateBatchRequest {
    CreateBatchRequest {
        batch_id: Some(batch_id.to_string()),
        herb_name: Some("Tulsi".to_string()),
        quantity: Some(QuantityInput::Number(10.0)),
        unit: Some("kg".to_string()),
        harvest_date: Some("2024-03-01".to_string()),
        location: Location {
            village: Some("Rampur".to_string()),
            state: Some("Uttarakhand".to_string()),
            ..Default::default()
        },
        certifications: vec!["organic".to_string()],
        ..Default::default()
    }
}

/// How the scripted ledger answers the next calls
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(LedgerError),
    /// Never answers within any test timeout
    Hang,
}

/// In-process ledger whose behaviour is set per test.
///
/// Successful writes are kept so `fetch_record` can answer like a chain would.
pub struct ScriptedLedger {
    script: Mutex<Script>,
    fetch_script: Mutex<Script>,
    records: Mutex<HashMap<BatchId, OnChainRecord>>,
    calls: Mutex<Vec<String>>,
    tx_counter: AtomicU64,
}

impl ScriptedLedger {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            fetch_script: Mutex::new(Script::Succeed),
            records: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            tx_counter: AtomicU64::new(0),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn set_fetch_script(&self, script: Script) {
        *self.fetch_script.lock().unwrap() = script;
    }

    /// Names of write calls, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn play(&self, call: &str) -> Result<TxHash, LedgerError> {
        self.calls.lock().unwrap().push(call.to_string());
        let script = self.script.lock().unwrap().clone();
        match script {
            Script::Succeed => {
                let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(TxHash(format!("0x{n:064x}")))
            }
            Script::Fail(e) => Err(e),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(LedgerError::Timeout)
            }
        }
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn submit_record(&self, record: &RecordSubmission) -> Result<TxHash, LedgerError> {
        let hash = self.play("submit_record").await?;
        self.records.lock().unwrap().insert(
            record.batch_id.clone(),
            OnChainRecord {
                batch_id: record.batch_id.clone(),
                herb_name: record.herb_name.clone(),
                status: "pending_verification".to_string(),
                quantity_milli: record.quantity_milli,
                unit: record.unit.clone(),
                harvest_timestamp: record.harvest_timestamp,
                farmer_id: record.farmer.farmer_id.clone(),
            },
        );
        Ok(hash)
    }

    async fn submit_status_update(&self, update: &StatusSubmission) -> Result<TxHash, LedgerError> {
        let hash = self.play("submit_status_update").await?;
        if let Some(record) = self.records.lock().unwrap().get_mut(&update.batch_id) {
            record.status = update.status.as_str().to_string();
        }
        Ok(hash)
    }

    async fn submit_manufacturer_update(
        &self,
        update: &ManufacturerSubmission,
    ) -> Result<TxHash, LedgerError> {
        let hash = self.play("submit_manufacturer_update").await?;
        if update.processed {
            if let Some(record) = self.records.lock().unwrap().get_mut(&update.batch_id) {
                record.status = "processed".to_string();
            }
        }
        Ok(hash)
    }

    async fn fetch_record(&self, batch_id: &BatchId) -> Result<Option<OnChainRecord>, LedgerError> {
        let script = self.fetch_script.lock().unwrap().clone();
        match script {
            Script::Succeed => Ok(self.records.lock().unwrap().get(batch_id).cloned()),
            Script::Fail(e) => Err(e),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

/// Engine, queries and store over a private in-memory database
pub struct Harness {
    pub repo: Arc<SqliteBatchRepository>,
    pub ledger: Arc<ScriptedLedger>,
    pub engine: LifecycleEngine,
    pub queries: QueryService,
    pub metrics: Arc<MetricsRegistry>,
}

impl Harness {
    pub async fn new(script: Script) -> Self {
        Self::with_mode(script, WriteMode::Await).await
    }

    pub async fn with_mode(script: Script, write_mode: WriteMode) -> Self {
        let repo = Arc::new(SqliteBatchRepository::in_memory().await.unwrap());
        let ledger = ScriptedLedger::new(script);
        let metrics = Arc::new(MetricsRegistry::new());
        let config = LifecycleConfig {
            ledger_timeout: LEDGER_TIMEOUT,
            write_mode,
            ..Default::default()
        };
        let engine = LifecycleEngine::new(repo.clone(), ledger.clone(), metrics.clone(), config);
        let queries = QueryService::new(repo.clone(), ledger.clone(), LEDGER_TIMEOUT);
        Self {
            repo,
            ledger,
            engine,
            queries,
            metrics,
        }
    }
}
