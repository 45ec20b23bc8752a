//! EVM ledger client
//!
//! Mirrors batch transitions to the `BatchLifecycle` contract.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use alloy::transports::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    LedgerClient, LedgerError, ManufacturerSubmission, OnChainRecord, RecordSubmission,
    StatusSubmission, TxHash,
};
use crate::domain::BatchId;
use crate::infra::{BatchError, Result};

/// Sepolia, where the batch contract is deployed by default.
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;

sol! {
    #[sol(rpc)]
    interface IBatchLifecycle {
        struct FarmerInfo {
            string farmerId;
            string village;
            string city;
            string pincode;
            string state;
        }

        function recordBatch(
            string batchId,
            string herbName,
            FarmerInfo farmer,
            uint256 quantityMilli,
            string unit,
            uint64 harvestTimestamp,
            string[] certifications,
            string additionalInfo
        ) external;

        function updateStatus(
            string batchId,
            string status,
            string remarks,
            string actorId,
            string actorRole,
            uint64 decidedAt
        ) external;

        function updateManufacturerDetails(
            string batchId,
            string processingDetails,
            string remarks,
            string storageLocation,
            string batchNumber,
            bool processed
        ) external;

        function getBatch(string batchId) external view returns (
            bool exists,
            string herbName,
            string status,
            uint256 quantityMilli,
            string unit,
            uint64 harvestTimestamp,
            string farmerId
        );
    }
}

/// Ledger connection settings
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    pub private_key: String,
    pub chain_id: u64,
}

impl LedgerConfig {
    /// Load from `LEDGER_RPC_URL`, `LEDGER_CONTRACT_ADDRESS`, `LEDGER_PRIVATE_KEY`
    /// and `LEDGER_CHAIN_ID`. Returns `None` unless the first three are set.
    pub fn from_env() -> Option<Self> {
        let rpc_url = std::env::var("LEDGER_RPC_URL").ok()?;
        let contract_address = std::env::var("LEDGER_CONTRACT_ADDRESS")
            .ok()
            .and_then(|s| s.parse().ok())?;
        let private_key = std::env::var("LEDGER_PRIVATE_KEY").ok()?;
        let chain_id = std::env::var("LEDGER_CHAIN_ID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CHAIN_ID);

        Some(Self {
            rpc_url,
            contract_address,
            private_key,
            chain_id,
        })
    }
}

/// Ledger client backed by an EVM JSON-RPC node.
pub struct EvmLedgerClient {
    rpc_url: Url,
    contract_address: Address,
    wallet: EthereumWallet,
    chain_id: u64,
}

impl EvmLedgerClient {
    pub fn new(config: LedgerConfig) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key
            .parse()
            .map_err(|e| BatchError::Configuration(format!("invalid ledger private key: {e}")))?;
        let rpc_url: Url = config
            .rpc_url
            .parse()
            .map_err(|e| BatchError::Configuration(format!("invalid ledger RPC URL: {e}")))?;

        info!(
            contract = %config.contract_address,
            chain_id = config.chain_id,
            signer = %signer.address(),
            "ledger client configured"
        );

        Ok(Self {
            rpc_url,
            contract_address: config.contract_address,
            wallet: EthereumWallet::from(signer),
            chain_id: config.chain_id,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn tx_hash(
        batch_id: &BatchId,
        receipt: &TransactionReceipt,
    ) -> std::result::Result<TxHash, LedgerError> {
        let hash = TxHash::from_bytes(receipt.transaction_hash.0);
        if !receipt.status() {
            warn!(batch_id = %batch_id, tx_hash = %hash, "ledger transaction reverted");
            return Err(LedgerError::Rejected(format!("transaction {hash} reverted")));
        }
        info!(
            batch_id = %batch_id,
            tx_hash = %hash,
            block = receipt.block_number.unwrap_or(0),
            "ledger transaction confirmed"
        );
        Ok(hash)
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    async fn submit_record(
        &self,
        record: &RecordSubmission,
    ) -> std::result::Result<TxHash, LedgerError> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());
        let contract = IBatchLifecycle::new(self.contract_address, &provider);

        let farmer = IBatchLifecycle::FarmerInfo {
            farmerId: record.farmer.farmer_id.clone(),
            village: record.farmer.village.clone(),
            city: record.farmer.city.clone(),
            pincode: record.farmer.pincode.clone(),
            state: record.farmer.state.clone(),
        };

        let pending = contract
            .recordBatch(
                record.batch_id.to_string(),
                record.herb_name.clone(),
                farmer,
                U256::from(record.quantity_milli),
                record.unit.clone(),
                record.harvest_timestamp.max(0) as u64,
                record.certifications.clone(),
                record.additional_info.clone(),
            )
            .send()
            .await
            .map_err(classify_contract_error)?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("receipt unavailable: {e}")))?;

        Self::tx_hash(&record.batch_id, &receipt)
    }

    async fn submit_status_update(
        &self,
        update: &StatusSubmission,
    ) -> std::result::Result<TxHash, LedgerError> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());
        let contract = IBatchLifecycle::new(self.contract_address, &provider);

        let pending = contract
            .updateStatus(
                update.batch_id.to_string(),
                update.status.as_str().to_string(),
                update.remarks.clone(),
                update.actor.id.to_string(),
                update.actor.role.as_str().to_string(),
                update.at.timestamp().max(0) as u64,
            )
            .send()
            .await
            .map_err(classify_contract_error)?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("receipt unavailable: {e}")))?;

        Self::tx_hash(&update.batch_id, &receipt)
    }

    async fn submit_manufacturer_update(
        &self,
        update: &ManufacturerSubmission,
    ) -> std::result::Result<TxHash, LedgerError> {
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.clone());
        let contract = IBatchLifecycle::new(self.contract_address, &provider);

        let pending = contract
            .updateManufacturerDetails(
                update.batch_id.to_string(),
                update.processing_details.clone(),
                update.remarks.clone(),
                update.storage_location.clone(),
                update.batch_number.clone(),
                update.processed,
            )
            .send()
            .await
            .map_err(classify_contract_error)?;

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Unavailable(format!("receipt unavailable: {e}")))?;

        Self::tx_hash(&update.batch_id, &receipt)
    }

    async fn fetch_record(
        &self,
        batch_id: &BatchId,
    ) -> std::result::Result<Option<OnChainRecord>, LedgerError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let contract = IBatchLifecycle::new(self.contract_address, &provider);

        let found = contract
            .getBatch(batch_id.to_string())
            .call()
            .await
            .map_err(classify_contract_error)?;

        if !found.exists {
            return Ok(None);
        }

        Ok(Some(OnChainRecord {
            batch_id: batch_id.clone(),
            herb_name: found.herbName,
            status: found.status,
            quantity_milli: found.quantityMilli.saturating_to::<u64>(),
            unit: found.unit,
            harvest_timestamp: found.harvestTimestamp as i64,
            farmer_id: found.farmerId,
        }))
    }
}

/// JSON-RPC error responses (reverts, nonce or gas refusals) mean the node
/// answered and refused; anything else at the transport layer means it could
/// not be reached.
fn classify_rpc_error(err: &RpcError<TransportErrorKind>) -> LedgerError {
    if err.is_error_resp() {
        LedgerError::Rejected(err.to_string())
    } else {
        LedgerError::Unavailable(err.to_string())
    }
}

fn classify_contract_error(err: alloy::contract::Error) -> LedgerError {
    match &err {
        alloy::contract::Error::TransportError(rpc) => classify_rpc_error(rpc),
        _ => LedgerError::Rejected(err.to_string()),
    }
}
