//! # Registry Client
//!
//! Writes agent records to the chain registry and shepherds the
//! transactions through: gas pricing, nonce management, retry with
//! exponential back-off, receipt polling, and the commit-reveal
//! registration flow.
//!
//! ## Transaction policy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     TRANSACTION SUBMISSION POLICY                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  gas limit  = node estimate + 20% margin, capped by configuration      │
//! │  gas price  = node suggestion, capped by configuration                 │
//! │  nonce      = pending nonce from the node                              │
//! │                                                                         │
//! │  every RPC: timeout → retry on transient errors only,                  │
//! │             base delay doubling per attempt, capped at 30 s            │
//! │                                                                         │
//! │  receipt:   poll at fixed interval; with confirmations > 0 also       │
//! │             wait until head - receipt_block ≥ confirmations;          │
//! │             hard timeout 5 minutes                                     │
//! │                                                                         │
//! │  chain ID mismatch between config and node → fail fast (RpcFatal)     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Commit-reveal registration
//!
//! Plain registration is vulnerable to front-running: a mempool observer
//! can steal a DID by submitting the same claim with higher gas. The
//! commit-reveal flow closes this: publish
//! `keccak256(did ‖ keys ‖ sender ‖ salt ‖ chain-id)` first, then reveal
//! the payload between 1 minute and 1 hour later. The registry re-hashes
//! the reveal and rejects missing, early, late, or mismatched reveals.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sha3::{Digest, Keccak256};
use tracing::{debug, info, warn};

use crate::did::chain::{validate_key_type_for_chain, Chain};
use crate::did::rpc::{
    AgentUpdate, ChainRpc, ContractCall, Registration, TransactionReceipt, TransactionRequest,
};
use crate::did::AgentDid;
use crate::crypto::KeyType;
use crate::error::{Error, Result};

/// Minimum delay between commit and reveal (seconds)
pub const MIN_COMMIT_REVEAL_DELAY: i64 = 60;

/// Maximum delay between commit and reveal (seconds)
pub const MAX_COMMIT_REVEAL_DELAY: i64 = 3600;

/// Retry back-off ceiling
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Hard ceiling on waiting for a transaction receipt
const TRANSACTION_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Registry client configuration
///
/// Mirrors the environment a deployment provides: node endpoint identity
/// (expected chain ID), sender, gas ceilings, and retry budget.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Chain this registry lives on
    pub chain: Chain,
    /// Chain ID the node must report
    pub expected_chain_id: u64,
    /// Sender address for all transactions
    pub sender: String,
    /// Upper bound on the gas limit after the safety margin
    pub gas_limit_cap: u64,
    /// Upper bound on the gas price
    pub max_gas_price: u64,
    /// Per-RPC timeout
    pub request_timeout: Duration,
    /// Transient-failure retry budget per RPC
    pub max_retries: u32,
    /// First retry delay; doubles per attempt up to 30 s
    pub retry_base_delay: Duration,
    /// Confirmation depth required beyond the receipt block
    pub confirmations: u64,
    /// Receipt poll interval
    pub receipt_poll_interval: Duration,
}

impl RegistryConfig {
    /// Sensible defaults for a chain and sender
    pub fn new(chain: Chain, expected_chain_id: u64, sender: impl Into<String>) -> Self {
        Self {
            chain,
            expected_chain_id,
            sender: sender.into(),
            gas_limit_cap: 1_000_000,
            max_gas_price: 100_000_000_000,
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            confirmations: 0,
            receipt_poll_interval: Duration::from_millis(200),
        }
    }
}

/// What the caller gets back from a mined registry transaction
#[derive(Debug, Clone)]
pub struct TransactionOutcome {
    /// Transaction hash
    pub tx_hash: String,
    /// Block the transaction landed in
    pub block_number: u64,
    /// Gas consumed
    pub gas_used: u64,
}

/// Client for one chain's agent registry
///
/// Holds a single RPC connection; safe to share across tasks.
pub struct RegistryClient {
    rpc: Arc<dyn ChainRpc>,
    config: RegistryConfig,
}

impl RegistryClient {
    /// Connect and verify the node serves the expected chain
    ///
    /// A chain-ID mismatch is a configuration error, never retried.
    pub async fn connect(rpc: Arc<dyn ChainRpc>, config: RegistryConfig) -> Result<Self> {
        let client = Self { rpc, config };
        let live = client.retrying(|| client.rpc.chain_id()).await?;
        if live != client.config.expected_chain_id {
            return Err(Error::RpcFatal(format!(
                "Node reports chain ID {}, configuration expects {}",
                live, client.config.expected_chain_id
            )));
        }
        debug!(chain = %client.config.chain, chain_id = live, "registry client connected");
        Ok(client)
    }

    /// Register an agent in a single transaction
    ///
    /// Primary key must be chain-appropriate (`WrongKeyForChain`
    /// otherwise); possession proofs on additional signing keys are
    /// checked before anything is submitted.
    pub async fn register(
        &self,
        registration: Registration,
        salt: [u8; 32],
    ) -> Result<TransactionOutcome> {
        validate_key_type_for_chain(registration.public_key.key_type(), self.config.chain)?;
        verify_possession_proofs(&registration)?;

        let outcome = self
            .execute(ContractCall::Register { registration, salt })
            .await?;
        info!(tx = %outcome.tx_hash, block = outcome.block_number, "agent registered");
        Ok(outcome)
    }

    /// Publish the commitment for a later [`RegistryClient::register`]
    /// reveal (front-running protection)
    pub async fn commit(
        &self,
        registration: &Registration,
        salt: &[u8; 32],
    ) -> Result<TransactionOutcome> {
        let commitment = compute_commitment(
            registration,
            &self.config.sender,
            salt,
            self.config.expected_chain_id,
        );
        let outcome = self.execute(ContractCall::Commit { commitment }).await?;
        debug!(tx = %outcome.tx_hash, "registration commitment published");
        Ok(outcome)
    }

    /// Attach an additional key to an agent
    pub async fn add_key(
        &self,
        did: &AgentDid,
        key: crate::did::metadata::AgentKey,
    ) -> Result<TransactionOutcome> {
        verify_key_proof(did, &key)?;
        self.execute(ContractCall::AddKey {
            did: did.clone(),
            key,
        })
        .await
    }

    /// Replace one additional key with another
    pub async fn rotate_key(
        &self,
        did: &AgentDid,
        old_key_id: &str,
        new_key: crate::did::metadata::AgentKey,
    ) -> Result<TransactionOutcome> {
        verify_key_proof(did, &new_key)?;
        self.execute(ContractCall::RotateKey {
            did: did.clone(),
            old_key_id: old_key_id.to_string(),
            new_key,
        })
        .await
    }

    /// Approve an additional key so it becomes verified
    pub async fn approve_key(&self, did: &AgentDid, key_id: &str) -> Result<TransactionOutcome> {
        self.execute(ContractCall::ApproveKey {
            did: did.clone(),
            key_id: key_id.to_string(),
        })
        .await
    }

    /// Revoke an additional key
    pub async fn revoke_key(&self, did: &AgentDid, key_id: &str) -> Result<TransactionOutcome> {
        self.execute(ContractCall::RevokeKey {
            did: did.clone(),
            key_id: key_id.to_string(),
        })
        .await
    }

    /// Apply a partial update to an agent record
    pub async fn update(&self, did: &AgentDid, update: AgentUpdate) -> Result<TransactionOutcome> {
        self.execute(ContractCall::UpdateAgent {
            did: did.clone(),
            update,
        })
        .await
    }

    /// Deactivate an agent
    pub async fn deactivate(&self, did: &AgentDid) -> Result<TransactionOutcome> {
        let outcome = self
            .execute(ContractCall::DeactivateAgent { did: did.clone() })
            .await?;
        info!(%did, tx = %outcome.tx_hash, "agent deactivated");
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Transaction plumbing
    // ------------------------------------------------------------------

    async fn execute(&self, call: ContractCall) -> Result<TransactionOutcome> {
        let tx = self.prepare(call).await?;
        let tx_hash = self
            .retrying(|| self.rpc.send_transaction(tx.clone()))
            .await?;
        let receipt = self.wait_for_transaction(&tx_hash).await?;
        Ok(TransactionOutcome {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }

    /// Estimate, price, and nonce a call per the transaction policy
    async fn prepare(&self, call: ContractCall) -> Result<TransactionRequest> {
        let estimate = self.retrying(|| self.rpc.estimate_gas(&call)).await?;
        let gas_limit = (estimate + estimate / 5).min(self.config.gas_limit_cap);

        let suggested = self.retrying(|| self.rpc.suggested_gas_price()).await?;
        let gas_price = suggested.min(self.config.max_gas_price);

        let nonce = self
            .retrying(|| self.rpc.pending_nonce(&self.config.sender))
            .await?;

        Ok(TransactionRequest {
            sender: self.config.sender.clone(),
            call,
            gas_limit,
            gas_price,
            nonce,
        })
    }

    /// Poll for a receipt, honoring confirmation depth and the 5-minute
    /// hard timeout
    pub async fn wait_for_transaction(&self, tx_hash: &str) -> Result<TransactionReceipt> {
        let deadline = tokio::time::Instant::now() + TRANSACTION_WAIT_TIMEOUT;
        loop {
            if let Some(receipt) = self
                .retrying(|| self.rpc.transaction_receipt(tx_hash))
                .await?
            {
                if self.config.confirmations == 0 {
                    return Ok(receipt);
                }
                let head = self.retrying(|| self.rpc.head_block()).await?;
                if head.saturating_sub(receipt.block_number) >= self.config.confirmations {
                    return Ok(receipt);
                }
                debug!(
                    tx = tx_hash,
                    head,
                    receipt_block = receipt.block_number,
                    "waiting for confirmations"
                );
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::RpcFailure(format!(
                    "Transaction {} not confirmed within {:?}",
                    tx_hash, TRANSACTION_WAIT_TIMEOUT
                )));
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    /// Run an RPC op under the per-request timeout, retrying transient
    /// failures with exponential back-off
    async fn retrying<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.config.retry_base_delay;
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::time::timeout(self.config.request_timeout, op()).await;
            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => Error::RpcFailure("RPC request timed out".into()),
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }
            attempt += 1;
            warn!(attempt, delay = ?delay, error = %err, "retrying RPC call");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_RETRY_DELAY);
        }
    }
}

/// Commitment hash for the commit-reveal flow:
/// `keccak256(did ‖ primary key ‖ additional keys ‖ sender ‖ salt ‖ chain-id)`
///
/// The registry recomputes this from the reveal; any difference in DID,
/// keys, sender, salt, or chain produces a `CommitmentMismatch`.
pub fn compute_commitment(
    registration: &Registration,
    sender: &str,
    salt: &[u8; 32],
    chain_id: u64,
) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(registration.did.as_str().as_bytes());
    hasher.update(registration.public_key.canonical_bytes());
    for key in &registration.keys {
        hasher.update(key.public_key.canonical_bytes());
    }
    hasher.update(sender.as_bytes());
    hasher.update(salt);
    hasher.update(chain_id.to_be_bytes());
    hasher.finalize().into()
}

/// Check possession proofs on additional signing keys
///
/// A proof is the key's signature over the DID string. X25519 keys carry
/// no proof; signing-capable keys with a proof must verify.
fn verify_possession_proofs(registration: &Registration) -> Result<()> {
    for key in &registration.keys {
        verify_key_proof(&registration.did, key)?;
    }
    Ok(())
}

fn verify_key_proof(did: &AgentDid, key: &crate::did::metadata::AgentKey) -> Result<()> {
    match (&key.proof, key.key_type) {
        (None, _) => Ok(()),
        (Some(_), KeyType::X25519) => Err(Error::InvalidKey(
            "X25519 keys cannot carry a possession proof".into(),
        )),
        (Some(proof), _) => key.public_key.verify(did.as_str().as_bytes(), proof),
    }
}

// ============================================================================
// TESTS
// ============================================================================
