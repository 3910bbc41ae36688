//! # Chain RPC Contract
//!
//! The abstract surface the registry client and resolver speak to a
//! chain through. Concrete JSON-RPC/websocket transports live outside
//! this crate; what matters here is the contract shape:
//!
//! - transaction plumbing: chain ID, head block, gas estimation, gas
//!   price, pending nonce, submission, receipts
//! - the registry read surface: `get_agent`, `is_agent_active`,
//!   `agents_by_owner`
//!
//! [`InMemoryChain`] implements the whole surface against process-local
//! state. It drives the unit tests and doubles as the reference for what
//! a conforming registry does: commit-reveal windows, duplicate-DID
//! rejection, key verification rules, and owner-only mutation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::did::metadata::{AgentKey, AgentMetadata};
use crate::did::registry::{compute_commitment, MAX_COMMIT_REVEAL_DELAY, MIN_COMMIT_REVEAL_DELAY};
use crate::did::AgentDid;
use crate::crypto::KeyType;
use crate::error::{Error, Result};
use crate::time;

/// A registration payload as submitted on-chain
#[derive(Debug, Clone)]
pub struct Registration {
    /// The DID being claimed
    pub did: AgentDid,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Agent endpoint URL
    pub endpoint: String,
    /// Capability map
    pub capabilities: std::collections::BTreeMap<String, String>,
    /// Primary signing key
    pub public_key: crate::crypto::PublicKey,
    /// Additional keys, each with a possession proof where required
    pub keys: Vec<AgentKey>,
}

/// Partial update applied by the owning address
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    /// New display name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New endpoint URL
    pub endpoint: Option<String>,
    /// Replacement capability map
    pub capabilities: Option<std::collections::BTreeMap<String, String>>,
}

/// One contract invocation
#[derive(Debug, Clone)]
pub enum ContractCall {
    /// Commit-reveal first phase: publish the commitment hash
    Commit {
        /// keccak256 over the reveal payload
        commitment: [u8; 32],
    },
    /// Register a new agent (the reveal, when commit-reveal is active)
    Register {
        /// Registration payload
        registration: Registration,
        /// Salt bound into the commitment
        salt: [u8; 32],
    },
    /// Mutate an existing agent
    UpdateAgent {
        /// Target agent
        did: AgentDid,
        /// Fields to change
        update: AgentUpdate,
    },
    /// Deactivate an agent
    DeactivateAgent {
        /// Target agent
        did: AgentDid,
    },
    /// Attach an additional key to an agent
    AddKey {
        /// Target agent
        did: AgentDid,
        /// Key to attach (with possession proof where required)
        key: AgentKey,
    },
    /// Mark an additional key as verified
    ApproveKey {
        /// Target agent
        did: AgentDid,
        /// Key ID of the key to approve
        key_id: String,
    },
    /// Remove an additional key
    RevokeKey {
        /// Target agent
        did: AgentDid,
        /// Key ID of the key to revoke
        key_id: String,
    },
    /// Replace one additional key with another in a single transaction
    RotateKey {
        /// Target agent
        did: AgentDid,
        /// Key ID being retired
        old_key_id: String,
        /// Replacement key
        new_key: AgentKey,
    },
}

/// A signed, priced, nonce-stamped transaction ready for submission
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    /// Sender address
    pub sender: String,
    /// Contract invocation
    pub call: ContractCall,
    /// Gas limit after the safety margin
    pub gas_limit: u64,
    /// Gas price after the configured cap
    pub gas_price: u64,
    /// Pending nonce
    pub nonce: u64,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    /// Transaction hash
    pub tx_hash: String,
    /// Block the transaction landed in
    pub block_number: u64,
    /// Gas consumed
    pub gas_used: u64,
}

/// Abstract chain transport
///
/// One connection per registry client; implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Chain ID the node reports
    async fn chain_id(&self) -> Result<u64>;

    /// Current head block number
    async fn head_block(&self) -> Result<u64>;

    /// Node's gas estimate for a call (before safety margin)
    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64>;

    /// Node's suggested gas price (before cap)
    async fn suggested_gas_price(&self) -> Result<u64>;

    /// Pending-nonce for a sender
    async fn pending_nonce(&self, sender: &str) -> Result<u64>;

    /// Submit a transaction, returning its hash
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<String>;

    /// Receipt for a submitted transaction, if mined
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>>;

    /// Full agent record for a DID
    async fn get_agent(&self, did: &AgentDid) -> Result<Option<AgentMetadata>>;

    /// Whether the agent exists and is active
    async fn is_agent_active(&self, did: &AgentDid) -> Result<bool>;

    /// All agents registered by an owner address
    async fn agents_by_owner(&self, owner: &str) -> Result<Vec<AgentMetadata>>;

    /// Every registered agent (search support; registries expose this
    /// via enumeration events or an indexer)
    async fn all_agents(&self) -> Result<Vec<AgentMetadata>>;
}

// ============================================================================
// IN-MEMORY CHAIN
// ============================================================================

struct ChainState {
    now: i64,
    head: u64,
    tx_counter: u64,
    agents: HashMap<String, AgentMetadata>,
    // one outstanding commitment per sender
    commitments: HashMap<String, ([u8; 32], i64)>,
    nonces: HashMap<String, u64>,
    receipts: HashMap<String, TransactionReceipt>,
    gas_price: u64,
    transient_failures: u32,
}

/// Process-local chain implementing the full RPC surface
///
/// The clock is decoupled from wall time so commit-reveal windows can be
/// exercised without sleeping; `advance_time` moves it forward.
pub struct InMemoryChain {
    chain_id: u64,
    commit_reveal: bool,
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    /// New chain without commit-reveal enforcement
    pub fn new(chain_id: u64) -> Arc<Self> {
        Self::with_options(chain_id, false)
    }

    /// New chain, optionally enforcing commit-reveal on registration
    pub fn with_options(chain_id: u64, commit_reveal: bool) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            commit_reveal,
            state: Mutex::new(ChainState {
                now: time::now_timestamp(),
                head: 1,
                tx_counter: 0,
                agents: HashMap::new(),
                commitments: HashMap::new(),
                nonces: HashMap::new(),
                receipts: HashMap::new(),
                gas_price: 20_000_000_000,
                transient_failures: 0,
            }),
        })
    }

    /// Move the registry clock forward
    pub fn advance_time(&self, seconds: i64) {
        self.state.lock().now += seconds;
    }

    /// Advance the head block without a transaction (simulates other
    /// traffic, used to satisfy confirmation depth)
    pub fn mine_blocks(&self, count: u64) {
        self.state.lock().head += count;
    }

    /// Fail the next `count` RPC calls with a transient error
    pub fn inject_transient_failures(&self, count: u32) {
        self.state.lock().transient_failures = count;
    }

    /// Set the suggested gas price
    pub fn set_gas_price(&self, price: u64) {
        self.state.lock().gas_price = price;
    }

    fn check_fault(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(Error::RpcFailure("injected transient failure".into()));
        }
        Ok(())
    }

    fn apply_call(state: &mut ChainState, chain_id: u64, commit_reveal: bool, tx: &TransactionRequest) -> Result<()> {
        match &tx.call {
            ContractCall::Commit { commitment } => {
                state
                    .commitments
                    .insert(tx.sender.clone(), (*commitment, state.now));
                Ok(())
            }
            ContractCall::Register { registration, salt } => {
                if commit_reveal {
                    let (committed, committed_at) = state
                        .commitments
                        .get(&tx.sender)
                        .copied()
                        .ok_or(Error::CommitmentMissing)?;
                    let age = state.now - committed_at;
                    if age < MIN_COMMIT_REVEAL_DELAY {
                        return Err(Error::RevealTooSoon);
                    }
                    if age > MAX_COMMIT_REVEAL_DELAY {
                        return Err(Error::RevealTooLate);
                    }
                    let expected =
                        compute_commitment(registration, &tx.sender, salt, chain_id);
                    if expected != committed {
                        return Err(Error::CommitmentMismatch);
                    }
                    state.commitments.remove(&tx.sender);
                }

                let key = registration.did.as_str().to_string();
                if state.agents.contains_key(&key) {
                    return Err(Error::DidAlreadyExists(key));
                }

                let keys = registration
                    .keys
                    .iter()
                    .cloned()
                    .map(|mut k| {
                        // ECDSA keys are covered by the registration
                        // signature; X25519 keys have no proof to check
                        k.verified = matches!(
                            k.key_type,
                            KeyType::Secp256k1 | KeyType::X25519
                        );
                        k
                    })
                    .collect();

                state.agents.insert(
                    key,
                    AgentMetadata {
                        did: registration.did.clone(),
                        name: registration.name.clone(),
                        description: registration.description.clone(),
                        endpoint: registration.endpoint.clone(),
                        owner: tx.sender.clone(),
                        active: true,
                        created_at: state.now,
                        updated_at: state.now,
                        public_key: registration.public_key.clone(),
                        keys,
                        capabilities: registration.capabilities.clone(),
                        revoked_at: None,
                    },
                );
                Ok(())
            }
            ContractCall::UpdateAgent { did, update } => {
                let agent = Self::owned_agent_mut(state, did, &tx.sender)?;
                if let Some(name) = &update.name {
                    agent.name = name.clone();
                }
                if let Some(description) = &update.description {
                    agent.description = description.clone();
                }
                if let Some(endpoint) = &update.endpoint {
                    agent.endpoint = endpoint.clone();
                }
                if let Some(capabilities) = &update.capabilities {
                    agent.capabilities = capabilities.clone();
                }
                Ok(())
            }
            ContractCall::DeactivateAgent { did } => {
                let now = state.now;
                let agent = Self::owned_agent_mut(state, did, &tx.sender)?;
                agent.active = false;
                agent.revoked_at = Some(now);
                Ok(())
            }
            ContractCall::AddKey { did, key } => {
                let now = state.now;
                let agent = Self::owned_agent_mut(state, did, &tx.sender)?;
                let mut key = key.clone();
                key.created_at = now;
                key.verified = matches!(key.key_type, KeyType::Secp256k1 | KeyType::X25519);
                agent.keys.push(key);
                Ok(())
            }
            ContractCall::ApproveKey { did, key_id } => {
                let agent = Self::owned_agent_mut(state, did, &tx.sender)?;
                let key = agent
                    .keys
                    .iter_mut()
                    .find(|k| k.public_key.key_id() == *key_id)
                    .ok_or_else(|| Error::InvalidKey(format!("No key {}", key_id)))?;
                key.verified = true;
                Ok(())
            }
            ContractCall::RevokeKey { did, key_id } => {
                let agent = Self::owned_agent_mut(state, did, &tx.sender)?;
                let before = agent.keys.len();
                agent.keys.retain(|k| k.public_key.key_id() != *key_id);
                if agent.keys.len() == before {
                    return Err(Error::InvalidKey(format!("No key {}", key_id)));
                }
                Ok(())
            }
            ContractCall::RotateKey {
                did,
                old_key_id,
                new_key,
            } => {
                let now = state.now;
                let agent = Self::owned_agent_mut(state, did, &tx.sender)?;
                let before = agent.keys.len();
                agent.keys.retain(|k| k.public_key.key_id() != *old_key_id);
                if agent.keys.len() == before {
                    return Err(Error::InvalidKey(format!("No key {}", old_key_id)));
                }
                let mut key = new_key.clone();
                key.created_at = now;
                key.verified = matches!(key.key_type, KeyType::Secp256k1 | KeyType::X25519);
                agent.keys.push(key);
                Ok(())
            }
        }
    }

    fn owned_agent_mut<'a>(
        state: &'a mut ChainState,
        did: &AgentDid,
        sender: &str,
    ) -> Result<&'a mut AgentMetadata> {
        let now = state.now;
        let agent = state
            .agents
            .get_mut(did.as_str())
            .ok_or_else(|| Error::DidNotFound(did.as_str().to_string()))?;
        if agent.owner != sender {
            return Err(Error::RpcFatal(format!(
                "Sender {} does not own {}",
                sender, did
            )));
        }
        agent.updated_at = now;
        Ok(agent)
    }
}

#[async_trait]
impl ChainRpc for InMemoryChain {
    async fn chain_id(&self) -> Result<u64> {
        self.check_fault()?;
        Ok(self.chain_id)
    }

    async fn head_block(&self) -> Result<u64> {
        self.check_fault()?;
        Ok(self.state.lock().head)
    }

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64> {
        self.check_fault()?;
        Ok(match call {
            ContractCall::Commit { .. } => 50_000,
            ContractCall::Register { .. } => 250_000,
            ContractCall::UpdateAgent { .. } => 80_000,
            ContractCall::DeactivateAgent { .. } => 60_000,
            ContractCall::AddKey { .. }
            | ContractCall::ApproveKey { .. }
            | ContractCall::RevokeKey { .. }
            | ContractCall::RotateKey { .. } => 70_000,
        })
    }

    async fn suggested_gas_price(&self) -> Result<u64> {
        self.check_fault()?;
        Ok(self.state.lock().gas_price)
    }

    async fn pending_nonce(&self, sender: &str) -> Result<u64> {
        self.check_fault()?;
        Ok(*self.state.lock().nonces.get(sender).unwrap_or(&0))
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<String> {
        self.check_fault()?;
        let mut state = self.state.lock();

        Self::apply_call(&mut state, self.chain_id, self.commit_reveal, &tx)?;

        state.tx_counter += 1;
        state.head += 1;
        *state.nonces.entry(tx.sender.clone()).or_insert(0) += 1;

        let tx_hash = format!(
            "0x{}",
            hex::encode(Sha256::digest(state.tx_counter.to_be_bytes()))
        );
        let block_number = state.head;
        state.receipts.insert(
            tx_hash.clone(),
            TransactionReceipt {
                tx_hash: tx_hash.clone(),
                block_number,
                gas_used: tx.gas_limit * 9 / 10,
            },
        );
        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        self.check_fault()?;
        Ok(self.state.lock().receipts.get(tx_hash).cloned())
    }

    async fn get_agent(&self, did: &AgentDid) -> Result<Option<AgentMetadata>> {
        self.check_fault()?;
        Ok(self.state.lock().agents.get(did.as_str()).cloned())
    }

    async fn is_agent_active(&self, did: &AgentDid) -> Result<bool> {
        self.check_fault()?;
        Ok(self
            .state
            .lock()
            .agents
            .get(did.as_str())
            .map(|a| a.active)
            .unwrap_or(false))
    }

    async fn agents_by_owner(&self, owner: &str) -> Result<Vec<AgentMetadata>> {
        self.check_fault()?;
        let mut agents: Vec<AgentMetadata> = self
            .state
            .lock()
            .agents
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn all_agents(&self) -> Result<Vec<AgentMetadata>> {
        self.check_fault()?;
        let mut agents: Vec<AgentMetadata> = self.state.lock().agents.values().cloned().collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn registration(did: &str) -> Registration {
        let kp = KeyPair::generate(KeyType::Secp256k1).unwrap();
        Registration {
            did: AgentDid::parse(did).unwrap(),
            name: "agent".into(),
            description: "test agent".into(),
            endpoint: "https://agent.example.com".into(),
            capabilities: Default::default(),
            public_key: kp.public_key(),
            keys: Vec::new(),
        }
    }

    fn tx(sender: &str, call: ContractCall) -> TransactionRequest {
        TransactionRequest {
            sender: sender.into(),
            call,
            gas_limit: 300_000,
            gas_price: 20_000_000_000,
            nonce: 0,
        }
    }

    const DID: &str = "did:sage:ethereum:0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const OWNER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[tokio::test]
    async fn test_register_and_read_back() {
        let chain = InMemoryChain::new(1);
        let reg = registration(DID);

        chain
            .send_transaction(tx(
                OWNER,
                ContractCall::Register {
                    registration: reg.clone(),
                    salt: [0u8; 32],
                },
            ))
            .await
            .unwrap();

        let agent = chain.get_agent(&reg.did).await.unwrap().unwrap();
        assert_eq!(agent.owner, OWNER);
        assert!(agent.active);
        assert!(chain.is_agent_active(&reg.did).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let chain = InMemoryChain::new(1);
        let reg = registration(DID);

        let call = ContractCall::Register {
            registration: reg,
            salt: [0u8; 32],
        };
        chain.send_transaction(tx(OWNER, call.clone())).await.unwrap();
        let result = chain.send_transaction(tx(OWNER, call)).await;
        assert!(matches!(result, Err(Error::DidAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_only_owner_can_mutate() {
        let chain = InMemoryChain::new(1);
        let reg = registration(DID);
        chain
            .send_transaction(tx(
                OWNER,
                ContractCall::Register {
                    registration: reg.clone(),
                    salt: [0u8; 32],
                },
            ))
            .await
            .unwrap();

        let result = chain
            .send_transaction(tx(
                "0x000000000000000000000000000000000000dEaD",
                ContractCall::DeactivateAgent { did: reg.did },
            ))
            .await;
        assert!(matches!(result, Err(Error::RpcFatal(_))));
    }

    #[tokio::test]
    async fn test_deactivation_marks_inactive() {
        let chain = InMemoryChain::new(1);
        let reg = registration(DID);
        chain
            .send_transaction(tx(
                OWNER,
                ContractCall::Register {
                    registration: reg.clone(),
                    salt: [0u8; 32],
                },
            ))
            .await
            .unwrap();

        chain
            .send_transaction(tx(OWNER, ContractCall::DeactivateAgent { did: reg.did.clone() }))
            .await
            .unwrap();

        assert!(!chain.is_agent_active(&reg.did).await.unwrap());
        let agent = chain.get_agent(&reg.did).await.unwrap().unwrap();
        assert!(agent.revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_key_verification_rules_on_registration() {
        let chain = InMemoryChain::new(1);
        let mut reg = registration(DID);

        let secp = KeyPair::generate(KeyType::Secp256k1).unwrap();
        let ed = KeyPair::generate(KeyType::Ed25519).unwrap();
        let x = KeyPair::generate(KeyType::X25519).unwrap();
        for (kp, key_type) in [
            (&secp, KeyType::Secp256k1),
            (&ed, KeyType::Ed25519),
            (&x, KeyType::X25519),
        ] {
            reg.keys.push(AgentKey {
                key_type,
                public_key: kp.public_key(),
                verified: false,
                created_at: 0,
                proof: None,
            });
        }

        chain
            .send_transaction(tx(
                OWNER,
                ContractCall::Register {
                    registration: reg.clone(),
                    salt: [0u8; 32],
                },
            ))
            .await
            .unwrap();

        let agent = chain.get_agent(&reg.did).await.unwrap().unwrap();
        assert!(agent.keys[0].verified, "ECDSA implicitly verified");
        assert!(!agent.keys[1].verified, "Ed25519 needs approval");
        assert!(agent.keys[2].verified, "X25519 needs no proof");

        // Approve the Ed25519 key
        let key_id = ed.key_id();
        chain
            .send_transaction(tx(
                OWNER,
                ContractCall::ApproveKey {
                    did: reg.did.clone(),
                    key_id,
                },
            ))
            .await
            .unwrap();
        let agent = chain.get_agent(&reg.did).await.unwrap().unwrap();
        assert!(agent.keys[1].verified);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let chain = InMemoryChain::new(1);
        chain.inject_transient_failures(2);

        assert!(chain.chain_id().await.is_err());
        assert!(chain.chain_id().await.is_err());
        assert_eq!(chain.chain_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_receipts_and_nonces_advance() {
        let chain = InMemoryChain::new(1);
        let reg = registration(DID);

        assert_eq!(chain.pending_nonce(OWNER).await.unwrap(), 0);
        let hash = chain
            .send_transaction(tx(
                OWNER,
                ContractCall::Register {
                    registration: reg,
                    salt: [0u8; 32],
                },
            ))
            .await
            .unwrap();
        assert_eq!(chain.pending_nonce(OWNER).await.unwrap(), 1);

        let receipt = chain.transaction_receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.tx_hash, hash);
        assert!(receipt.block_number > 1);
        assert!(chain
            .transaction_receipt("0xmissing")
            .await
            .unwrap()
            .is_none());
    }
}
