//! # DID Resolution
//!
//! Turns a DID into the agent metadata and keys anchored on its chain.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        RESOLUTION PIPELINE                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  did:sage:ethereum:0xabc...                                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌───────────────────┐   chain tag   ┌────────────────────────┐        │
//! │  │   MultiResolver   │──────────────►│  per-chain Resolver    │        │
//! │  │ (strategy table)  │               │  (RpcResolver, ...)    │        │
//! │  └───────────────────┘               └───────────┬────────────┘        │
//! │        ▲                                          │                     │
//! │        │ unknown chain → ChainNotSupported        ▼                     │
//! │        │                              ┌────────────────────────┐       │
//! │  ┌───────────────────┐                │     chain registry     │       │
//! │  │  CachingResolver  │                └────────────────────────┘       │
//! │  │  (5 min TTL)      │                                                 │
//! │  └───────────────────┘                                                 │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! New chains are supported by registering another strategy; the global
//! default registry is initialized once at startup and treated as
//! read-only while handshakes are being served.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::crypto::PublicKey;
use crate::did::metadata::{AgentMetadata, VerificationResult};
use crate::did::rpc::ChainRpc;
use crate::did::{AgentDid, Chain};
use crate::error::{Error, Result};

/// How long cached resolutions stay fresh
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Search filter for agent discovery
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Substring match on the agent name
    pub name_contains: Option<String>,
    /// Capability key the agent must carry
    pub capability: Option<String>,
    /// Drop inactive agents from results
    pub active_only: bool,
}

impl SearchCriteria {
    /// Whether an agent record satisfies this filter
    pub fn matches(&self, agent: &AgentMetadata) -> bool {
        if self.active_only && !agent.active {
            return false;
        }
        if let Some(needle) = &self.name_contains {
            if !agent.name.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(capability) = &self.capability {
            if !agent.capabilities.contains_key(capability) {
                return false;
            }
        }
        true
    }
}

/// Resolution contract implemented per chain
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Full metadata for a DID; `DidNotFound` when unregistered
    async fn resolve(&self, did: &AgentDid) -> Result<AgentMetadata>;

    /// Primary public key for a DID
    async fn resolve_public_key(&self, did: &AgentDid) -> Result<PublicKey> {
        Ok(self.resolve(did).await?.public_key)
    }

    /// Compare claimed metadata against the registry record
    async fn verify_metadata(
        &self,
        did: &AgentDid,
        claimed: &AgentMetadata,
    ) -> Result<VerificationResult> {
        let resolved = self.resolve(did).await?;
        Ok(VerificationResult::compare(&resolved, claimed))
    }

    /// All agents registered by an owner address
    async fn list_agents_by_owner(&self, owner: &str) -> Result<Vec<AgentMetadata>>;

    /// Agents matching a search filter
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<AgentMetadata>>;
}

// ============================================================================
// PER-CHAIN RESOLVER OVER THE RPC SURFACE
// ============================================================================

/// Resolver backed by one chain's RPC connection
pub struct RpcResolver {
    rpc: Arc<dyn ChainRpc>,
}

impl RpcResolver {
    /// Wrap an RPC connection
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Resolver for RpcResolver {
    async fn resolve(&self, did: &AgentDid) -> Result<AgentMetadata> {
        self.rpc
            .get_agent(did)
            .await?
            .ok_or_else(|| Error::DidNotFound(did.as_str().to_string()))
    }

    async fn list_agents_by_owner(&self, owner: &str) -> Result<Vec<AgentMetadata>> {
        self.rpc.agents_by_owner(owner).await
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<AgentMetadata>> {
        Ok(self
            .rpc
            .all_agents()
            .await?
            .into_iter()
            .filter(|a| criteria.matches(a))
            .collect())
    }
}

// ============================================================================
// MULTI-CHAIN ROUTING
// ============================================================================

/// Routes each DID to the resolver registered for its chain
#[derive(Default)]
pub struct MultiResolver {
    chains: RwLock<HashMap<Chain, Arc<dyn Resolver>>>,
}

impl MultiResolver {
    /// Empty resolver table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the strategy for a chain
    pub fn register_chain(&self, chain: Chain, resolver: Arc<dyn Resolver>) {
        debug!(%chain, "registering chain resolver");
        self.chains.write().insert(chain, resolver);
    }

    /// Chains currently routable
    pub fn supported_chains(&self) -> Vec<Chain> {
        self.chains.read().keys().copied().collect()
    }

    fn resolver_for(&self, chain: Chain) -> Result<Arc<dyn Resolver>> {
        self.chains
            .read()
            .get(&chain)
            .cloned()
            .ok_or_else(|| Error::ChainNotSupported(chain.tag().to_string()))
    }
}

#[async_trait]
impl Resolver for MultiResolver {
    async fn resolve(&self, did: &AgentDid) -> Result<AgentMetadata> {
        self.resolver_for(did.chain())?.resolve(did).await
    }

    async fn list_agents_by_owner(&self, owner: &str) -> Result<Vec<AgentMetadata>> {
        let resolvers: Vec<Arc<dyn Resolver>> = self.chains.read().values().cloned().collect();
        let mut out = Vec::new();
        for resolver in resolvers {
            out.extend(resolver.list_agents_by_owner(owner).await?);
        }
        Ok(out)
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<AgentMetadata>> {
        let resolvers: Vec<Arc<dyn Resolver>> = self.chains.read().values().cloned().collect();
        let mut out = Vec::new();
        for resolver in resolvers {
            out.extend(resolver.search(criteria).await?);
        }
        Ok(out)
    }
}

// ============================================================================
// CACHING WRAPPER
// ============================================================================

struct CacheEntry {
    metadata: AgentMetadata,
    expires_at: Instant,
}

/// Caches successful resolutions for a TTL; misses are never cached
pub struct CachingResolver {
    inner: Arc<dyn Resolver>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl CachingResolver {
    /// Wrap a resolver with the default 5-minute TTL
    pub fn new(inner: Arc<dyn Resolver>) -> Self {
        Self::with_ttl(inner, DEFAULT_CACHE_TTL)
    }

    /// Wrap a resolver with a custom TTL
    pub fn with_ttl(inner: Arc<dyn Resolver>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    fn cached(&self, did: &AgentDid) -> Option<AgentMetadata> {
        let cache = self.cache.read();
        let entry = cache.get(did.as_str())?;
        if entry.expires_at > Instant::now() {
            Some(entry.metadata.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl Resolver for CachingResolver {
    async fn resolve(&self, did: &AgentDid) -> Result<AgentMetadata> {
        if let Some(metadata) = self.cached(did) {
            return Ok(metadata);
        }

        let metadata = self.inner.resolve(did).await?;
        self.cache.write().insert(
            did.as_str().to_string(),
            CacheEntry {
                metadata: metadata.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(metadata)
    }

    async fn list_agents_by_owner(&self, owner: &str) -> Result<Vec<AgentMetadata>> {
        self.inner.list_agents_by_owner(owner).await
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<AgentMetadata>> {
        self.inner.search(criteria).await
    }
}

// ============================================================================
// DEFAULT REGISTRY
// ============================================================================

/// Process-wide resolver table
///
/// Populate during startup with [`register_default_chain`]; treat as
/// read-only once handshakes are being served.
static DEFAULT_RESOLVERS: Lazy<MultiResolver> = Lazy::new(MultiResolver::new);

/// The process-wide default resolver
pub fn default_resolver() -> &'static MultiResolver {
    &DEFAULT_RESOLVERS
}

/// Register a chain strategy on the process-wide default resolver
pub fn register_default_chain(chain: Chain, resolver: Arc<dyn Resolver>) {
    DEFAULT_RESOLVERS.register_chain(chain, resolver);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyPair, KeyType};
    use crate::did::rpc::{ContractCall, InMemoryChain, Registration, TransactionRequest};

    const DID: &str = "did:sage:ethereum:0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
    const OWNER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    async fn chain_with_agent(name: &str) -> (Arc<InMemoryChain>, AgentDid) {
        let chain = InMemoryChain::new(1);
        let kp = KeyPair::generate(KeyType::Secp256k1).unwrap();
        let did = AgentDid::parse(DID).unwrap();
        chain
            .send_transaction(TransactionRequest {
                sender: OWNER.into(),
                call: ContractCall::Register {
                    registration: Registration {
                        did: did.clone(),
                        name: name.into(),
                        description: "resolver test agent".into(),
                        endpoint: "https://agent.example.com".into(),
                        capabilities: [("payments".to_string(), "v1".to_string())]
                            .into_iter()
                            .collect(),
                        public_key: kp.public_key(),
                        keys: Vec::new(),
                    },
                    salt: [0u8; 32],
                },
                gas_limit: 300_000,
                gas_price: 1,
                nonce: 0,
            })
            .await
            .unwrap();
        (chain, did)
    }

    #[tokio::test]
    async fn test_resolve_round_trip() {
        let (chain, did) = chain_with_agent("resolver-agent").await;
        let resolver = RpcResolver::new(chain);

        let metadata = resolver.resolve(&did).await.unwrap();
        assert_eq!(metadata.name, "resolver-agent");

        let key = resolver.resolve_public_key(&did).await.unwrap();
        assert_eq!(key, metadata.public_key);
    }

    #[tokio::test]
    async fn test_resolve_unknown_did() {
        let chain = InMemoryChain::new(1);
        let resolver = RpcResolver::new(chain);
        let did = AgentDid::parse(DID).unwrap();

        let result = resolver.resolve(&did).await;
        assert!(matches!(result, Err(Error::DidNotFound(_))));
    }

    #[tokio::test]
    async fn test_multi_resolver_routes_by_chain() {
        let (chain, did) = chain_with_agent("routed-agent").await;

        let multi = MultiResolver::new();
        multi.register_chain(Chain::Ethereum, Arc::new(RpcResolver::new(chain)));

        assert_eq!(multi.resolve(&did).await.unwrap().name, "routed-agent");

        // Solana DID has no registered strategy
        let solana = AgentDid::new(Chain::Solana, &bs58::encode(&[1u8; 32]).into_string()).unwrap();
        let result = multi.resolve(&solana).await;
        assert!(matches!(result, Err(Error::ChainNotSupported(_))));
    }

    #[tokio::test]
    async fn test_verify_metadata_flags_tampering() {
        let (chain, did) = chain_with_agent("honest-agent").await;
        let resolver = RpcResolver::new(chain);

        let mut claimed = resolver.resolve(&did).await.unwrap();
        assert!(resolver.verify_metadata(&did, &claimed).await.unwrap().valid);

        claimed.endpoint = "https://evil.example.com".into();
        let result = resolver.verify_metadata(&did, &claimed).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.mismatches, vec!["endpoint"]);
    }

    #[tokio::test]
    async fn test_cache_serves_stable_results_within_ttl() {
        let (chain, did) = chain_with_agent("cached-agent").await;
        let caching = CachingResolver::new(Arc::new(RpcResolver::new(chain.clone())));

        let first = caching.resolve(&did).await.unwrap();

        // Mutate the chain record; the cache must keep serving the
        // original for the rest of the TTL
        chain
            .send_transaction(TransactionRequest {
                sender: OWNER.into(),
                call: ContractCall::UpdateAgent {
                    did: did.clone(),
                    update: crate::did::rpc::AgentUpdate {
                        name: Some("renamed-agent".into()),
                        ..Default::default()
                    },
                },
                gas_limit: 100_000,
                gas_price: 1,
                nonce: 1,
            })
            .await
            .unwrap();

        let second = caching.resolve(&did).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let (chain, did) = chain_with_agent("expiring-agent").await;
        let caching = CachingResolver::with_ttl(
            Arc::new(RpcResolver::new(chain.clone())),
            Duration::from_millis(20),
        );

        caching.resolve(&did).await.unwrap();
        chain
            .send_transaction(TransactionRequest {
                sender: OWNER.into(),
                call: ContractCall::UpdateAgent {
                    did: did.clone(),
                    update: crate::did::rpc::AgentUpdate {
                        name: Some("renamed-agent".into()),
                        ..Default::default()
                    },
                },
                gas_limit: 100_000,
                gas_price: 1,
                nonce: 1,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        let refreshed = caching.resolve(&did).await.unwrap();
        assert_eq!(refreshed.name, "renamed-agent");
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let chain = InMemoryChain::new(1);
        let caching = CachingResolver::new(Arc::new(RpcResolver::new(chain.clone())));
        let did = AgentDid::parse(DID).unwrap();

        assert!(caching.resolve(&did).await.is_err());

        // Register after the failed lookup; the next resolve must see it
        let kp = KeyPair::generate(KeyType::Secp256k1).unwrap();
        chain
            .send_transaction(TransactionRequest {
                sender: OWNER.into(),
                call: ContractCall::Register {
                    registration: Registration {
                        did: did.clone(),
                        name: "late-agent".into(),
                        description: String::new(),
                        endpoint: "https://late.example.com".into(),
                        capabilities: Default::default(),
                        public_key: kp.public_key(),
                        keys: Vec::new(),
                    },
                    salt: [0u8; 32],
                },
                gas_limit: 300_000,
                gas_price: 1,
                nonce: 0,
            })
            .await
            .unwrap();

        assert_eq!(caching.resolve(&did).await.unwrap().name, "late-agent");
    }

    #[tokio::test]
    async fn test_search_and_owner_listing() {
        let (chain, _did) = chain_with_agent("searchable-agent").await;
        let resolver = RpcResolver::new(chain);

        let by_owner = resolver.list_agents_by_owner(OWNER).await.unwrap();
        assert_eq!(by_owner.len(), 1);

        let hits = resolver
            .search(&SearchCriteria {
                name_contains: Some("searchable".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let by_capability = resolver
            .search(&SearchCriteria {
                capability: Some("payments".into()),
                active_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_capability.len(), 1);

        let misses = resolver
            .search(&SearchCriteria {
                name_contains: Some("nonexistent".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(misses.is_empty());
    }
}
