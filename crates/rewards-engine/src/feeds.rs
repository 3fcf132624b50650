//! Position and pool feeds.
//!
//! The valuation service is an external collaborator; the engine only sees
//! these traits. `HttpFeed` talks to it through the endpoint pool,
//! `CachedPoolFeed` fronts any pool feed with a TTL cache and `StaticFeed`
//! serves fixed data for tests and dry runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::debug;

use rewards_core::{PoolState, PositionSnapshot};

use crate::cache::{EvictionPolicy, TtlCache};
use crate::config::EngineConfig;
use crate::endpoints::EndpointPool;
use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait PositionFeed: Send + Sync {
    /// Latest snapshot of every position known to the valuation service
    async fn fetch_positions(&self) -> EngineResult<Vec<PositionSnapshot>>;
}

#[async_trait]
pub trait PoolFeed: Send + Sync {
    async fn fetch_pool_state(&self) -> EngineResult<PoolState>;
}

/// Valuation service client over HTTP
pub struct HttpFeed {
    client: reqwest::Client,
    endpoints: EndpointPool,
}

impl HttpFeed {
    pub fn new(endpoints: EndpointPool, request_timeout: Duration) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, endpoints })
    }

    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let endpoints = EndpointPool::new(
            config.feeds.endpoints.clone(),
            config.circuit_breaker.clone(),
            config.retry.clone(),
        )?;
        Self::new(endpoints, Duration::from_secs(config.feeds.request_timeout_secs))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &'static str) -> EngineResult<T> {
        self.endpoints
            .call(|base| {
                let client = self.client.clone();
                async move {
                    let url = format!("{}/{}", base, path);
                    let response = client.get(&url).send().await?;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(EngineError::Network(format!("{} returned {}", url, status)));
                    }
                    response.json::<T>().await.map_err(|e| {
                        if e.is_decode() {
                            EngineError::InvalidInput(format!("malformed payload from {}: {}", url, e))
                        } else {
                            EngineError::Network(e.to_string())
                        }
                    })
                }
            })
            .await
    }
}

#[async_trait]
impl PositionFeed for HttpFeed {
    async fn fetch_positions(&self) -> EngineResult<Vec<PositionSnapshot>> {
        let positions: Vec<PositionSnapshot> = self.get_json("positions").await?;
        debug!(count = positions.len(), "Fetched position snapshots");
        Ok(positions)
    }
}

#[async_trait]
impl PoolFeed for HttpFeed {
    async fn fetch_pool_state(&self) -> EngineResult<PoolState> {
        let pool: PoolState = self.get_json("pool").await?;
        pool.validate()?;
        Ok(pool)
    }
}

/// Pool feed with a shared, single-flight cache in front
pub struct CachedPoolFeed {
    inner: Arc<dyn PoolFeed>,
    cache: TtlCache<(), PoolState>,
}

impl CachedPoolFeed {
    pub fn new(inner: Arc<dyn PoolFeed>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(EvictionPolicy::TimeToLive(ttl)),
        }
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }
}

#[async_trait]
impl PoolFeed for CachedPoolFeed {
    async fn fetch_pool_state(&self) -> EngineResult<PoolState> {
        self.cache
            .get_or_try_load((), || self.inner.fetch_pool_state())
            .await
    }
}

/// Fixed feed data, replaced explicitly
#[derive(Debug, Default)]
pub struct StaticFeed {
    positions: RwLock<Vec<PositionSnapshot>>,
    pool: RwLock<Option<PoolState>>,
}

impl StaticFeed {
    pub fn new(positions: Vec<PositionSnapshot>, pool: PoolState) -> Self {
        Self {
            positions: RwLock::new(positions),
            pool: RwLock::new(Some(pool)),
        }
    }

    pub fn set_positions(&self, positions: Vec<PositionSnapshot>) {
        *self.positions.write() = positions;
    }

    pub fn set_pool(&self, pool: PoolState) {
        *self.pool.write() = Some(pool);
    }
}

#[async_trait]
impl PositionFeed for StaticFeed {
    async fn fetch_positions(&self) -> EngineResult<Vec<PositionSnapshot>> {
        Ok(self.positions.read().clone())
    }
}

#[async_trait]
impl PoolFeed for StaticFeed {
    async fn fetch_pool_state(&self) -> EngineResult<PoolState> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| EngineError::Network("no pool state published".into()))
    }
}
