//! Idempotency keystore
//!
//! Deduplicates retried payment-creation requests (network timeouts,
//! double-clicks, at-least-once delivery) against a bounded retention
//! window, and allocates collision-checked transaction ids. The cache is
//! process-local and best-effort: any keystore failure degrades to "no
//! existing record" because the database unique constraint, not this
//! component, is the real at-most-one guard.

use crate::database::store::PaymentStore;
use crate::database::payment_repository::Payment;
use crate::error::{AppError, DomainError};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Injected time source so tests can control the retention window without
/// sleeping
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a fingerprint resolves to its original payment
    pub retention: Duration,
    /// Attempts before transaction-id generation reports a conflict
    pub max_attempts: u32,
    /// Base for the linearly increasing backoff between attempts
    pub backoff_base_ms: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            max_attempts: 5,
            backoff_base_ms: 50,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payment_id: Uuid,
    recorded_at: DateTime<Utc>,
}

pub struct IdempotencyKeystore {
    store: Arc<dyn PaymentStore>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

impl IdempotencyKeystore {
    pub fn new(store: Arc<dyn PaymentStore>, config: IdempotencyConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn PaymentStore>,
        config: IdempotencyConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            clock,
            config,
        }
    }

    /// Deterministic one-way hash over the logical identity of a creation
    /// request. Equal requests always collide; any differing field yields
    /// a different key.
    pub fn fingerprint(
        order_id: Uuid,
        amount: &BigDecimal,
        method: &str,
        actor_id: Option<Uuid>,
    ) -> String {
        let raw = format!(
            "{}:{}:{}:{}",
            order_id,
            amount.normalized(),
            method,
            actor_id.map(|id| id.to_string()).unwrap_or_default()
        );
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Resolve a fingerprint to the payment it produced, if any.
    ///
    /// Fast path is the in-process cache; the fallback is a database query
    /// over the retention window, whose hit re-primes the cache. The
    /// database is the source of truth when the two disagree. Errors on
    /// either path are logged and treated as a miss.
    pub async fn lookup(
        &self,
        key: &str,
        order_id: Uuid,
        amount: &BigDecimal,
        method: &str,
    ) -> Option<Payment> {
        let now = self.clock.now();
        let cached_id = {
            let cache = self.cache.read().await;
            cache.get(key).and_then(|entry| {
                let age = now.signed_duration_since(entry.recorded_at);
                if age.to_std().map(|d| d < self.config.retention).unwrap_or(false) {
                    Some(entry.payment_id)
                } else {
                    None
                }
            })
        };

        if let Some(payment_id) = cached_id {
            match self.store.find_by_id(payment_id).await {
                Ok(Some(payment)) => {
                    debug!(key = %key, payment_id = %payment_id, "idempotency cache hit");
                    return Some(payment);
                }
                Ok(None) => {
                    // Cache points at a payment the database does not
                    // know; the database wins
                    self.cache.write().await.remove(key);
                }
                Err(e) => {
                    warn!(error = %e, "idempotency cache validation failed, continuing");
                }
            }
        }

        let window_start = now
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        match self
            .store
            .find_recent_matching(order_id, amount, method, window_start)
            .await
        {
            Ok(Some(payment)) => {
                debug!(key = %key, payment_id = %payment.id, "idempotency database hit");
                self.record(key, payment.id).await;
                Some(payment)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "idempotency lookup failed, treating as new request");
                None
            }
        }
    }

    /// Store the fingerprint-to-payment mapping. Idempotent.
    pub async fn record(&self, key: &str, payment_id: Uuid) {
        let entry = CacheEntry {
            payment_id,
            recorded_at: self.clock.now(),
        };
        self.cache.write().await.insert(key.to_string(), entry);
    }

    /// Allocate a transaction id of the form `{PREFIX}-{timestamp}-{rand}`,
    /// re-rolling with a linearly increasing delay while the candidate
    /// collides with an existing record.
    pub async fn generate_unique_transaction_id(
        &self,
        prefix: &str,
    ) -> Result<String, AppError> {
        for attempt in 1..=self.config.max_attempts {
            let candidate = format!(
                "{}-{}-{:04}",
                prefix,
                self.clock.now().timestamp(),
                pseudo_random() % 10_000
            );

            match self.store.transaction_id_exists(&candidate).await {
                Ok(false) => return Ok(candidate),
                Ok(true) => {
                    warn!(
                        candidate = %candidate,
                        attempt = attempt,
                        "transaction id collision, re-rolling"
                    );
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(Duration::from_millis(
                            self.config.backoff_base_ms * attempt as u64,
                        ))
                        .await;
                    }
                }
                Err(e) => {
                    // Uniqueness check is best-effort; the candidate still
                    // carries a timestamp and random component
                    warn!(error = %e, "transaction id uniqueness check failed");
                    return Ok(candidate);
                }
            }
        }

        Err(AppError::domain(DomainError::TransactionIdExhausted {
            prefix: prefix.to_string(),
        }))
    }

    /// Purge cache entries older than the retention window. Memory-bound
    /// cleanup only; correctness never depends on it because the database
    /// fallback applies the same window.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let retention = self.config.retention;
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| {
            now.signed_duration_since(entry.recorded_at)
                .to_std()
                .map(|age| age < retention)
                .unwrap_or(false)
        });
        before - cache.len()
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Cheap non-cryptographic randomness for id suffixes; uniqueness is
/// enforced by the collision check, not by this
fn pseudo_random() -> u32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    nanos.wrapping_mul(1103515245).wrapping_add(12345)
}
