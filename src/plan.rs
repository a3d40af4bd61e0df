//! # plan — Free / premium resolution
//!
//! Every portfolio request needs the caller's plan, and a dashboard load fires
//! several requests at once.  [`PlanCache`] keeps one resolved plan per user
//! for a short TTL, and concurrent misses for the same user share a single
//! store read instead of racing each other.
//!
//! ```text
//! get(user) ──▶ Ready & fresh?  ──▶ return
//!           ──▶ Pending(fut)    ──▶ await the shared future
//!           ──▶ missing / stale ──▶ start fetch, park Pending(fut), await
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::billing::store::BillingStore;
use crate::error::AppError;
use crate::models::{Plan, UserProfile};

// ─── EffectivePlan ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectivePlan {
    /// Plan stored on the profile.
    pub plan:               Plan,
    /// Stored plan is premium and has not expired.
    pub is_premium:         bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
}

impl EffectivePlan {
    pub fn resolve(profile: Option<&UserProfile>, now: DateTime<Utc>) -> Self {
        let Some(profile) = profile else {
            return Self {
                plan:               Plan::Free,
                is_premium:         false,
                premium_expires_at: None,
            };
        };

        let is_premium = profile.plan == Plan::Premium
            && profile.premium_expires_at.map_or(true, |expires| expires > now);

        Self {
            plan:               profile.plan,
            is_premium,
            premium_expires_at: profile.premium_expires_at,
        }
    }
}

// ─── PlanCache ────────────────────────────────────────────────────────────────

/// Shared futures need a `Clone` output, so errors travel as strings.
type PlanFuture = Shared<BoxFuture<'static, Result<EffectivePlan, String>>>;

enum Entry {
    Ready {
        plan:       EffectivePlan,
        fetched_at: Instant,
    },
    Pending {
        future:     PlanFuture,
        generation: u64,
    },
}

#[derive(Default)]
struct CacheInner {
    entries:         HashMap<Uuid, Entry>,
    next_generation: u64,
}

impl CacheInner {
    /// Drops settled entries past their TTL; in-flight fetches stay.
    fn evict_expired(&mut self, ttl: Duration) {
        self.entries.retain(|_, entry| match entry {
            Entry::Ready { fetched_at, .. } => fetched_at.elapsed() < ttl,
            Entry::Pending { .. } => true,
        });
    }
}

pub struct PlanCache {
    store: Arc<dyn BillingStore>,
    ttl:   Duration,
    inner: Mutex<CacheInner>,
}

impl PlanCache {
    pub fn new(store: Arc<dyn BillingStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub async fn get(&self, user_id: Uuid) -> Result<EffectivePlan, AppError> {
        let (future, generation) = {
            let mut inner = self.inner.lock().await;

            match inner.entries.get(&user_id) {
                Some(Entry::Ready { plan, fetched_at }) if fetched_at.elapsed() < self.ttl => {
                    return Ok(plan.clone());
                }
                Some(Entry::Pending { future, generation }) => (future.clone(), *generation),
                _ => {
                    inner.evict_expired(self.ttl);

                    let store = Arc::clone(&self.store);
                    let future: PlanFuture = async move {
                        let profile = store.get_profile(user_id).await.map_err(|e| e.to_string())?;
                        Ok::<_, String>(EffectivePlan::resolve(profile.as_ref(), Utc::now()))
                    }
                    .boxed()
                    .shared();

                    inner.next_generation += 1;
                    let generation = inner.next_generation;
                    inner.entries.insert(
                        user_id,
                        Entry::Pending { future: future.clone(), generation },
                    );
                    debug!(%user_id, "plan cache miss");
                    (future, generation)
                }
            }
        };

        let result = future.await;

        // Only the fetch still parked for this user may settle the entry; an
        // invalidate() in the meantime means the result is already stale.
        let mut inner = self.inner.lock().await;
        let still_current = matches!(
            inner.entries.get(&user_id),
            Some(Entry::Pending { generation: g, .. }) if *g == generation
        );
        if still_current {
            match &result {
                Ok(plan) => {
                    inner.entries.insert(
                        user_id,
                        Entry::Ready { plan: plan.clone(), fetched_at: Instant::now() },
                    );
                }
                Err(_) => {
                    inner.entries.remove(&user_id);
                }
            }
        }

        result.map_err(|e| AppError::Internal(anyhow::anyhow!("plan lookup failed: {e}")))
    }

    /// Drops the cached plan; the next `get` reads the store again.
    pub async fn invalidate(&self, user_id: Uuid) {
        self.inner.lock().await.entries.remove(&user_id);
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::store::{EventRecord, MemoryBillingStore};
    use crate::models::{Subscription, SubscriptionStatus};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn profile(plan: Plan, expires: Option<DateTime<Utc>>) -> UserProfile {
        UserProfile {
            user_id:            Uuid::new_v4(),
            plan,
            premium_expires_at: expires,
            stripe_customer_id: None,
        }
    }

    #[test]
    fn test_resolve_rules() {
        let now = Utc::now();

        assert!(!EffectivePlan::resolve(None, now).is_premium);
        assert!(!EffectivePlan::resolve(Some(&profile(Plan::Free, None)), now).is_premium);
        assert!(EffectivePlan::resolve(Some(&profile(Plan::Premium, None)), now).is_premium);
        assert!(EffectivePlan::resolve(
            Some(&profile(Plan::Premium, Some(now + ChronoDuration::days(3)))),
            now
        )
        .is_premium);

        let expired = EffectivePlan::resolve(
            Some(&profile(Plan::Premium, Some(now - ChronoDuration::seconds(1)))),
            now,
        );
        assert_eq!(expired.plan, Plan::Premium);
        assert!(!expired.is_premium);
    }

    /// Counts profile reads and holds each one open briefly so concurrent
    /// callers overlap.
    struct SlowStore {
        inner: MemoryBillingStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl BillingStore for SlowStore {
        async fn get_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, AppError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.get_profile(user_id).await
        }
        async fn find_user_by_customer(&self, c: &str) -> Result<Option<Uuid>, AppError> {
            self.inner.find_user_by_customer(c).await
        }
        async fn set_customer_id(&self, u: Uuid, c: &str) -> Result<(), AppError> {
            self.inner.set_customer_id(u, c).await
        }
        async fn set_plan(&self, u: Uuid, p: Plan, e: Option<DateTime<Utc>>) -> Result<(), AppError> {
            self.inner.set_plan(u, p, e).await
        }
        async fn upsert_subscription(&self, s: &Subscription) -> Result<(), AppError> {
            self.inner.upsert_subscription(s).await
        }
        async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, AppError> {
            self.inner.get_subscription(id).await
        }
        async fn set_subscription_status(&self, id: &str, s: SubscriptionStatus) -> Result<bool, AppError> {
            self.inner.set_subscription_status(id, s).await
        }
        async fn record_event(&self, id: &str, t: &str, p: &Value) -> Result<EventRecord, AppError> {
            self.inner.record_event(id, t, p).await
        }
        async fn is_event_processed(&self, id: &str) -> Result<bool, AppError> {
            self.inner.is_event_processed(id).await
        }
        async fn mark_event_processed(&self, id: &str) -> Result<(), AppError> {
            self.inner.mark_event_processed(id).await
        }
    }

    fn slow_store() -> Arc<SlowStore> {
        Arc::new(SlowStore { inner: MemoryBillingStore::new(), reads: AtomicUsize::new(0) })
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_read() {
        let store = slow_store();
        let user = Uuid::new_v4();
        store.set_plan(user, Plan::Premium, None).await.unwrap();
        let cache = PlanCache::new(store.clone(), Duration::from_secs(60));

        let (a, b, c) = tokio::join!(cache.get(user), cache.get(user), cache.get(user));

        assert!(a.unwrap().is_premium);
        assert!(b.unwrap().is_premium);
        assert!(c.unwrap().is_premium);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        // Served from cache afterwards
        cache.get(user).await.unwrap();
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_read() {
        let store = slow_store();
        let user = Uuid::new_v4();
        let cache = PlanCache::new(store.clone(), Duration::from_secs(60));

        assert!(!cache.get(user).await.unwrap().is_premium);

        store.set_plan(user, Plan::Premium, None).await.unwrap();
        assert!(!cache.get(user).await.unwrap().is_premium, "still cached");

        cache.invalidate(user).await;
        assert!(cache.get(user).await.unwrap().is_premium);
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_is_not_overwritten() {
        let store = slow_store();
        let user = Uuid::new_v4();
        let cache = Arc::new(PlanCache::new(store.clone(), Duration::from_secs(60)));

        let in_flight = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get(user).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Webhook lands while the first read is still running
        store.set_plan(user, Plan::Premium, None).await.unwrap();
        cache.invalidate(user).await;

        // The in-flight read may have seen either state; it must not be cached
        in_flight.await.unwrap().unwrap();
        assert!(cache.get(user).await.unwrap().is_premium);
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted_on_miss() {
        let store = Arc::new(MemoryBillingStore::new());
        let cache = PlanCache::new(store, Duration::from_millis(20));

        for _ in 0..5 {
            cache.get(Uuid::new_v4()).await.unwrap();
        }
        assert_eq!(cache.inner.lock().await.entries.len(), 5);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = Uuid::new_v4();
        cache.get(fresh).await.unwrap();

        let inner = cache.inner.lock().await;
        assert_eq!(inner.entries.len(), 1);
        assert!(inner.entries.contains_key(&fresh));
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reads() {
        let store = slow_store();
        let user = Uuid::new_v4();
        let cache = PlanCache::new(store.clone(), Duration::ZERO);

        cache.get(user).await.unwrap();
        cache.get(user).await.unwrap();
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }
}
