//! Usage quotas: a per-day message ceiling and per-plan monthly resource
//! limits.
//!
//! Both ceilings are enforced against Postgres counters, never process
//! memory, so any number of webhook replicas converge on the same answer.
//! "Day" and "billing month" are calendar units in the configured service
//! timezone, not UTC.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Error, QuotaError, Result, StoreError};
use crate::model::{Plan, Subscription, SubscriptionStatus};

/// Monthly-metered plan resources. A closed set: the consume statement for
/// each variant is a fixed SQL string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanResource {
    AiChat,
    TaskGeneration,
}

impl PlanResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanResource::AiChat => "ai_chat",
            PlanResource::TaskGeneration => "task_generation",
        }
    }
}

/// Counter operations the limiter needs. [`Store`] implements this against
/// Postgres; tests substitute in-memory counters.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn increment_daily_counter(
        &self,
        user_id: Uuid,
        day: NaiveDate,
    ) -> std::result::Result<i32, StoreError>;
    async fn ensure_subscription(
        &self,
        user_id: Uuid,
        plan: Plan,
    ) -> std::result::Result<Subscription, StoreError>;
    async fn reset_counters_if_stale(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError>;
    async fn try_consume_plan_resource(
        &self,
        user_id: Uuid,
        resource: PlanResource,
    ) -> std::result::Result<Option<i32>, StoreError>;
    async fn subscription(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Option<Subscription>, StoreError>;
}

#[async_trait]
impl QuotaStore for Store {
    async fn increment_daily_counter(
        &self,
        user_id: Uuid,
        day: NaiveDate,
    ) -> std::result::Result<i32, StoreError> {
        Store::increment_daily_counter(self, user_id, day).await
    }

    async fn ensure_subscription(
        &self,
        user_id: Uuid,
        plan: Plan,
    ) -> std::result::Result<Subscription, StoreError> {
        Store::ensure_subscription(self, user_id, plan).await
    }

    async fn reset_counters_if_stale(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError> {
        Store::reset_counters_if_stale(self, user_id, period_start).await
    }

    async fn try_consume_plan_resource(
        &self,
        user_id: Uuid,
        resource: PlanResource,
    ) -> std::result::Result<Option<i32>, StoreError> {
        Store::try_consume_plan_resource(self, user_id, resource).await
    }

    async fn subscription(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Option<Subscription>, StoreError> {
        Store::subscription(self, user_id).await
    }
}

/// The calendar day containing `now` in the service timezone.
pub fn local_day(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// First instant of the current calendar month in the service timezone,
/// expressed in UTC. Midnight can fall in a DST gap in some zones; the
/// earliest valid instant is taken, and `now` itself is the last-resort
/// fallback (which merely defers the lazy reset to the next call).
pub fn billing_period_start(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    NaiveDate::from_ymd_opt(local.year(), local.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Why a conditional consume returned no row.
fn classify_consume_failure(sub: &Subscription, resource: PlanResource) -> QuotaError {
    if sub.status != SubscriptionStatus::Active {
        return QuotaError::SubscriptionInactive {
            status: sub.status.to_string(),
        };
    }
    let (count, limit) = match resource {
        PlanResource::AiChat => (sub.ai_chat_count, sub.ai_chat_limit),
        PlanResource::TaskGeneration => (sub.generation_count, sub.generation_limit),
    };
    if limit == 0 {
        QuotaError::PlanDisabled {
            resource: resource.as_str(),
        }
    } else {
        QuotaError::PlanCeiling {
            resource: resource.as_str(),
            count,
            limit,
        }
    }
}

pub struct QuotaLimiter<S> {
    store: S,
    timezone: Tz,
    daily_ceiling: i32,
}

impl<S: QuotaStore> QuotaLimiter<S> {
    pub fn new(store: S, timezone: Tz, daily_ceiling: i32) -> Self {
        Self {
            store,
            timezone,
            daily_ceiling,
        }
    }

    /// Charge one AI-routed message against today's ceiling. Increment first,
    /// compare after: under concurrent delivery each message still sees its
    /// own distinct count. Message number `ceiling` passes, `ceiling + 1`
    /// does not. Callers route only AI-handled messages here; state-machine
    /// replies and checklist commands are never charged.
    pub async fn charge_daily_message(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i32> {
        let day = local_day(now, self.timezone);
        let count = self.store.increment_daily_counter(user_id, day).await?;
        if count > self.daily_ceiling {
            tracing::info!(user = %user_id, count, ceiling = self.daily_ceiling, "daily ceiling hit");
            return Err(Error::Quota(QuotaError::DailyCeiling {
                count,
                ceiling: self.daily_ceiling,
            }));
        }
        Ok(count)
    }

    /// Charge one unit of a monthly plan resource, creating a free-tier
    /// subscription for first-time users and applying the lazy monthly
    /// reset on the way.
    pub async fn charge_plan_resource(
        &self,
        user_id: Uuid,
        resource: PlanResource,
        now: DateTime<Utc>,
    ) -> Result<i32> {
        self.store.ensure_subscription(user_id, Plan::Free).await?;
        let period_start = billing_period_start(now, self.timezone);
        if self
            .store
            .reset_counters_if_stale(user_id, period_start)
            .await?
        {
            tracing::debug!(user = %user_id, %period_start, "monthly counters reset");
        }
        if let Some(count) = self
            .store
            .try_consume_plan_resource(user_id, resource)
            .await?
        {
            return Ok(count);
        }
        // The conditional update matched nothing; read the row to say why.
        let sub = self
            .store
            .subscription(user_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "subscription",
                id: user_id.to_string(),
            })?;
        Err(Error::Quota(classify_consume_failure(&sub, resource)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    fn tokyo() -> Tz {
        chrono_tz::Asia::Tokyo
    }

    #[test]
    fn local_day_rolls_over_at_service_midnight_not_utc() {
        // 16:00 UTC on March 10 is already 01:00 March 11 in Tokyo.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 16, 0, 0).unwrap();
        assert_eq!(
            local_day(now, tokyo()),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        // 14:00 UTC is still 23:00 March 10 in Tokyo.
        let earlier = Utc.with_ymd_and_hms(2024, 3, 10, 14, 0, 0).unwrap();
        assert_eq!(
            local_day(earlier, tokyo()),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
    }

    #[test]
    fn billing_period_starts_at_local_month_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        // March 1 00:00 JST is February 29 15:00 UTC.
        assert_eq!(
            billing_period_start(now, tokyo()),
            Utc.with_ymd_and_hms(2024, 2, 29, 15, 0, 0).unwrap()
        );
    }

    fn sub(plan: Plan, status: SubscriptionStatus) -> Subscription {
        let spec = plan.spec();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan,
            status,
            ai_chat_count: 0,
            ai_chat_limit: spec.ai_chat_limit,
            generation_count: 0,
            generation_limit: spec.generation_limit,
            last_reset_at: Utc::now(),
        }
    }

    #[test]
    fn disabled_resource_classifies_as_plan_disabled() {
        let s = sub(Plan::Free, SubscriptionStatus::Active);
        let err = classify_consume_failure(&s, PlanResource::AiChat);
        assert!(matches!(err, QuotaError::PlanDisabled { resource: "ai_chat" }));
    }

    #[test]
    fn exhausted_resource_classifies_as_ceiling() {
        let mut s = sub(Plan::Basic, SubscriptionStatus::Active);
        s.ai_chat_count = 10;
        let err = classify_consume_failure(&s, PlanResource::AiChat);
        assert!(matches!(
            err,
            QuotaError::PlanCeiling {
                count: 10,
                limit: 10,
                ..
            }
        ));
    }

    #[test]
    fn inactive_subscription_wins_over_other_classifications() {
        let s = sub(Plan::Premium, SubscriptionStatus::PastDue);
        let err = classify_consume_failure(&s, PlanResource::AiChat);
        assert!(matches!(err, QuotaError::SubscriptionInactive { .. }));
    }

    /// In-memory counters mirroring the conditional statements in Postgres.
    struct FakeCounters {
        daily: Mutex<HashMap<(Uuid, NaiveDate), i32>>,
        subs: Mutex<HashMap<Uuid, Subscription>>,
    }

    impl FakeCounters {
        fn new() -> Self {
            Self {
                daily: Mutex::new(HashMap::new()),
                subs: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl QuotaStore for FakeCounters {
        async fn increment_daily_counter(
            &self,
            user_id: Uuid,
            day: NaiveDate,
        ) -> std::result::Result<i32, StoreError> {
            let mut daily = self.daily.lock().unwrap();
            let count = daily.entry((user_id, day)).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn ensure_subscription(
            &self,
            user_id: Uuid,
            plan: Plan,
        ) -> std::result::Result<Subscription, StoreError> {
            let mut subs = self.subs.lock().unwrap();
            let entry = subs.entry(user_id).or_insert_with(|| {
                let mut s = sub(plan, SubscriptionStatus::Active);
                s.user_id = user_id;
                s
            });
            Ok(entry.clone())
        }

        async fn reset_counters_if_stale(
            &self,
            user_id: Uuid,
            period_start: DateTime<Utc>,
        ) -> std::result::Result<bool, StoreError> {
            let mut subs = self.subs.lock().unwrap();
            if let Some(s) = subs.get_mut(&user_id) {
                if s.last_reset_at < period_start {
                    s.ai_chat_count = 0;
                    s.generation_count = 0;
                    s.last_reset_at = Utc::now();
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn try_consume_plan_resource(
            &self,
            user_id: Uuid,
            resource: PlanResource,
        ) -> std::result::Result<Option<i32>, StoreError> {
            let mut subs = self.subs.lock().unwrap();
            let Some(s) = subs.get_mut(&user_id) else {
                return Ok(None);
            };
            if s.status != SubscriptionStatus::Active {
                return Ok(None);
            }
            let (count, limit) = match resource {
                PlanResource::AiChat => (&mut s.ai_chat_count, s.ai_chat_limit),
                PlanResource::TaskGeneration => (&mut s.generation_count, s.generation_limit),
            };
            if limit == -1 || *count < limit {
                *count += 1;
                Ok(Some(*count))
            } else {
                Ok(None)
            }
        }

        async fn subscription(
            &self,
            user_id: Uuid,
        ) -> std::result::Result<Option<Subscription>, StoreError> {
            Ok(self.subs.lock().unwrap().get(&user_id).cloned())
        }
    }

    #[tokio::test]
    async fn message_at_ceiling_passes_and_next_is_rejected() {
        let limiter = QuotaLimiter::new(FakeCounters::new(), tokyo(), 100);
        let user = Uuid::new_v4();
        let now = Utc::now();

        for _ in 0..99 {
            limiter.charge_daily_message(user, now).await.unwrap();
        }
        let hundredth = limiter.charge_daily_message(user, now).await.unwrap();
        assert_eq!(hundredth, 100);

        let err = limiter.charge_daily_message(user, now).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Quota(QuotaError::DailyCeiling {
                count: 101,
                ceiling: 100,
            })
        ));
    }

    #[tokio::test]
    async fn free_plan_chat_is_disabled_but_one_generation_passes() {
        let limiter = QuotaLimiter::new(FakeCounters::new(), tokyo(), 100);
        let user = Uuid::new_v4();
        let now = Utc::now();

        let err = limiter
            .charge_plan_resource(user, PlanResource::AiChat, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Quota(QuotaError::PlanDisabled { resource: "ai_chat" })
        ));

        let count = limiter
            .charge_plan_resource(user, PlanResource::TaskGeneration, now)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let err = limiter
            .charge_plan_resource(user, PlanResource::TaskGeneration, now)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Quota(QuotaError::PlanCeiling { count: 1, limit: 1, .. })
        ));
    }

    #[tokio::test]
    async fn unlimited_resource_never_exhausts() {
        let counters = FakeCounters::new();
        let user = Uuid::new_v4();
        {
            let mut s = sub(Plan::Premium, SubscriptionStatus::Active);
            s.user_id = user;
            counters.subs.lock().unwrap().insert(user, s);
        }
        let limiter = QuotaLimiter::new(counters, tokyo(), 100);
        let now = Utc::now();

        for i in 1..=50 {
            let count = limiter
                .charge_plan_resource(user, PlanResource::AiChat, now)
                .await
                .unwrap();
            assert_eq!(count, i);
        }
    }

    #[tokio::test]
    async fn stale_counters_reset_before_consuming() {
        let counters = FakeCounters::new();
        let user = Uuid::new_v4();
        {
            // Basic plan, exhausted last month.
            let mut s = sub(Plan::Basic, SubscriptionStatus::Active);
            s.user_id = user;
            s.ai_chat_count = 10;
            s.last_reset_at = Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap();
            counters.subs.lock().unwrap().insert(user, s);
        }
        let limiter = QuotaLimiter::new(counters, tokyo(), 100);
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();

        let count = limiter
            .charge_plan_resource(user, PlanResource::AiChat, now)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn past_due_subscription_is_rejected() {
        let counters = FakeCounters::new();
        let user = Uuid::new_v4();
        {
            let mut s = sub(Plan::Premium, SubscriptionStatus::PastDue);
            s.user_id = user;
            counters.subs.lock().unwrap().insert(user, s);
        }
        let limiter = QuotaLimiter::new(counters, tokyo(), 100);

        let err = limiter
            .charge_plan_resource(user, PlanResource::AiChat, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Quota(QuotaError::SubscriptionInactive { .. })
        ));
    }
}
