//! Rate-limit and subscription rows. All counter movement is a single
//! conditional statement; workers share no process memory.

use chrono::{DateTime, NaiveDate, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Plan, Subscription, SubscriptionStatus};
use crate::quota::PlanResource;

use super::{Store, parse_column};

fn map_subscription(row: &Row) -> Result<Subscription, StoreError> {
    let plan: Plan = parse_column("subscriptions", "plan", row.get("plan"))?;
    let status: SubscriptionStatus = parse_column("subscriptions", "status", row.get("status"))?;
    Ok(Subscription {
        id: row.get("id"),
        user_id: row.get("user_id"),
        plan,
        status,
        ai_chat_count: row.get("ai_chat_count"),
        ai_chat_limit: row.get("ai_chat_limit"),
        generation_count: row.get("generation_count"),
        generation_limit: row.get("generation_limit"),
        last_reset_at: row.get("last_reset_at"),
    })
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, ai_chat_count, ai_chat_limit, \
     generation_count, generation_limit, last_reset_at";

impl Store {
    /// Lazily create today's rate-limit row and bump it, returning the
    /// post-increment count. One statement, so concurrent messages cannot
    /// both observe the pre-increment value.
    pub async fn increment_daily_counter(
        &self,
        user_id: Uuid,
        day: NaiveDate,
    ) -> Result<i32, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO rate_limits (user_id, limit_date, message_count)
                 VALUES ($1, $2, 1)
                 ON CONFLICT (user_id, limit_date)
                 DO UPDATE SET message_count = rate_limits.message_count + 1,
                               updated_at = now()
                 RETURNING message_count",
                &[&user_id, &day],
            )
            .await?;
        Ok(row.get("message_count"))
    }

    pub async fn subscription(&self, user_id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"),
                &[&user_id],
            )
            .await?;
        row.as_ref().map(map_subscription).transpose()
    }

    /// Create the subscription row for a plan tier if absent (billing later
    /// overwrites limits as the authoritative source), then return it.
    pub async fn ensure_subscription(
        &self,
        user_id: Uuid,
        plan: Plan,
    ) -> Result<Subscription, StoreError> {
        let spec = plan.spec();
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO subscriptions
               (id, user_id, plan, status, ai_chat_count, ai_chat_limit,
                generation_count, generation_limit, last_reset_at)
             VALUES ($1, $2, $3, 'active', 0, $4, 0, $5, now())
             ON CONFLICT (user_id) DO NOTHING",
            &[
                &Uuid::new_v4(),
                &user_id,
                &plan.as_str(),
                &spec.ai_chat_limit,
                &spec.generation_limit,
            ],
        )
        .await?;
        let row = conn
            .query_one(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE user_id = $1"),
                &[&user_id],
            )
            .await?;
        map_subscription(&row)
    }

    /// Lazy billing-period reset: zero both counters iff last_reset_at
    /// precedes the given period start. Conditional, so concurrent checks
    /// reset at most once.
    pub async fn reset_counters_if_stale(
        &self,
        user_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE subscriptions
                 SET ai_chat_count = 0, generation_count = 0,
                     last_reset_at = now(), updated_at = now()
                 WHERE user_id = $1 AND last_reset_at < $2",
                &[&user_id, &period_start],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Conditionally consume one unit of a plan resource. Returns the
    /// post-increment count on success; `None` means the conditions did not
    /// hold (inactive subscription, disabled resource, or ceiling reached)
    /// and the caller classifies via a plain read.
    pub async fn try_consume_plan_resource(
        &self,
        user_id: Uuid,
        resource: PlanResource,
    ) -> Result<Option<i32>, StoreError> {
        // One statement per resource; the counter column is never chosen by
        // string interpolation.
        let statement = match resource {
            PlanResource::AiChat => {
                "UPDATE subscriptions
                 SET ai_chat_count = ai_chat_count + 1, updated_at = now()
                 WHERE user_id = $1 AND status = 'active'
                   AND (ai_chat_limit = -1 OR ai_chat_count < ai_chat_limit)
                 RETURNING ai_chat_count AS count"
            }
            PlanResource::TaskGeneration => {
                "UPDATE subscriptions
                 SET generation_count = generation_count + 1, updated_at = now()
                 WHERE user_id = $1 AND status = 'active'
                   AND (generation_limit = -1 OR generation_count < generation_limit)
                 RETURNING generation_count AS count"
            }
        };
        let conn = self.conn().await?;
        let row = conn.query_opt(statement, &[&user_id]).await?;
        Ok(row.map(|r| r.get("count")))
    }
}
