//! Read-side statistics, computed from source rows when asked for.

use async_graphql::{ComplexObject, SimpleObject};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::branch::totals::BranchTotals;
use crate::models::branch::Branch;
use crate::models::user::User;

/// A branch's numbers, both recomputed and as stored on the branch
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug, PartialEq)]
#[graphql(complex)]
pub struct BranchStats {
    pub branch_id: i64,
    /// Members currently in the branch
    pub members: i64,
    /// Approved hours across current members
    pub member_hours: Decimal,
    /// Events attended across current members
    pub events_attended: i64,
    /// Events the branch has run
    pub events: i64,
    /// Hours requests waiting for review
    pub pending_requests: i64,
    pub stored_hours: Decimal,
    pub stored_events: i32,
    pub stored_users: i32,
}

#[ComplexObject]
impl BranchStats {
    /// Whether the stored counters agree with the source rows
    pub async fn in_sync(&self) -> bool {
        self.is_in_sync()
    }
}

impl BranchStats {
    pub fn is_in_sync(&self) -> bool {
        self.member_hours == self.stored_hours
            && self.events_attended == i64::from(self.stored_events)
            && self.members == i64::from(self.stored_users)
    }

    pub async fn for_branch(actor: &User, branch_id: i64, pool: &PgPool) -> AppResult<Self> {
        actor.ensure_admin_of(Some(branch_id))?;

        sqlx::query_as::<_, Self>(
            "SELECT b.id AS branch_id,
                 (SELECT COUNT(*) FROM users u WHERE u.branch_id = b.id) AS members,
                 (SELECT COALESCE(SUM(u.total_hours), 0) FROM users u WHERE u.branch_id = b.id)
                     AS member_hours,
                 (SELECT COALESCE(SUM(u.total_events_attended), 0)::BIGINT
                     FROM users u WHERE u.branch_id = b.id) AS events_attended,
                 (SELECT COUNT(*) FROM events e WHERE e.branch_id = b.id) AS events,
                 (SELECT COUNT(*) FROM hours_requests hr
                     JOIN users u ON u.id = hr.user_id
                     WHERE u.branch_id = b.id AND hr.status = 'pending') AS pending_requests,
                 b.total_hours AS stored_hours,
                 b.total_events AS stored_events,
                 b.total_users AS stored_users
             FROM branches b WHERE b.id = $1",
        )
        .bind(branch_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No branch with id {}", branch_id)))
    }
}

/// Organization-wide totals for the public site
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug, PartialEq)]
pub struct OrganizationTotals {
    pub branches: i64,
    pub users: i64,
    pub total_hours: Decimal,
    pub events_attended: i64,
    pub events: i64,
    pub approved_requests: i64,
}

impl OrganizationTotals {
    pub async fn compute(pool: &PgPool) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT
                 (SELECT COUNT(*) FROM branches) AS branches,
                 (SELECT COUNT(*) FROM users) AS users,
                 (SELECT COALESCE(SUM(total_hours), 0) FROM users) AS total_hours,
                 (SELECT COALESCE(SUM(total_events_attended), 0)::BIGINT FROM users)
                     AS events_attended,
                 (SELECT COUNT(*) FROM events) AS events,
                 (SELECT COUNT(*) FROM hours_requests WHERE status = 'approved')
                     AS approved_requests",
        )
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

/// Rewrites a branch's stored counters from its members' totals.
pub async fn recompute_branch_counters(
    actor: &User,
    branch_id: i64,
    pool: &PgPool,
) -> AppResult<Branch> {
    actor.ensure_super_admin()?;

    let mut tx = pool.begin().await?;
    let stored = BranchTotals::lock(branch_id, &mut tx).await?;
    let computed = sqlx::query_as::<_, BranchTotals>(
        "SELECT COALESCE(SUM(total_hours), 0) AS total_hours,
             COALESCE(SUM(total_events_attended), 0)::INTEGER AS total_events,
             COUNT(*)::INTEGER AS total_users
         FROM users WHERE branch_id = $1",
    )
    .bind(branch_id)
    .fetch_one(&mut tx)
    .await?;
    computed.store(branch_id, &mut tx).await?;
    tx.commit().await?;

    if stored != computed {
        tracing::info!(
            actor = actor.id,
            branch = branch_id,
            ?stored,
            ?computed,
            "corrected branch counters"
        );
    }

    Branch::with_id(branch_id, pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> BranchStats {
        BranchStats {
            branch_id: 1,
            members: 3,
            member_hours: Decimal::new(125, 1),
            events_attended: 4,
            events: 6,
            pending_requests: 2,
            stored_hours: Decimal::new(125, 1),
            stored_events: 4,
            stored_users: 3,
        }
    }

    #[test]
    fn matching_counters_are_in_sync() {
        assert!(stats().is_in_sync());
    }

    #[test]
    fn drifted_counters_are_reported() {
        let drifted = BranchStats {
            stored_users: 4,
            ..stats()
        };
        assert!(!drifted.is_in_sync());
    }
}
