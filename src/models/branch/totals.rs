//! The denormalized counters stored on each branch.
//!
//! Counters are only ever changed inside a transaction that first locks the
//! branch row, so the read-modify-write below cannot interleave with another
//! writer.

use rust_decimal::Decimal;
use sqlx::{PgExecutor, Postgres, Transaction};

use crate::error::{AppError, AppResult};

/// What a single user adds to their branch's counters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contribution {
    pub hours: Decimal,
    pub events: i32,
    pub members: i32,
}

impl Contribution {
    pub fn of_member(hours: Decimal, events: i32) -> Self {
        Self {
            hours,
            events,
            members: 1,
        }
    }

    /// Hours and events credited by an approval, without a membership slot
    pub fn of_approval(hours: Decimal, events: i32) -> Self {
        Self {
            hours,
            events,
            members: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, sqlx::FromRow)]
pub struct BranchTotals {
    pub total_hours: Decimal,
    pub total_events: i32,
    pub total_users: i32,
}

impl BranchTotals {
    pub fn added(self, contribution: Contribution) -> Self {
        Self {
            total_hours: self.total_hours + contribution.hours,
            total_events: self.total_events + contribution.events,
            total_users: self.total_users + contribution.members,
        }
    }

    /// Subtracts the contribution, never going below zero.
    pub fn removed(self, contribution: Contribution) -> Self {
        Self {
            total_hours: (self.total_hours - contribution.hours).max(Decimal::ZERO),
            total_events: (self.total_events - contribution.events).max(0),
            total_users: (self.total_users - contribution.members).max(0),
        }
    }

    pub async fn lock(branch_id: i64, tx: &mut Transaction<'_, Postgres>) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT total_hours, total_events, total_users FROM branches WHERE id = $1 FOR UPDATE",
        )
        .bind(branch_id)
        .fetch_optional(tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No branch with id {}", branch_id)))
    }

    pub async fn store(self, branch_id: i64, conn: impl PgExecutor<'_>) -> AppResult<()> {
        sqlx::query(
            "UPDATE branches SET total_hours = $1, total_events = $2, total_users = $3
             WHERE id = $4",
        )
        .bind(self.total_hours)
        .bind(self.total_events)
        .bind(self.total_users)
        .bind(branch_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn add_to(
        branch_id: i64,
        contribution: Contribution,
        tx: &mut Transaction<'_, Postgres>,
    ) -> AppResult<()> {
        let totals = Self::lock(branch_id, tx).await?;
        totals.added(contribution).store(branch_id, tx).await
    }

    pub async fn remove_from(
        branch_id: i64,
        contribution: Contribution,
        tx: &mut Transaction<'_, Postgres>,
    ) -> AppResult<()> {
        let totals = Self::lock(branch_id, tx).await?;
        totals.removed(contribution).store(branch_id, tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(hours: i64, events: i32, users: i32) -> BranchTotals {
        BranchTotals {
            total_hours: Decimal::new(hours, 0),
            total_events: events,
            total_users: users,
        }
    }

    #[test]
    fn removing_a_member_is_floored_at_zero() {
        let contribution = Contribution::of_member(Decimal::new(20, 0), 4);

        assert_eq!(totals(50, 10, 5).removed(contribution), totals(30, 6, 4));
        assert_eq!(totals(5, 1, 0).removed(contribution), totals(0, 0, 0));
    }

    #[test]
    fn transfers_move_the_whole_contribution() {
        let contribution = Contribution::of_member(Decimal::new(20, 0), 4);
        let source = totals(100, 12, 8).removed(contribution);
        let destination = totals(0, 0, 0).added(contribution);

        assert_eq!(source, totals(80, 8, 7));
        assert_eq!(destination, totals(20, 4, 1));
    }

    #[test]
    fn approvals_do_not_add_members() {
        let credited = totals(10, 2, 3).added(Contribution::of_approval(Decimal::new(35, 1), 1));

        assert_eq!(credited.total_hours, Decimal::new(135, 1));
        assert_eq!(credited.total_events, 3);
        assert_eq!(credited.total_users, 3);
    }
}
