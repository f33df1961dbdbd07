//! Moving a member from one branch to another with a join code.

use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::branch::join_code::JoinCode;
use crate::models::branch::totals::{BranchTotals, Contribution};
use crate::models::branch::Branch;
use crate::models::user::{Role, User, USER_COLUMNS};

/// Everything a transfer changes, worked out before touching the database
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferPlan {
    pub from: Option<i64>,
    pub to: i64,
    pub contribution: Contribution,
    pub role: Role,
}

impl TransferPlan {
    pub fn new(user: &User, destination: &Branch) -> AppResult<Self> {
        if user.branch_id == Some(destination.id) {
            return Err(AppError::validation("You are already a member of that branch"));
        }

        Ok(Self {
            from: user.branch_id,
            to: destination.id,
            contribution: user.contribution(),
            role: user.role.after_transfer(),
        })
    }

    /// Branch rows to lock, in a stable order so concurrent transfers between
    /// the same two branches can't deadlock.
    pub fn lock_order(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.from.into_iter().chain([self.to]).collect();
        ids.sort_unstable();
        ids
    }
}

pub async fn transfer(user_id: i64, code: &str, pool: &PgPool) -> AppResult<User> {
    let code = JoinCode::parse(code)?;
    let destination = Branch::with_join_code_opt(&code, pool)
        .await?
        .ok_or_else(|| AppError::not_found("No branch has that join code"))?;

    let mut tx = pool.begin().await?;
    let user = User::lock(user_id, &mut tx).await?;
    let plan = TransferPlan::new(&user, &destination)?;

    for branch_id in plan.lock_order() {
        BranchTotals::lock(branch_id, &mut tx).await?;
    }
    if let Some(source) = plan.from {
        BranchTotals::remove_from(source, plan.contribution, &mut tx).await?;
    }
    BranchTotals::add_to(plan.to, plan.contribution, &mut tx).await?;

    let moved = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET branch_id = $1, role = $2 WHERE id = $3 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(plan.to)
    .bind(plan.role)
    .bind(user_id)
    .fetch_one(&mut tx)
    .await?;
    tx.commit().await?;

    tracing::info!(
        user = user_id,
        from = ?plan.from,
        to = plan.to,
        role = ?plan.role,
        "transferred member"
    );
    Ok(moved)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::tests::mock::{mock_branch, mock_user};

    #[test]
    fn admins_are_demoted_and_carry_their_totals() {
        let admin = User {
            role: Role::Admin,
            total_hours: Decimal::new(20, 0),
            total_events_attended: 4,
            ..mock_user()
        };
        let destination = Branch {
            id: 2,
            ..mock_branch()
        };

        let plan = TransferPlan::new(&admin, &destination).unwrap();

        assert_eq!(plan.from, Some(1));
        assert_eq!(plan.to, 2);
        assert_eq!(plan.role, Role::Member);
        assert_eq!(
            plan.contribution,
            Contribution::of_member(Decimal::new(20, 0), 4)
        );
    }

    #[test]
    fn super_admins_keep_their_role() {
        let super_admin = User {
            role: Role::SuperAdmin,
            ..mock_user()
        };
        let destination = Branch {
            id: 2,
            ..mock_branch()
        };

        let plan = TransferPlan::new(&super_admin, &destination).unwrap();
        assert_eq!(plan.role, Role::SuperAdmin);
    }

    #[test]
    fn transferring_to_the_current_branch_is_rejected() {
        assert!(matches!(
            TransferPlan::new(&mock_user(), &mock_branch()),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn branches_are_locked_lowest_first() {
        let user = User {
            branch_id: Some(9),
            ..mock_user()
        };
        let destination = Branch {
            id: 3,
            ..mock_branch()
        };

        let plan = TransferPlan::new(&user, &destination).unwrap();
        assert_eq!(plan.lock_order(), vec![3, 9]);
    }
}
