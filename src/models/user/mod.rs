use async_graphql::{ComplexObject, Context, Enum, InputObject, Result, ResultExt, SimpleObject};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::branch::join_code::JoinCode;
use crate::models::branch::totals::{BranchTotals, Contribution};
use crate::models::branch::Branch;
use crate::models::DateTime;
use crate::storage::{Bucket, Storage};
use crate::util::{ensure_confirmed, require_email, require_text};

pub mod session;

use session::Credential;

/// A member's standing in the organization, from least to most privileged
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Enum, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum Role {
    Member,
    BranchLeader,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Roles below super-admin are tied to the branch, so they don't survive a transfer.
    pub fn after_transfer(self) -> Role {
        match self {
            Role::SuperAdmin => Role::SuperAdmin,
            Role::Member | Role::BranchLeader | Role::Admin => Role::Member,
        }
    }

    /// Whether a user holding this role may hand `target` to someone else.
    pub fn can_assign(self, target: Role) -> bool {
        match self {
            Role::SuperAdmin => true,
            Role::Admin => target != Role::SuperAdmin,
            Role::Member | Role::BranchLeader => false,
        }
    }
}

#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct User {
    /// The user's ID
    pub id: i64,
    /// The user's email, which must be unique
    pub email: String,
    /// The user's first name
    pub first_name: String,
    /// The user's last name
    pub last_name: String,
    /// The user's role
    pub role: Role,
    /// The ID of the user's branch (super-admins may have none)
    pub branch_id: Option<i64>,
    /// Approved volunteer hours across all time
    pub total_hours: Decimal,
    /// How many events the user has been credited for attending
    pub total_events_attended: i32,

    #[graphql(skip)]
    pub created_at: OffsetDateTime,
}

#[ComplexObject]
impl User {
    /// The user's full name
    pub async fn full_name(&self) -> String {
        self.full_name_inner()
    }

    /// The branch the user belongs to
    pub async fn branch(&self, ctx: &Context<'_>) -> Result<Option<Branch>> {
        let pool: &PgPool = ctx.data_unchecked();
        match self.branch_id {
            Some(branch_id) => Branch::with_id_opt(branch_id, pool).await.extend(),
            None => Ok(None),
        }
    }

    /// When the user signed up
    pub async fn created_at(&self) -> DateTime {
        DateTime::from(self.created_at)
    }
}

pub(crate) const USER_COLUMNS: &str = "id, email, first_name, last_name, role, branch_id, total_hours,
     total_events_attended, created_at";

impl User {
    pub fn full_name_inner(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn contribution(&self) -> Contribution {
        Contribution::of_member(self.total_hours, self.total_events_attended)
    }

    /// Admins act on their own branch; super-admins act on every branch.
    pub fn is_admin_of(&self, branch_id: Option<i64>) -> bool {
        match self.role {
            Role::SuperAdmin => true,
            Role::Admin => branch_id.is_some() && self.branch_id == branch_id,
            Role::Member | Role::BranchLeader => false,
        }
    }

    pub fn ensure_admin_of(&self, branch_id: Option<i64>) -> AppResult<()> {
        if self.is_admin_of(branch_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("you must be an admin of this branch"))
        }
    }

    pub fn ensure_super_admin(&self) -> AppResult<()> {
        if self.is_super_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("only super-admins can do that"))
        }
    }

    /// The branch a branch-scoped action applies to: an admin's own branch, or
    /// the one a super-admin names.
    pub fn acting_branch(&self, requested: Option<i64>) -> AppResult<i64> {
        match (self.role, requested, self.branch_id) {
            (Role::SuperAdmin, Some(branch_id), _) => Ok(branch_id),
            (Role::SuperAdmin, None, Some(branch_id)) => Ok(branch_id),
            (Role::SuperAdmin, None, None) => {
                Err(AppError::validation("Choose a branch for this action"))
            }
            (_, requested, Some(own_branch)) => {
                if requested.map_or(true, |branch_id| branch_id == own_branch) {
                    Ok(own_branch)
                } else {
                    Err(AppError::forbidden("you can only act on your own branch"))
                }
            }
            (_, _, None) => Err(AppError::forbidden("you are not part of a branch")),
        }
    }

    pub async fn with_id(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Self> {
        Self::with_id_opt(id, conn)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No user with id {}", id)))
    }

    pub async fn with_id_opt(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(Into::into)
    }

    pub async fn with_email_opt(email: &str, conn: impl PgExecutor<'_>) -> AppResult<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(conn)
        .await
        .map_err(Into::into)
    }

    /// Reads the user and holds their row until the transaction ends.
    pub async fn lock(id: i64, tx: &mut Transaction<'_, Postgres>) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM users WHERE id = $1 FOR UPDATE",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No user with id {}", id)))
    }

    pub async fn for_branch(branch_id: i64, pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM users WHERE branch_id = $1 ORDER BY last_name, first_name",
            USER_COLUMNS
        ))
        .bind(branch_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn all(pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM users ORDER BY last_name, first_name",
            USER_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Creates the login and the profile for a new member of the branch the join code names.
    pub async fn register(new_user: NewUser, pool: &PgPool) -> AppResult<Self> {
        let new_user = new_user.validate()?;
        let branch = Branch::with_join_code_opt(&new_user.join_code, pool)
            .await?
            .ok_or_else(|| AppError::validation("No branch has that join code"))?;

        if Credential::exists(&new_user.email, pool).await?
            || Self::with_email_opt(&new_user.email, pool).await?.is_some()
        {
            return Err(AppError::conflict(format!(
                "An account already exists for {}",
                new_user.email
            )));
        }

        let pass_hash = bcrypt::hash(&new_user.password, bcrypt::DEFAULT_COST)?;

        let mut tx = pool.begin().await?;
        Credential::create(&new_user.email, &pass_hash, &mut tx).await?;
        let user = sqlx::query_as::<_, Self>(&format!(
            "INSERT INTO users (email, first_name, last_name, role, branch_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&new_user.email)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(Role::Member)
        .bind(branch.id)
        .fetch_one(&mut tx)
        .await?;
        BranchTotals::add_to(branch.id, Contribution::of_member(Decimal::ZERO, 0), &mut tx)
            .await?;
        tx.commit().await?;

        tracing::info!(user = user.id, branch = branch.id, "registered new member");
        Ok(user)
    }

    pub async fn update_profile(id: i64, update: ProfileUpdate, pool: &PgPool) -> AppResult<Self> {
        let first_name = require_text("First name", &update.first_name)?;
        let last_name = require_text("Last name", &update.last_name)?;

        sqlx::query_as::<_, Self>(&format!(
            "UPDATE users SET first_name = $1, last_name = $2 WHERE id = $3 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(first_name)
        .bind(last_name)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No user with id {}", id)))
    }

    pub async fn set_role(actor: &User, user_id: i64, role: Role, pool: &PgPool) -> AppResult<Self> {
        let target = Self::with_id(user_id, pool).await?;
        actor.ensure_admin_of(target.branch_id)?;
        if !actor.role.can_assign(role) || !actor.role.can_assign(target.role) {
            return Err(AppError::forbidden(format!(
                "you cannot change a {:?} to {:?}",
                target.role, role
            )));
        }
        if role != Role::SuperAdmin && target.branch_id.is_none() {
            return Err(AppError::validation(
                "Users without a branch can only be super-admins",
            ));
        }

        let user = sqlx::query_as::<_, Self>(&format!(
            "UPDATE users SET role = $1 WHERE id = $2 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(role)
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        tracing::info!(actor = actor.id, user = user_id, ?role, "changed role");
        Ok(user)
    }

    /// Removes a user and everything they own.
    ///
    /// Stored proof photos and the login are cleaned up best-effort; the
    /// profile deletion is what counts.
    pub async fn delete(
        actor: &User,
        user_id: i64,
        confirmation: &str,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<()> {
        ensure_confirmed(confirmation)?;
        let user = Self::with_id(user_id, pool).await?;
        if actor.id != user.id {
            actor.ensure_admin_of(user.branch_id)?;
            if user.is_super_admin() && !actor.is_super_admin() {
                return Err(AppError::forbidden("only super-admins can delete super-admins"));
            }
        }

        let proof_paths: Vec<String> =
            sqlx::query_scalar("SELECT image_path FROM hours_requests WHERE user_id = $1")
                .bind(user.id)
                .fetch_all(pool)
                .await?;
        storage
            .delete_best_effort(Bucket::HourProofs, &proof_paths)
            .await;

        let mut tx = pool.begin().await?;
        let user = Self::lock(user.id, &mut tx).await?;
        if let Some(branch_id) = user.branch_id {
            BranchTotals::remove_from(branch_id, user.contribution(), &mut tx).await?;
        }
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user.id)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;

        if let Err(err) = Credential::delete(&user.email, pool).await {
            tracing::warn!(user = user.id, "failed to delete login for removed user: {}", err);
        }

        tracing::info!(actor = actor.id, user = user.id, "deleted user");
        Ok(())
    }
}

#[derive(InputObject)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub password_confirmation: String,
    /// The 6-digit code of the branch to join
    pub join_code: String,
}

/// A sign-up form that passed validation
#[derive(Debug)]
pub struct ValidNewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub join_code: JoinCode,
}

impl NewUser {
    pub const MIN_PASSWORD_LENGTH: usize = 6;

    pub fn validate(self) -> AppResult<ValidNewUser> {
        let email = require_email(&self.email)?;
        let first_name = require_text("First name", &self.first_name)?;
        let last_name = require_text("Last name", &self.last_name)?;

        if self.password.chars().count() < Self::MIN_PASSWORD_LENGTH {
            return Err(AppError::validation(format!(
                "Password must be at least {} characters",
                Self::MIN_PASSWORD_LENGTH
            )));
        }
        if self.password != self.password_confirmation {
            return Err(AppError::validation("Passwords do not match"));
        }

        Ok(ValidNewUser {
            email,
            first_name,
            last_name,
            password: self.password,
            join_code: JoinCode::parse(&self.join_code)?,
        })
    }
}

#[derive(InputObject)]
pub struct ProfileUpdate {
    pub first_name: String,
    pub last_name: String,
}
