use std::collections::HashSet;

use async_graphql::{ComplexObject, Context, InputObject, Result, ResultExt, SimpleObject};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::user::session::SessionContext;
use crate::models::user::User;
use crate::models::DateTime;
use crate::storage::{Bucket, NewUpload, Storage};
use crate::util::{current_time, ensure_confirmed, optional_text, require_text};

pub mod join_code;
pub mod leader;
pub mod totals;
pub mod transfer;

use join_code::{JoinCode, JoinCodeDraws};
use leader::{BranchLeader, NewLeader, ValidLeader};

/// This branch can never be edited or deleted.
pub const PROTECTED_BRANCH: &str = "Innovation Academy";

/// A school chapter of the organization
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct Branch {
    /// The ID of the branch
    pub id: i64,
    /// The name of the branch
    pub name: String,
    /// The school the branch is based at
    pub school_name: String,
    /// Where the branch is located
    pub location: String,
    /// A short description of the branch
    pub description: Option<String>,
    /// Approved volunteer hours across all members
    pub total_hours: Decimal,
    /// Events attended across all members
    pub total_events: i32,
    /// How many members the branch has
    pub total_users: i32,

    #[graphql(skip)]
    pub join_code: String,
    #[graphql(skip)]
    pub image_path: Option<String>,
    #[graphql(skip)]
    pub created_at: OffsetDateTime,
}

#[ComplexObject]
impl Branch {
    /// The code new members use to join, only visible to the branch's admins
    pub async fn join_code(&self, ctx: &Context<'_>) -> Option<String> {
        ctx.data_opt::<SessionContext>()
            .filter(|session| session.user.is_admin_of(Some(self.id)))
            .map(|_| self.join_code.clone())
    }

    /// A public link to the branch's image
    pub async fn image_url(&self, ctx: &Context<'_>) -> Option<String> {
        let storage: &Storage = ctx.data_unchecked();
        self.image_path.as_deref().map(|path| storage.public_url(path))
    }

    /// The leaders of the branch
    pub async fn leaders(&self, ctx: &Context<'_>) -> Result<Vec<BranchLeader>> {
        let pool: &PgPool = ctx.data_unchecked();
        BranchLeader::for_branch(self.id, pool).await.extend()
    }

    /// Whether this branch is locked against edits and deletion
    pub async fn protected(&self) -> bool {
        is_protected_name(&self.name)
    }

    /// When the branch was created
    pub async fn created_at(&self) -> DateTime {
        DateTime::from(self.created_at)
    }
}

/// The result of creating a branch. Image upload failures don't stop
/// creation, they are reported here instead.
#[derive(SimpleObject)]
pub struct BranchCreation {
    pub branch: Branch,
    pub warnings: Vec<String>,
}

/// What was removed along with a deleted branch
#[derive(SimpleObject, Debug, PartialEq, Eq)]
pub struct BranchDeletionSummary {
    pub leaders: i64,
    pub users: i64,
    pub events: i64,
    pub hour_requests: i64,
    pub images_deleted: i64,
    pub message: String,
}

impl BranchDeletionSummary {
    pub fn describe(name: &str, leaders: i64, users: i64, events: i64, hour_requests: i64) -> String {
        format!(
            "Deleted {} along with {} {}, {} {}, {} {} and {} hour {}.",
            name,
            leaders,
            plural(leaders, "leader", "leaders"),
            users,
            plural(users, "member", "members"),
            events,
            plural(events, "event", "events"),
            hour_requests,
            plural(hour_requests, "request", "requests"),
        )
    }
}

fn plural<'a>(count: i64, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Matches the protected branch regardless of case or spacing.
pub fn is_protected_name(name: &str) -> bool {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .eq_ignore_ascii_case(PROTECTED_BRANCH)
}

const BRANCH_COLUMNS: &str = "id, name, school_name, location, description, total_hours,
     total_events, total_users, join_code, image_path, created_at";

impl Branch {
    pub fn ensure_not_protected(&self) -> AppResult<()> {
        if is_protected_name(&self.name) {
            Err(AppError::ProtectedBranch(self.name.clone()))
        } else {
            Ok(())
        }
    }

    pub async fn with_id(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Self> {
        Self::with_id_opt(id, conn)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No branch with id {}", id)))
    }

    pub async fn with_id_opt(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM branches WHERE id = $1",
            BRANCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(Into::into)
    }

    pub async fn with_join_code_opt(
        code: &JoinCode,
        conn: impl PgExecutor<'_>,
    ) -> AppResult<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM branches WHERE join_code = $1",
            BRANCH_COLUMNS
        ))
        .bind(code.as_str())
        .fetch_optional(conn)
        .await
        .map_err(Into::into)
    }

    pub async fn all(pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM branches ORDER BY name",
            BRANCH_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    async fn join_codes(pool: &PgPool) -> AppResult<HashSet<JoinCode>> {
        let codes: Vec<String> = sqlx::query_scalar("SELECT join_code FROM branches")
            .fetch_all(pool)
            .await?;

        Ok(codes
            .iter()
            .filter_map(|code| JoinCode::parse(code).ok())
            .collect())
    }

    pub async fn create(
        actor: &User,
        new_branch: NewBranch,
        join_code_attempts: usize,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<BranchCreation> {
        actor.ensure_super_admin()?;
        let new_branch = new_branch.validate()?;

        let mut taken = Self::join_codes(pool).await?;
        let mut rng = StdRng::from_entropy();
        let mut draws = JoinCodeDraws::new(join_code_attempts);
        let mut tx = pool.begin().await?;

        // The unique index settles races the pre-check can't see.
        let branch_id = loop {
            let code = draws.next_unused(&taken, || JoinCode::random(&mut rng))?;
            let id: Option<i64> = sqlx::query_scalar(
                "INSERT INTO branches (name, school_name, location, description, join_code)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (join_code) DO NOTHING
                 RETURNING id",
            )
            .bind(&new_branch.name)
            .bind(&new_branch.school_name)
            .bind(&new_branch.location)
            .bind(&new_branch.description)
            .bind(code.as_str())
            .fetch_optional(&mut tx)
            .await?;

            match id {
                Some(id) => break id,
                None => {
                    tracing::debug!(code = %code, "join code taken at insert, drawing again");
                    taken.insert(code);
                }
            }
        };

        let mut leaders = Vec::with_capacity(new_branch.leaders.len());
        for leader in &new_branch.leaders {
            leaders.push(BranchLeader::create(branch_id, leader, &mut tx).await?);
        }
        tx.commit().await?;

        let mut warnings = Vec::new();
        let owner = format!("branch-{}", branch_id);
        let now = current_time();

        if let Some(image) = &new_branch.image {
            match storage.upload(Bucket::BranchImages, &owner, image, now).await {
                Ok(path) => Self::set_image(branch_id, &path, pool).await?,
                Err(err) => {
                    tracing::warn!(branch = branch_id, "failed to upload branch image: {}", err);
                    warnings.push(format!("The branch image could not be uploaded: {}", err));
                }
            }
        }

        for (leader, input) in leaders.iter().zip(&new_branch.leaders) {
            if let Some(image) = &input.image {
                match storage.upload(Bucket::BranchImages, &owner, image, now).await {
                    Ok(path) => BranchLeader::set_image(leader.id, &path, pool).await?,
                    Err(err) => {
                        tracing::warn!(leader = leader.id, "failed to upload leader image: {}", err);
                        warnings.push(format!(
                            "The image for {} could not be uploaded: {}",
                            leader.name, err
                        ));
                    }
                }
            }
        }

        let branch = Self::with_id(branch_id, pool).await?;
        tracing::info!(actor = actor.id, branch = branch.id, "created branch");

        Ok(BranchCreation { branch, warnings })
    }

    async fn set_image(id: i64, path: &str, conn: impl PgExecutor<'_>) -> AppResult<()> {
        sqlx::query("UPDATE branches SET image_path = $1 WHERE id = $2")
            .bind(path)
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Updates the branch, replacing its image if a new one is given. The old
    /// image is only removed once the new one is stored and referenced.
    pub async fn update(
        actor: &User,
        id: i64,
        update: BranchUpdate,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<Self> {
        actor.ensure_super_admin()?;
        let branch = Self::with_id(id, pool).await?;
        branch.ensure_not_protected()?;

        let name = require_text("Name", &update.name)?;
        let school_name = require_text("School name", &update.school_name)?;
        let location = require_text("Location", &update.location)?;
        let new_image_path = match &update.image {
            Some(image) => Some(
                storage
                    .upload(
                        Bucket::BranchImages,
                        &format!("branch-{}", id),
                        image,
                        current_time(),
                    )
                    .await?,
            ),
            None => None,
        };

        let updated = sqlx::query_as::<_, Self>(&format!(
            "UPDATE branches
             SET name = $1, school_name = $2, location = $3, description = $4,
                 image_path = COALESCE($5, image_path)
             WHERE id = $6
             RETURNING {}",
            BRANCH_COLUMNS
        ))
        .bind(name)
        .bind(school_name)
        .bind(location)
        .bind(optional_text(update.description))
        .bind(&new_image_path)
        .bind(id)
        .fetch_one(pool)
        .await?;

        if let (Some(_), Some(old_path)) = (&new_image_path, &branch.image_path) {
            storage
                .delete_best_effort(Bucket::BranchImages, [old_path])
                .await;
        }

        tracing::info!(actor = actor.id, branch = id, "updated branch");
        Ok(updated)
    }

    /// Deletes the branch and everything that belongs to it.
    ///
    /// Stored images and member logins are cleaned up best-effort; removing the
    /// branch row is what counts, and the database cascades it to members,
    /// events, sign-ups and hour requests.
    pub async fn delete(
        actor: &User,
        id: i64,
        confirmation: &str,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<BranchDeletionSummary> {
        actor.ensure_super_admin()?;
        let branch = Self::with_id(id, pool).await?;
        branch.ensure_not_protected()?;
        ensure_confirmed(confirmation)?;
        if actor.branch_id == Some(id) {
            return Err(AppError::validation(
                "Move to another branch before deleting your own",
            ));
        }

        let leader_images: Vec<Option<String>> =
            sqlx::query_scalar("SELECT image_path FROM branch_leaders WHERE branch_id = $1")
                .bind(id)
                .fetch_all(pool)
                .await?;
        let member_emails: Vec<String> =
            sqlx::query_scalar("SELECT email FROM users WHERE branch_id = $1")
                .bind(id)
                .fetch_all(pool)
                .await?;
        let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE branch_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        let proof_paths: Vec<String> = sqlx::query_scalar(
            "SELECT image_path FROM hours_requests
             WHERE user_id IN (SELECT id FROM users WHERE branch_id = $1)",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        let public_images: Vec<String> = branch
            .image_path
            .iter()
            .cloned()
            .chain(leader_images.iter().flatten().cloned())
            .collect();
        let images_deleted = storage
            .delete_best_effort(Bucket::BranchImages, &public_images)
            .await
            + storage
                .delete_best_effort(Bucket::HourProofs, &proof_paths)
                .await;

        sqlx::query("DELETE FROM branches WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        for email in &member_emails {
            if let Err(err) = sqlx::query("DELETE FROM credentials WHERE email = $1")
                .bind(email)
                .execute(pool)
                .await
            {
                tracing::warn!(%email, "failed to delete login of removed member: {}", err);
            }
        }

        let leaders = leader_images.len() as i64;
        let users = member_emails.len() as i64;
        let hour_requests = proof_paths.len() as i64;
        tracing::info!(actor = actor.id, branch = id, users, "deleted branch");

        Ok(BranchDeletionSummary {
            leaders,
            users,
            events,
            hour_requests,
            images_deleted: images_deleted as i64,
            message: BranchDeletionSummary::describe(
                &branch.name,
                leaders,
                users,
                events,
                hour_requests,
            ),
        })
    }
}

#[derive(InputObject)]
pub struct NewBranch {
    pub name: String,
    pub school_name: String,
    pub location: String,
    pub description: Option<String>,
    pub image: Option<NewUpload>,
    /// At least one leader must be filled out completely
    pub leaders: Vec<NewLeader>,
}

/// A branch form that passed validation
pub struct ValidNewBranch {
    pub name: String,
    pub school_name: String,
    pub location: String,
    pub description: Option<String>,
    pub image: Option<NewUpload>,
    pub leaders: Vec<ValidLeader>,
}

impl NewBranch {
    pub fn validate(self) -> AppResult<ValidNewBranch> {
        let name = require_text("Name", &self.name)?;
        let school_name = require_text("School name", &self.school_name)?;
        let location = require_text("Location", &self.location)?;

        let leaders = self
            .leaders
            .into_iter()
            .filter(|leader| !leader.is_blank())
            .map(NewLeader::validate)
            .collect::<AppResult<Vec<_>>>()?;
        if leaders.is_empty() {
            return Err(AppError::validation(
                "At least one leader needs a name, email and description",
            ));
        }

        Ok(ValidNewBranch {
            name,
            school_name,
            location,
            description: optional_text(self.description),
            image: self.image,
            leaders,
        })
    }
}

#[derive(InputObject)]
pub struct BranchUpdate {
    pub name: String,
    pub school_name: String,
    pub location: String,
    pub description: Option<String>,
    /// A replacement image, if any
    pub image: Option<NewUpload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::mock_branch;

    fn leader(name: &str, email: &str, description: &str) -> NewLeader {
        NewLeader {
            name: name.to_owned(),
            email: email.to_owned(),
            description: description.to_owned(),
            image: None,
        }
    }

    fn new_branch(leaders: Vec<NewLeader>) -> NewBranch {
        NewBranch {
            name: " Oak High ".to_owned(),
            school_name: "Oak High School".to_owned(),
            location: "Portland, OR".to_owned(),
            description: Some("   ".to_owned()),
            image: None,
            leaders,
        }
    }

    #[test]
    fn protected_branch_matches_loosely() {
        assert!(is_protected_name("Innovation Academy"));
        assert!(is_protected_name("  innovation   ACADEMY "));
        assert!(!is_protected_name("Innovation Academy East"));
    }

    #[test]
    fn protected_branch_rejects_changes() {
        let protected = Branch {
            name: "innovation academy".to_owned(),
            ..mock_branch()
        };
        assert!(matches!(
            protected.ensure_not_protected(),
            Err(AppError::ProtectedBranch(_))
        ));
        assert!(mock_branch().ensure_not_protected().is_ok());
    }

    #[test]
    fn new_branch_needs_a_complete_leader() {
        assert!(new_branch(vec![]).validate().is_err());
        assert!(new_branch(vec![leader("", "", "")]).validate().is_err());
        assert!(new_branch(vec![leader("Ana", "", "Founder")]).validate().is_err());

        let valid = new_branch(vec![
            leader("", "", ""),
            leader("Ana", "ana@oak.edu", "Founder"),
        ])
        .validate()
        .unwrap();
        assert_eq!(valid.name, "Oak High");
        assert_eq!(valid.description, None);
        assert_eq!(valid.leaders.len(), 1);
    }

    #[test]
    fn deletion_summary_reads_naturally() {
        assert_eq!(
            BranchDeletionSummary::describe("Oak High", 1, 12, 3, 0),
            "Deleted Oak High along with 1 leader, 12 members, 3 events and 0 hour requests."
        );
    }
}
