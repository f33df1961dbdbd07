use async_graphql::{ComplexObject, Context, InputObject, SimpleObject};
use sqlx::{PgExecutor, PgPool};

use crate::error::{AppError, AppResult};
use crate::models::branch::Branch;
use crate::models::user::User;
use crate::storage::{Bucket, NewUpload, Storage};
use crate::util::{current_time, require_email, require_text};

/// A student who leads a branch, shown on the public directory
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct BranchLeader {
    pub id: i64,
    pub branch_id: i64,
    pub name: String,
    pub email: String,
    pub description: String,

    #[graphql(skip)]
    pub image_path: Option<String>,
}

#[ComplexObject]
impl BranchLeader {
    pub async fn image_url(&self, ctx: &Context<'_>) -> Option<String> {
        let storage: &Storage = ctx.data_unchecked();
        self.image_path.as_deref().map(|path| storage.public_url(path))
    }
}

impl BranchLeader {
    pub async fn with_id(id: i64, pool: &PgPool) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT id, branch_id, name, email, description, image_path
             FROM branch_leaders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No branch leader with id {}", id)))
    }

    pub async fn for_branch(branch_id: i64, pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, branch_id, name, email, description, image_path
             FROM branch_leaders WHERE branch_id = $1 ORDER BY id",
        )
        .bind(branch_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn create(
        branch_id: i64,
        leader: &ValidLeader,
        conn: impl PgExecutor<'_>,
    ) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO branch_leaders (branch_id, name, email, description)
             VALUES ($1, $2, $3, $4)
             RETURNING id, branch_id, name, email, description, image_path",
        )
        .bind(branch_id)
        .bind(&leader.name)
        .bind(&leader.email)
        .bind(&leader.description)
        .fetch_one(conn)
        .await
        .map_err(Into::into)
    }

    pub async fn set_image(id: i64, path: &str, conn: impl PgExecutor<'_>) -> AppResult<()> {
        sqlx::query("UPDATE branch_leaders SET image_path = $1 WHERE id = $2")
            .bind(path)
            .bind(id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Adds a leader to an existing branch. Unlike branch creation, a failed
    /// image upload fails the whole operation.
    pub async fn add(
        actor: &User,
        branch_id: i64,
        new_leader: NewLeader,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<Self> {
        actor.ensure_super_admin()?;
        Branch::with_id(branch_id, pool).await?.ensure_not_protected()?;
        let leader = new_leader.validate()?;

        let image_path = match &leader.image {
            Some(image) => Some(
                storage
                    .upload(
                        Bucket::BranchImages,
                        &format!("branch-{}", branch_id),
                        image,
                        current_time(),
                    )
                    .await?,
            ),
            None => None,
        };

        let mut tx = pool.begin().await?;
        let mut created = Self::create(branch_id, &leader, &mut tx).await?;
        if let Some(path) = image_path {
            Self::set_image(created.id, &path, &mut tx).await?;
            created.image_path = Some(path);
        }
        tx.commit().await?;

        tracing::info!(actor = actor.id, branch = branch_id, leader = created.id, "added leader");
        Ok(created)
    }

    pub async fn remove(actor: &User, id: i64, storage: &Storage, pool: &PgPool) -> AppResult<()> {
        actor.ensure_super_admin()?;
        let leader = Self::with_id(id, pool).await?;
        Branch::with_id(leader.branch_id, pool)
            .await?
            .ensure_not_protected()?;

        sqlx::query("DELETE FROM branch_leaders WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        storage
            .delete_best_effort(Bucket::BranchImages, leader.image_path.iter())
            .await;

        tracing::info!(actor = actor.id, leader = id, "removed leader");
        Ok(())
    }
}

#[derive(InputObject, Clone)]
pub struct NewLeader {
    pub name: String,
    pub email: String,
    pub description: String,
    pub image: Option<NewUpload>,
}

/// A leader profile with every required field filled in
#[derive(Debug)]
pub struct ValidLeader {
    pub name: String,
    pub email: String,
    pub description: String,
    pub image: Option<NewUpload>,
}

impl NewLeader {
    /// Empty leader rows in the form are ignored rather than rejected.
    pub fn is_blank(&self) -> bool {
        [&self.name, &self.email, &self.description]
            .iter()
            .all(|field| field.trim().is_empty())
    }

    pub fn validate(self) -> AppResult<ValidLeader> {
        Ok(ValidLeader {
            name: require_text("Leader name", &self.name)?,
            email: require_email(&self.email)?,
            description: require_text("Leader description", &self.description)?,
            image: self.image,
        })
    }
}
