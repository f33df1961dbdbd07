use async_graphql::{ComplexObject, Context, InputObject, SimpleObject};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::user::User;
use crate::models::DateTime;
use crate::storage::{Bucket, NewUpload, Storage};
use crate::util::{current_time, optional_text, require_text};

/// An organization supporting the nonprofit, listed on the public site
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct Sponsor {
    pub id: i64,
    pub name: String,
    pub website: Option<String>,

    #[graphql(skip)]
    pub image_path: Option<String>,
    #[graphql(skip)]
    pub created_at: OffsetDateTime,
}

#[ComplexObject]
impl Sponsor {
    pub async fn image_url(&self, ctx: &Context<'_>) -> Option<String> {
        let storage: &Storage = ctx.data_unchecked();
        self.image_path.as_deref().map(|path| storage.public_url(path))
    }

    pub async fn created_at(&self) -> DateTime {
        DateTime::from(self.created_at)
    }
}

impl Sponsor {
    pub async fn with_id(id: i64, pool: &PgPool) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(
            "SELECT id, name, website, image_path, created_at FROM sponsors WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No sponsor with id {}", id)))
    }

    pub async fn all(pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT id, name, website, image_path, created_at FROM sponsors ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn create(
        actor: &User,
        new_sponsor: NewSponsor,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<Self> {
        actor.ensure_super_admin()?;
        let name = require_text("Name", &new_sponsor.name)?;
        let image_path = match &new_sponsor.image {
            Some(image) => Some(
                storage
                    .upload(Bucket::BranchImages, "sponsors", image, current_time())
                    .await?,
            ),
            None => None,
        };

        let sponsor = sqlx::query_as::<_, Self>(
            "INSERT INTO sponsors (name, website, image_path) VALUES ($1, $2, $3)
             RETURNING id, name, website, image_path, created_at",
        )
        .bind(name)
        .bind(optional_text(new_sponsor.website))
        .bind(image_path)
        .fetch_one(pool)
        .await?;

        tracing::info!(actor = actor.id, sponsor = sponsor.id, "added sponsor");
        Ok(sponsor)
    }

    pub async fn delete(actor: &User, id: i64, storage: &Storage, pool: &PgPool) -> AppResult<()> {
        actor.ensure_super_admin()?;
        let sponsor = Self::with_id(id, pool).await?;

        sqlx::query("DELETE FROM sponsors WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        storage
            .delete_best_effort(Bucket::BranchImages, sponsor.image_path.iter())
            .await;

        tracing::info!(actor = actor.id, sponsor = id, "removed sponsor");
        Ok(())
    }
}

#[derive(InputObject)]
pub struct NewSponsor {
    pub name: String,
    pub website: Option<String>,
    pub image: Option<NewUpload>,
}
