//! The volunteer hub API server

use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use async_graphql::{Request, Response};
use axum::extract::{Extension, Path, Query};
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use volunteer_hub::config::Config;
use volunteer_hub::error::{AppError, AppResult};
use volunteer_hub::graphql::{build_schema, VolunteerSchema};
use volunteer_hub::models::user::session::SessionContext;
use volunteer_hub::storage::{Bucket, Storage};
use volunteer_hub::util::{current_time, init_logging};

const TOKEN_HEADER: &str = "token";

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(error) = run().await {
        tracing::error!("{:#}", error);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let pool = volunteer_hub::db::connect(&config).await?;
    let storage = Storage::from_config(&config);
    let address = config.bind_address;

    let app = Router::new()
        .route("/", get(playground).post(query))
        .route("/files/:bucket/*path", get(download))
        .layer(Extension(build_schema()))
        .layer(Extension(pool))
        .layer(Extension(storage))
        .layer(Extension(config))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    tracing::info!(%address, "listening");
    axum::Server::bind(&address)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn query(
    Extension(schema): Extension<VolunteerSchema>,
    Extension(pool): Extension<PgPool>,
    Extension(storage): Extension<Storage>,
    Extension(config): Extension<Config>,
    headers: HeaderMap,
    Json(request): Json<Request>,
) -> AppResult<Json<Response>> {
    let session = match get_token(&headers)? {
        Some(token) => SessionContext::resolve(token, &pool).await?,
        None => None,
    };

    let mut request = request.data(pool).data(storage).data(config);
    if let Some(session) = session {
        request = request.data(session);
    }

    Ok(Json(schema.execute(request).await))
}

async fn playground(headers: HeaderMap) -> AppResult<Html<String>> {
    let mut config = GraphQLPlaygroundConfig::new("/");
    if let Some(token) = get_token(&headers)? {
        config = config.with_header(TOKEN_HEADER, token);
    }

    Ok(Html(playground_source(config)))
}

#[derive(Deserialize)]
struct SignedLink {
    expires: Option<i64>,
    signature: Option<String>,
}

async fn download(
    Extension(storage): Extension<Storage>,
    Path((bucket, path)): Path<(String, String)>,
    Query(link): Query<SignedLink>,
) -> AppResult<impl IntoResponse> {
    let bucket = Bucket::from_name(&bucket)
        .ok_or_else(|| AppError::not_found(format!("No bucket named {}", bucket)))?;
    let path = path.trim_start_matches('/');

    if !bucket.is_public() {
        match (link.expires, link.signature.as_deref()) {
            (Some(expires), Some(signature)) => {
                storage.verify_signature(bucket, path, expires, signature, current_time())?
            }
            _ => return Err(AppError::forbidden("this file requires a signed link")),
        }
    }

    let content = storage.read(bucket, path).await?;
    Ok(([(CONTENT_TYPE, content_type(path))], content))
}

fn content_type(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or_default();
    match extension.to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

fn get_token(headers: &HeaderMap) -> AppResult<Option<&str>> {
    headers
        .get(TOKEN_HEADER)
        .map(|value| value.to_str().map_err(|_| AppError::Unauthorized))
        .transpose()
}
