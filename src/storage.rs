//! File storage for hour-request proof photos and branch images.
//!
//! Objects live under `STORAGE_ROOT/<bucket>/<owner>/<timestamp>-<nonce>.<ext>`. The
//! branch image bucket is public; proof photos are only reachable through
//! short-lived signed URLs.

use std::path::{Component, Path, PathBuf};

use async_graphql::InputObject;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic"];
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    HourProofs,
    BranchImages,
}

impl Bucket {
    pub fn name(self) -> &'static str {
        match self {
            Bucket::HourProofs => "hour-proofs",
            Bucket::BranchImages => "branch-images",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Bucket::HourProofs, Bucket::BranchImages]
            .into_iter()
            .find(|bucket| bucket.name() == name)
    }

    pub fn is_public(self) -> bool {
        self == Bucket::BranchImages
    }
}

/// A file sent along with a mutation, base64-encoded
#[derive(InputObject, Clone, Debug)]
pub struct NewUpload {
    /// The original file name, used for its extension
    pub file_name: String,
    /// The base64-encoded file contents
    pub content: String,
}

impl NewUpload {
    pub fn extension(&self) -> AppResult<String> {
        let extension = Path::new(&self.file_name)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| extension.to_lowercase())
            .ok_or_else(|| AppError::validation("file must have an extension"))?;

        if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            Ok(extension)
        } else {
            Err(AppError::validation(format!(
                "files of type .{} are not allowed, upload an image",
                extension
            )))
        }
    }

    pub fn decode(&self) -> AppResult<Vec<u8>> {
        let content = base64::decode(&self.content).map_err(|err| {
            AppError::validation(format!("couldn't decode file as base64: {}", err))
        })?;

        if content.is_empty() {
            Err(AppError::validation("uploaded file is empty"))
        } else if content.len() > MAX_UPLOAD_BYTES {
            Err(AppError::validation("uploaded file is larger than 10 MB"))
        } else {
            Ok(content)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
    base_url: String,
    secret: Vec<u8>,
    signed_url_ttl_seconds: i64,
}

impl Storage {
    pub fn new(
        root: impl Into<PathBuf>,
        base_url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        signed_url_ttl_seconds: i64,
    ) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
            secret: secret.into(),
            signed_url_ttl_seconds,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.storage_root.clone(),
            config.public_base_url.clone(),
            config.signing_secret.clone(),
            config.signed_url_ttl_seconds,
        )
    }

    /// `{owner}/{unix millis}-{nonce}.{extension}`. The nonce keeps uploads
    /// made in the same millisecond under one owner apart.
    pub fn object_path(owner: &str, extension: &str, now: OffsetDateTime, nonce: &str) -> String {
        let owner: String = owner
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let millis = now.unix_timestamp_nanos() / 1_000_000;

        format!("{}/{}-{}.{}", owner, millis, nonce, extension)
    }

    pub async fn upload(
        &self,
        bucket: Bucket,
        owner: &str,
        upload: &NewUpload,
        now: OffsetDateTime,
    ) -> AppResult<String> {
        let extension = upload.extension()?;
        let content = upload.decode()?;
        let nonce = Uuid::new_v4().to_simple().to_string();
        let path = Self::object_path(owner, &extension, now, &nonce[..12]);
        let full_path = self.resolve(bucket, &path)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, content).await?;
        tracing::info!(bucket = bucket.name(), %path, "stored upload");

        Ok(path)
    }

    pub async fn read(&self, bucket: Bucket, path: &str) -> AppResult<Vec<u8>> {
        let full_path = self.resolve(bucket, path)?;

        match tokio::fs::read(&full_path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found(format!("No file at {}", path)))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, bucket: Bucket, path: &str) -> AppResult<()> {
        let full_path = self.resolve(bucket, path)?;
        tokio::fs::remove_file(full_path).await?;

        Ok(())
    }

    /// Deletes every path it can, logging the ones it can't. Returns how many were removed.
    pub async fn delete_best_effort<I, S>(&self, bucket: Bucket, paths: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut deleted = 0;
        for path in paths {
            let path = path.as_ref();
            match self.delete(bucket, path).await {
                Ok(()) => deleted += 1,
                Err(err) => tracing::warn!(
                    bucket = bucket.name(),
                    %path,
                    "failed to delete stored file: {}",
                    err
                ),
            }
        }

        deleted
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/files/{}/{}",
            self.base_url,
            Bucket::BranchImages.name(),
            path
        )
    }

    pub fn signed_url(&self, path: &str, now: OffsetDateTime) -> AppResult<String> {
        let bucket = Bucket::HourProofs;
        let expires = now.unix_timestamp() + self.signed_url_ttl_seconds;
        let signature = self.signature(bucket, path, expires)?;

        Ok(format!(
            "{}/files/{}/{}?expires={}&signature={}",
            self.base_url,
            bucket.name(),
            path,
            expires,
            signature
        ))
    }

    pub fn verify_signature(
        &self,
        bucket: Bucket,
        path: &str,
        expires: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> AppResult<()> {
        if now.unix_timestamp() > expires {
            return Err(AppError::forbidden("this link has expired"));
        }

        let provided = base64::decode_config(signature, base64::URL_SAFE_NO_PAD)
            .map_err(|_| AppError::forbidden("invalid link signature"))?;
        self.mac(bucket, path, expires)?
            .verify_slice(&provided)
            .map_err(|_| AppError::forbidden("invalid link signature"))
    }

    fn signature(&self, bucket: Bucket, path: &str, expires: i64) -> AppResult<String> {
        let signature = self.mac(bucket, path, expires)?.finalize().into_bytes();

        Ok(base64::encode_config(&signature, base64::URL_SAFE_NO_PAD))
    }

    fn mac(&self, bucket: Bucket, path: &str, expires: i64) -> AppResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|err| {
            AppError::Storage(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
        })?;
        mac.update(format!("{}/{}:{}", bucket.name(), path, expires).as_bytes());

        Ok(mac)
    }

    fn resolve(&self, bucket: Bucket, path: &str) -> AppResult<PathBuf> {
        let relative = Path::new(path);
        let is_plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

        if path.is_empty() || !is_plain {
            return Err(AppError::validation(format!("invalid file path: {}", path)));
        }

        Ok(self.root.join(bucket.name()).join(relative))
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn storage(root: &Path) -> Storage {
        Storage::new(root, "https://hub.test", b"secret".to_vec(), 3600)
    }

    fn png_upload() -> NewUpload {
        NewUpload {
            file_name: "proof.PNG".to_owned(),
            content: base64::encode(b"not really a png"),
        }
    }

    #[test]
    fn object_paths_follow_owner_and_timestamp() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            Storage::object_path("42", "png", now, "a1b2c3"),
            "42/1700000000000-a1b2c3.png"
        );
        assert_eq!(
            Storage::object_path("../evil", "jpg", now, "a1b2c3"),
            "evil/1700000000000-a1b2c3.jpg"
        );
    }

    #[test]
    fn uploads_must_be_images() {
        let upload = NewUpload {
            file_name: "notes.pdf".to_owned(),
            content: base64::encode(b"pdf"),
        };
        assert!(matches!(upload.extension(), Err(AppError::Validation(_))));
        assert_eq!(png_upload().extension().unwrap(), "png");
    }

    #[tokio::test]
    async fn upload_read_and_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let path = storage
            .upload(Bucket::HourProofs, "7", &png_upload(), now)
            .await
            .unwrap();
        assert_eq!(
            storage.read(Bucket::HourProofs, &path).await.unwrap(),
            b"not really a png"
        );

        assert_eq!(
            storage
                .delete_best_effort(Bucket::HourProofs, [path.as_str(), "7/missing.png"])
                .await,
            1
        );
        assert!(matches!(
            storage.read(Bucket::HourProofs, &path).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn uploads_in_the_same_instant_get_their_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let image = |content: &[u8]| NewUpload {
            file_name: "photo.png".to_owned(),
            content: base64::encode(content),
        };

        let branch_path = storage
            .upload(Bucket::BranchImages, "branch-1", &image(b"BRANCH"), now)
            .await
            .unwrap();
        let leader_path = storage
            .upload(Bucket::BranchImages, "branch-1", &image(b"LEADER"), now)
            .await
            .unwrap();

        assert_ne!(branch_path, leader_path);
        assert_eq!(
            storage.read(Bucket::BranchImages, &branch_path).await.unwrap(),
            b"BRANCH"
        );

        storage
            .delete_best_effort(Bucket::BranchImages, [&leader_path])
            .await;
        assert_eq!(
            storage.read(Bucket::BranchImages, &branch_path).await.unwrap(),
            b"BRANCH"
        );
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());

        assert!(matches!(
            storage.read(Bucket::BranchImages, "../hour-proofs/7/1.png").await,
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn signed_urls_verify_until_they_expire() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let url = storage.signed_url("7/1.png", now).unwrap();
        let query = url.split('?').nth(1).unwrap();
        let mut expires = 0;
        let mut signature = "";
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap();
            match key {
                "expires" => expires = value.parse().unwrap(),
                "signature" => signature = value,
                _ => {}
            }
        }
        assert_eq!(expires, 1_700_003_600);

        assert!(storage
            .verify_signature(Bucket::HourProofs, "7/1.png", expires, signature, now)
            .is_ok());
        assert!(storage
            .verify_signature(Bucket::HourProofs, "7/2.png", expires, signature, now)
            .is_err());
        assert!(storage
            .verify_signature(
                Bucket::HourProofs,
                "7/1.png",
                expires,
                signature,
                now + Duration::hours(2)
            )
            .is_err());
    }

    #[test]
    fn public_urls_point_at_the_image_bucket() {
        let storage = Storage::new("/tmp", "https://hub.test", b"k".to_vec(), 60);
        assert_eq!(
            storage.public_url("branch-3/1.png"),
            "https://hub.test/files/branch-images/branch-3/1.png"
        );
        assert_eq!(Bucket::from_name("hour-proofs"), Some(Bucket::HourProofs));
        assert!(!Bucket::HourProofs.is_public());
    }
}
