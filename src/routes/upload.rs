use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::routes::AppState;
use crate::storage::ImageStoreError;

const MAX_FILES: usize = 5;
const FILE_SIZE_LIMIT: usize = 10 * 1024 * 1024; // 10 MB each

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct UploadedImage {
    pub url: String,
    /// Content hash doubling as the deletable object key.
    pub key: String,
    pub mime: String,
    pub size: usize,
    pub duplicate: bool,
}

/// Multipart image upload, field name `files`. The batch is atomic: every
/// file is validated before anything is stored, so a rejected batch uploads
/// nothing.
#[utoipa::path(
    post,
    path = "/api/v1/upload",
    responses(
        (status = 201, description = "All files stored", body = [UploadedImage]),
        (status = 400, description = "Count exceeded, wrong type, or too large"),
        (status = 429, description = "Upload rate limit")
    )
)]
pub async fn upload_images(
    auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_upload(auth.user_id()) {
            return Err(ApiError::RateLimited("too many uploads".into()));
        }
    }

    let mut files: Vec<(String, String, Vec<u8>)> = Vec::new(); // (hash, mime, bytes)
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        match field.content_disposition().get_name() {
            Some("files") => {}
            _ => continue,
        }
        if files.len() == MAX_FILES {
            return Err(ApiError::validation("files", "Maximum 5 files allowed"));
        }
        let mut bytes: Vec<u8> = Vec::new();
        let mut hasher = Sha256::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > FILE_SIZE_LIMIT {
                return Err(ApiError::validation("files", "File exceeds the 10MB limit"));
            }
            hasher.update(&chunk);
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::validation("files", "empty file"));
        }
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        if !mime.starts_with("image/") {
            return Err(ApiError::validation("files", "Only image files are allowed"));
        }
        let hash = format!("{:x}", hasher.finalize());
        files.push((hash, mime, bytes));
    }
    if files.is_empty() {
        return Err(ApiError::validation("files", "at least one file is required"));
    }

    // validation passed for the whole batch; now persist
    let mut uploaded: Vec<UploadedImage> = Vec::with_capacity(files.len());
    for (hash, mime, bytes) in &files {
        let duplicate = match data.image_store.save(hash, mime, bytes).await {
            Ok(()) => false,
            Err(ImageStoreError::Duplicate) => true,
            Err(e) => {
                log::error!("image store save error: {e}");
                // roll back only objects this batch stored; duplicates
                // existed before the batch and may back other items
                for prior in uploaded.iter().filter(|u| !u.duplicate) {
                    let _ = data.image_store.delete(&prior.key).await;
                }
                return Err(ApiError::Internal);
            }
        };
        uploaded.push(UploadedImage {
            url: format!("/images/{hash}"),
            key: hash.clone(),
            mime: mime.clone(),
            size: bytes.len(),
            duplicate,
        });
    }
    Ok(HttpResponse::Created().json(envelope(uploaded)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/upload/{key}",
    params(("key" = String, Path, description = "Object key returned at upload")),
    responses((status = 200, description = "Deleted (or already gone)"))
)]
pub async fn delete_image(
    _auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    data.image_store.delete(&key).await.map_err(|e| {
        log::error!("image store delete error: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok().json(envelope(json!({"deleted": true}))))
}

/// Raw image fetch, no envelope: the body is the blob itself.
pub async fn get_image(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    if key.len() < 2 {
        return Err(ApiError::NotFound);
    }
    match data.image_store.load(&key).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(ImageStoreError::NotFound) => Err(ApiError::NotFound),
        Err(e) => {
            log::error!("image store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}
