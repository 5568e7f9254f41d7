#![cfg(feature = "inmem-store")]

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serial_test::serial;
use std::sync::Arc;
use threadswap::auth::{create_jwt, Role};
use threadswap::models::NewUser;
use threadswap::repo::inmem::InMemRepo;
use threadswap::repo::UserRepo;
use threadswap::storage::{FsImageStore, ImageStore, ImageStoreError};
use threadswap::{config, AppState, SecurityHeaders};

const BOUNDARY: &str = "BOUNDARYHASH";

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::remove_var("VISION_API_URL");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("THREADSWAP_DATA_DIR", tmp.into_path().to_str().unwrap());
}

fn test_state(repo: &InMemRepo) -> AppState {
    let dir = tempfile::tempdir().unwrap().into_path();
    AppState {
        repo: Arc::new(repo.clone()),
        image_store: Arc::new(FsImageStore::new(dir).unwrap()),
        rate_limiter: None,
    }
}

async fn token(repo: &InMemRepo) -> String {
    let user = repo
        .upsert_user(NewUser {
            subject: "google:a".into(),
            email: "a@example.com".into(),
            display_name: "alice".into(),
            avatar_url: None,
        })
        .await
        .unwrap();
    create_jwt(user.id, &user.subject, vec![Role::User]).unwrap()
}

fn tiny_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A,
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R',
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00,
        0x1F, 0x15, 0xC4, 0x89,
        0x00, 0x00, 0x00, 0x0A, b'I', b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01,
        0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4,
        0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

/// Hand-built multipart body: one part per file under the `files` field.
fn multipart_body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body: Vec<u8> = Vec::new();
    for (filename, bytes) in parts {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_req(body: Vec<u8>, token: &str) -> actix_web::test::TestRequest {
    test::TestRequest::post()
        .uri("/api/v1/upload")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(web::Data::new($state.clone()))
                .configure(config),
        )
        .await
    };
}

#[actix_web::test]
#[serial]
async fn upload_then_fetch() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    // two identical files: the second is flagged as a duplicate, not an error
    let png = tiny_png();
    let body = multipart_body(&[("a.png", &png), ("b.png", &png)]);
    let resp = test::call_service(&app, upload_req(body, &token).to_request()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: serde_json::Value = test::read_body_json(resp).await;
    let files = body["data"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["duplicate"], serde_json::json!(false));
    assert_eq!(files[1]["duplicate"], serde_json::json!(true));
    assert_eq!(files[0]["mime"], serde_json::json!("image/png"));
    let key = files[0]["key"].as_str().unwrap();
    assert_eq!(files[0]["url"].as_str().unwrap(), format!("/images/{key}"));

    let req = test::TestRequest::get()
        .uri(&format!("/images/{key}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(
        resp.headers().get("content-type").unwrap().to_str().unwrap(),
        "image/png"
    );
    assert_eq!(test::read_body(resp).await.to_vec(), png);
}

#[actix_web::test]
#[serial]
async fn sixth_file_rejects_whole_batch() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    let png = tiny_png();
    let parts: Vec<(&str, &[u8])> = (0..6).map(|_| ("a.png", png.as_slice())).collect();
    let resp =
        test::call_service(&app, upload_req(multipart_body(&parts), &token).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["details"][0]["message"],
        serde_json::json!("Maximum 5 files allowed")
    );

    // nothing from the batch was stored
    use sha2::{Digest, Sha256};
    let key = format!("{:x}", Sha256::digest(&png));
    let req = test::TestRequest::get()
        .uri(&format!("/images/{key}"))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[actix_web::test]
#[serial]
async fn oversized_file_rejected() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    let mut big = tiny_png();
    big.resize(10 * 1024 * 1024 + 1, 0);
    let resp = test::call_service(
        &app,
        upload_req(multipart_body(&[("big.png", &big)]), &token).to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["details"][0]["message"],
        serde_json::json!("File exceeds the 10MB limit")
    );
}

#[actix_web::test]
#[serial]
async fn non_image_rejected() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    let resp = test::call_service(
        &app,
        upload_req(
            multipart_body(&[("notes.txt", b"just some text".as_slice())]),
            &token,
        )
        .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(
        body["details"][0]["message"],
        serde_json::json!("Only image files are allowed")
    );
}

#[actix_web::test]
#[serial]
async fn empty_batch_rejected() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    // a part under the wrong field name is ignored, leaving the batch empty
    let png = tiny_png();
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"attachment\"; filename=\"a.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    let resp = test::call_service(&app, upload_req(body, &token).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
#[serial]
async fn upload_requires_auth() {
    setup_env();
    let repo = InMemRepo::new();
    let state = test_state(&repo);
    let app = app!(state);

    let png = tiny_png();
    let req = test::TestRequest::post()
        .uri("/api/v1/upload")
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(multipart_body(&[("a.png", png.as_slice())]))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[actix_web::test]
#[serial]
async fn delete_then_fetch_is_gone() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    let png = tiny_png();
    let resp = test::call_service(
        &app,
        upload_req(multipart_body(&[("a.png", &png)]), &token).to_request(),
    )
    .await;
    let body: serde_json::Value = test::read_body_json(resp).await;
    let key = body["data"][0]["key"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/upload/{key}"))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/images/{key}"))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );
}

/// Delegates to a real filesystem store but refuses one designated key,
/// standing in for a half-failed batch.
struct FlakyStore {
    inner: FsImageStore,
    fail_hash: String,
}

#[async_trait::async_trait]
impl ImageStore for FlakyStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        if hash == self.fail_hash {
            return Err(ImageStoreError::Other("disk full".into()));
        }
        self.inner.save(hash, mime, bytes).await
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        self.inner.load(hash).await
    }

    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError> {
        self.inner.delete(hash).await
    }
}

#[actix_web::test]
#[serial]
async fn failed_batch_rolls_back_new_objects_only() {
    use sha2::{Digest, Sha256};

    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;

    // three distinct PNGs: trailing bytes change the hash, not the sniffed type
    let old_png = tiny_png();
    let mut new_png = tiny_png();
    new_png.push(0x01);
    let mut bad_png = tiny_png();
    bad_png.push(0x02);
    let old_key = format!("{:x}", Sha256::digest(&old_png));
    let new_key = format!("{:x}", Sha256::digest(&new_png));

    let dir = tempfile::tempdir().unwrap().into_path();
    let store = FlakyStore {
        inner: FsImageStore::new(dir).unwrap(),
        fail_hash: format!("{:x}", Sha256::digest(&bad_png)),
    };
    // the first object predates the batch, uploaded by someone else
    store.save(&old_key, "image/png", &old_png).await.unwrap();

    let state = AppState {
        repo: Arc::new(repo.clone()),
        image_store: Arc::new(store),
        rate_limiter: None,
    };
    let app = app!(state);

    let body = multipart_body(&[("a.png", &old_png), ("b.png", &new_png), ("c.png", &bad_png)]);
    let resp = test::call_service(&app, upload_req(body, &token).to_request()).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // the object stored by this batch is rolled back
    let req = test::TestRequest::get()
        .uri(&format!("/images/{new_key}"))
        .to_request();
    assert_eq!(
        test::call_service(&app, req).await.status(),
        StatusCode::NOT_FOUND
    );

    // the pre-existing object survives the rollback
    let req = test::TestRequest::get()
        .uri(&format!("/images/{old_key}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(test::read_body(resp).await.to_vec(), old_png);
}

/// Without a vision provider the analyze endpoint degrades to manual entry.
#[actix_web::test]
#[serial]
async fn analyze_falls_back_when_unconfigured() {
    setup_env();
    let repo = InMemRepo::new();
    let token = token(&repo).await;
    let state = test_state(&repo);
    let app = app!(state);

    let png = tiny_png();
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"a.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&png);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let req = test::TestRequest::post()
        .uri("/api/v1/wardrobe/analyze")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["fallback"], serde_json::json!(true));
}
