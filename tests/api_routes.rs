use actix_web::{test, web, App};
use entry_image_migrator::api::{middleware, routes};
use entry_image_migrator::database_ops::Db;
use entry_image_migrator::migration::model::{FieldMap, Target};
use entry_image_migrator::{MigrationService, MigratorConfig};
use serde_json::{json, Value};
use tempfile::TempDir;

async fn service(media: &TempDir) -> MigrationService {
    let cfg = MigratorConfig {
        media_root: media.path().to_path_buf(),
        ..MigratorConfig::default()
    };
    let svc = MigrationService::with_db(Db::in_memory().await.unwrap(), &cfg);
    let target = Target::parse("contact").unwrap();
    for i in 0..12 {
        let fields: FieldMap = serde_json::from_value(json!({ "n": i })).unwrap();
        svc.records.insert(&target, &fields).await.unwrap();
    }
    svc
}

macro_rules! app {
    ($svc:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($svc))
                .app_data(middleware::json_config())
                .configure(routes::configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn health_reports_database() {
    let media = TempDir::new().unwrap();
    let app = app!(service(&media).await);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["database"], "connected");
}

#[actix_web::test]
async fn start_batch_status_flow() {
    let media = TempDir::new().unwrap();
    let app = app!(service(&media).await);

    let req = test::TestRequest::get()
        .uri("/api/v1/migrations/contact/status")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["phase"], "idle");
    assert_eq!(body["data"]["running"], false);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/start")
        .set_json(json!({ "batch_size": 10 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["total"], 12);
    assert_eq!(body["data"]["running"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/start")
        .set_json(json!({}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "already_running");

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/batch")
        .set_json(json!({ "offset": 20, "batch_size": 10 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/batch")
        .set_json(json!({ "offset": 0, "batch_size": 10 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["job"]["processed"], 10);
    assert_eq!(body["data"]["job"]["next_offset"], 10);
    assert_eq!(body["data"]["records"].as_array().map(Vec::len), Some(10));

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/batch")
        .set_json(json!({ "offset": 10, "batch_size": 10 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["job"]["processed"], 12);
    assert_eq!(body["data"]["job"]["is_completed"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/batch")
        .set_json(json!({ "offset": 20, "batch_size": 10 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 409);
}

#[actix_web::test]
async fn abort_and_import_notice() {
    let media = TempDir::new().unwrap();
    let app = app!(service(&media).await);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/imports")
        .set_json(json!({ "count": 40 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["count"], 40);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/start")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["total"], 40);
    assert_eq!(body["data"]["batch_size"], 50);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/abort")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["phase"], "idle");

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/imports")
        .set_json(json!({ "count": -1 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn batch_size_preference_round_trip() {
    let media = TempDir::new().unwrap();
    let app = app!(service(&media).await);

    let req = test::TestRequest::get()
        .uri("/api/v1/preferences/batch-size")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["batch_size"], 50);

    let req = test::TestRequest::put()
        .uri("/api/v1/preferences/batch-size")
        .set_json(json!({ "batch_size": 500 }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["batch_size"], 200);

    let req = test::TestRequest::get()
        .uri("/api/v1/preferences/batch-size")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["batch_size"], 200);
}

#[actix_web::test]
async fn rewrite_passes_through_for_non_live_target() {
    let media = TempDir::new().unwrap();
    let app = app!(service(&media).await);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/submissions/rewrite")
        .set_json(json!({ "fields": { "photo": "https://ext.test/cat.png", "n": 3 } }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["changed"], false);
    assert_eq!(body["data"]["fields"]["photo"], "https://ext.test/cat.png");
    assert_eq!(body["data"]["fields"]["n"], 3);
}

#[actix_web::test]
async fn invalid_target_and_malformed_body_are_bad_requests() {
    let media = TempDir::new().unwrap();
    let app = app!(service(&media).await);

    let req = test::TestRequest::get()
        .uri("/api/v1/migrations/bad$target/status")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/migrations/contact/batch")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"offset\": \"zero\"}")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "validation_error");
}

#[actix_web::test]
async fn stored_media_is_served_under_media_prefix() {
    let media = TempDir::new().unwrap();
    let dir = media.path().join("uploads/2026/10");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("cat.png"), b"png-bytes").unwrap();
    std::fs::write(media.path().join("secret.txt"), b"nope").unwrap();
    let app = app!(service(&media).await);

    let req = test::TestRequest::get()
        .uri("/media/uploads/2026/10/cat.png")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "image/png"
    );
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"png-bytes");

    for uri in [
        "/media/uploads/2026/10/missing.png",
        "/media/secret.txt",
        "/media/uploads/../secret.txt",
    ] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 404, "{uri}");
    }
}
