use entry_image_migrator::cli::drive::{self, RunConfig};
use entry_image_migrator::database_ops::Db;
use entry_image_migrator::migration::model::{FieldMap, FieldValue, Target};
use entry_image_migrator::migration::store::RecordStore;
use entry_image_migrator::{MigrationService, MigratorConfig};
use serde_json::json;
use std::io::Cursor;
use tempfile::TempDir;

fn jpeg_bytes() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        4,
        3,
        image::Rgb([30, 120, 200]),
    ));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageOutputFormat::Jpeg(85))
        .unwrap();
    out.into_inner()
}

async fn service(media: &TempDir) -> MigrationService {
    let cfg = MigratorConfig {
        media_root: media.path().to_path_buf(),
        media_base_url: "https://site.test/media".to_string(),
        ..MigratorConfig::default()
    };
    MigrationService::with_db(Db::in_memory().await.unwrap(), &cfg)
}

async fn seed_three(svc: &MigrationService, target: &Target, remote: &str) -> Vec<i64> {
    let mut ids = Vec::new();
    for photo in [remote, "not a url", "/uploads/already-local.png"] {
        let fields: FieldMap =
            serde_json::from_value(json!({ "name": "entry", "photo": photo })).unwrap();
        ids.push(svc.records.insert(target, &fields).await.unwrap());
    }
    ids
}

async fn photo(svc: &MigrationService, target: &Target, id: i64) -> String {
    let record = svc.records.get(target, id).await.unwrap().unwrap();
    match &record.fields["photo"] {
        FieldValue::Scalar(s) => s.clone(),
        other => panic!("photo is not a string: {other:?}"),
    }
}

#[tokio::test]
async fn remote_image_is_migrated_and_others_untouched() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/cat.jpg")
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body(jpeg_bytes())
        .expect(1)
        .create_async()
        .await;
    let remote = format!("{}/cat.jpg", server.url());

    let media = TempDir::new().unwrap();
    let svc = service(&media).await;
    let target = Target::parse("contact-form").unwrap();
    let ids = seed_three(&svc, &target, &remote).await;

    let job = svc.coordinator.start(&target, Some(10)).await.unwrap();
    assert_eq!(job.total, 3);

    let report = svc.coordinator.advance(&target, 0, 10).await.unwrap();
    assert_eq!(report.job.processed, 3);
    assert!(report.job.is_completed);
    assert_eq!(report.migrated(), 1);
    assert_eq!(report.failed(), 0);
    mock.assert_async().await;

    let migrated = photo(&svc, &target, ids[0]).await;
    assert!(migrated.starts_with("https://site.test/media/uploads/"));
    assert!(migrated.ends_with("/cat.jpg"));
    assert_eq!(photo(&svc, &target, ids[1]).await, "not a url");
    assert_eq!(
        photo(&svc, &target, ids[2]).await,
        "/uploads/already-local.png"
    );

    let relative = migrated.trim_start_matches("https://site.test/media/");
    assert!(media.path().join(relative).is_file());

    // A second full pass finds nothing left to fetch.
    svc.coordinator.start(&target, Some(10)).await.unwrap();
    let again = svc.coordinator.advance(&target, 0, 10).await.unwrap();
    assert!(again.job.is_completed);
    assert_eq!(again.migrated() + again.failed(), 0);
    assert_eq!(photo(&svc, &target, ids[0]).await, migrated);
    mock.assert_async().await;
}

#[tokio::test]
async fn unreachable_image_leaves_field_and_completes() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/cat.jpg")
        .with_status(404)
        .create_async()
        .await;
    let remote = format!("{}/cat.jpg", server.url());

    let media = TempDir::new().unwrap();
    let svc = service(&media).await;
    let target = Target::parse("contact-form").unwrap();
    let ids = seed_three(&svc, &target, &remote).await;

    svc.coordinator.start(&target, Some(10)).await.unwrap();
    let report = svc.coordinator.advance(&target, 0, 10).await.unwrap();

    assert_eq!(report.job.processed, 3);
    assert!(report.job.is_completed);
    assert_eq!(report.failed(), 1);
    assert!(report.records.iter().all(|r| !r.saved));
    assert_eq!(photo(&svc, &target, ids[0]).await, remote);
}

#[tokio::test]
async fn driver_runs_job_to_completion() {
    let media = TempDir::new().unwrap();
    let svc = service(&media).await;
    let target = Target::parse("survey").unwrap();
    for i in 0..25 {
        let fields: FieldMap = serde_json::from_value(json!({ "n": i })).unwrap();
        svc.records.insert(&target, &fields).await.unwrap();
    }

    let (job, summary) = drive::run(
        &svc.coordinator,
        RunConfig {
            target: target.clone(),
            batch_size: Some(10),
            resume: false,
        },
    )
    .await
    .unwrap();

    assert!(job.is_completed);
    assert_eq!(job.processed, 25);
    assert_eq!(summary.batches, 3);
    assert_eq!(svc.records.count(&target).await.unwrap(), 25);
}

#[tokio::test]
async fn driver_resumes_from_persisted_cursor() {
    let media = TempDir::new().unwrap();
    let svc = service(&media).await;
    let target = Target::parse("survey").unwrap();
    for i in 0..25 {
        let fields: FieldMap = serde_json::from_value(json!({ "n": i })).unwrap();
        svc.records.insert(&target, &fields).await.unwrap();
    }
    svc.coordinator.start(&target, Some(10)).await.unwrap();
    svc.coordinator.advance(&target, 0, 10).await.unwrap();

    let without_resume = drive::run(
        &svc.coordinator,
        RunConfig {
            target: target.clone(),
            batch_size: None,
            resume: false,
        },
    )
    .await;
    assert!(without_resume.is_err());

    let (job, summary) = drive::run(
        &svc.coordinator,
        RunConfig {
            target: target.clone(),
            batch_size: None,
            resume: true,
        },
    )
    .await
    .unwrap();
    assert!(job.is_completed);
    assert_eq!(job.processed, 25);
    assert_eq!(summary.batches, 2);
}
