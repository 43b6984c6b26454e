// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .route("/media/{path:.*}", web::get().to(handlers::serve_media))
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/migrations/{target}")
                        .route("/start", web::post().to(handlers::start_migration))
                        .route("/batch", web::post().to(handlers::advance_batch))
                        .route("/status", web::get().to(handlers::migration_status))
                        .route("/abort", web::post().to(handlers::abort_migration))
                        .route("/imports", web::post().to(handlers::note_import))
                        .route(
                            "/submissions/rewrite",
                            web::post().to(handlers::rewrite_submission),
                        ),
                )
                .service(
                    web::resource("/preferences/batch-size")
                        .route(web::get().to(handlers::get_batch_size))
                        .route(web::put().to(handlers::put_batch_size)),
                ),
        );
}
