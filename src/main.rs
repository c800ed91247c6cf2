mod detector;
mod handlers;
mod models;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing::info;

use crate::detector::{Detector, OpenAiVision};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    // Missing OPENAI_API_KEY is a startup failure, not a first-request one.
    let backend =
        OpenAiVision::from_env().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let detector = web::Data::new(Detector::new(Arc::new(backend)));

    info!("Server running at http://127.0.0.1:8080");

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(detector.clone())
            .service(web::resource("/").route(web::get().to(handlers::info)))
            .service(web::resource("/healthz").route(web::get().to(handlers::healthz)))
            .service(web::resource("/models").route(web::get().to(handlers::models)))
            .service(web::resource("/detect").route(web::post().to(handlers::detect)))
    })
    .bind("127.0.0.1:8080")?
    .run()
    .await
}
