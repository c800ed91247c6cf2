use actix_multipart::Multipart;
use actix_web::{web, Error, HttpResponse, Result};
use futures_util::StreamExt;
use tracing::error;

use crate::detector::Detector;
use crate::models::{DetectResponse, BIKE_MODELS};

pub async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub async fn models() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "models": BIKE_MODELS }))
}

pub async fn info() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "Bike Model Detection API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/healthz": "health check",
            "/models": "list of recognizable bike models",
            "/detect": "detect the bike model in an uploaded image (POST, image file required)"
        }
    }))
}

pub async fn detect(
    mut payload: Multipart,
    detector: web::Data<Detector>,
) -> Result<HttpResponse, Error> {
    // The first multipart field is treated as the uploaded image.
    let mut field = match payload.next().await {
        Some(field) => field?,
        None => {
            return Err(actix_web::error::ErrorBadRequest(
                "request contained no file field",
            ))
        }
    };

    if field.content_type().type_().as_str() != "image" {
        return Err(actix_web::error::ErrorBadRequest(
            "uploaded file must be an image",
        ));
    }

    let filename = field
        .content_disposition()
        .get_filename()
        .unwrap_or("upload")
        .to_owned();

    // Whole body in memory; there is no size cap on uploads.
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        data.extend_from_slice(&chunk?);
    }

    let img = match image::load_from_memory(&data) {
        Ok(img) => img,
        Err(e) => {
            error!("failed to decode uploaded image: {}", e);
            return Err(actix_web::error::ErrorInternalServerError(format!(
                "could not decode image: {}",
                e
            )));
        }
    };
    let img = if img.color() != image::ColorType::Rgb8 {
        image::DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img
    };

    let predictions = detector.detect(&img).await;
    let top_prediction = predictions.first().cloned().ok_or_else(|| {
        actix_web::error::ErrorInternalServerError("classifier returned no predictions")
    })?;

    Ok(HttpResponse::Ok().json(DetectResponse {
        success: true,
        filename,
        predictions,
        top_prediction,
    }))
}
