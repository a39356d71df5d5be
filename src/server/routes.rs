//! HTTP routes. `/analyze` is the only one that touches the engines; the
//! inference itself runs on the blocking thread pool.

use super::protocol::{self, AnalyzeRequest, ModelsResponse};
use super::{AppState, WebError};
use crate::analyzer;
use crate::picture::InputImage;
use actix_web::http::header::ContentType;
use actix_web::{get, post, web, HttpResponse, Responder};
use anyhow::anyhow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::*;

type Result<T> = std::result::Result<T, WebError>;

/// The analyzer page
pub const INDEX_HTML: &str = include_str!("../../static/index.html");

#[get("/")]
pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(INDEX_HTML)
}

/// Caption the uploaded image and answer the questions about it
#[post("/analyze")]
pub async fn analyze(
    req: web::Json<AnalyzeRequest>,
    state: web::Data<AppState>,
) -> Result<impl Responder> {
    let req = req.into_inner();
    debug!("got analyze request {req:?}");

    // Parse the input image
    let image = match req.image.as_ref().and_then(|payload| payload.data()) {
        Some(data) => Some(InputImage::from_base64(data).map_err(WebError::bad_request)?),
        None => None,
    };

    let state = state.into_inner();
    let request_timeout = state.request_timeout;

    // A timed out job keeps running and holds its engine until it returns
    let abandoned = Arc::new(AtomicBool::new(false));
    let job_abandoned = abandoned.clone();
    let job = web::block(move || {
        let started = Instant::now();
        let output = analyzer::analyze(
            &state.engines,
            image.as_ref(),
            &req.open_question,
            &req.binary_question,
        );
        if job_abandoned.load(Ordering::SeqCst) {
            warn!(
                "abandoned analysis finished after {:?}, result discarded",
                started.elapsed()
            );
        }
        output
    });

    let output = match request_timeout {
        Some(limit) => tokio::time::timeout(limit, job).await.map_err(|_| {
            abandoned.store(true, Ordering::SeqCst);
            warn!("analysis timed out after {limit:?}");
            WebError::timeout(anyhow!("analysis did not finish within {limit:?}"))
        })?,
        None => job.await,
    };

    let analysis = output?.map_err(|e| {
        error!("analysis failed: {e}");
        e
    })?;

    info!("finished serving analyze request");

    Ok(web::Json(analysis))
}

/// Example question pairs for the page
#[get("/examples")]
pub async fn examples() -> impl Responder {
    web::Json(protocol::examples())
}

/// Names and generation limits of the loaded models
#[get("/models")]
pub async fn models(state: web::Data<AppState>) -> impl Responder {
    let engines = &state.engines;
    web::Json(ModelsResponse::new(
        engines.captioner.name(),
        engines.vqa.name(),
        engines.limits,
    ))
}
