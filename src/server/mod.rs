//! The browser-facing web server: serves the analyzer page and a small JSON
//! API that runs the engines.

use crate::analyzer::AnalysisError;
use crate::engine::Engines;
use actix_web::error::{BlockingError, JsonPayloadError};
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use anyhow::anyhow;
use std::collections::HashMap;
use std::time::Duration;

pub mod protocol;
pub mod routes;

/// Shared state handed to every request
#[derive(Debug, Clone)]
pub struct AppState {
    pub engines: Engines,

    /// Upper bound on one analysis, if any
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(engines: Engines, request_timeout: Option<Duration>) -> Self {
        AppState {
            engines,
            request_timeout,
        }
    }
}

/// Register all routes, accepting JSON bodies of up to `max_payload_bytes`
pub fn configure(max_payload_bytes: usize) -> impl Fn(&mut web::ServiceConfig) + Clone {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(json_config(max_payload_bytes))
            .service(routes::index)
            .service(routes::analyze)
            .service(routes::examples)
            .service(routes::models);
    }
}

/// Body rejections answer with the same JSON errors as the handlers
fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req: &HttpRequest| {
            let web_err = match err {
                JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
                    WebError::payload_too_large(anyhow!("{err}"))
                }
                err => WebError::bad_request(anyhow!("invalid request body: {err}")),
            };
            web_err.into()
        })
}

#[derive(Debug)]
pub struct WebError {
    err: anyhow::Error,
    status: StatusCode,
}

impl WebError {
    pub fn bad_request(err: anyhow::Error) -> Self {
        WebError {
            err,
            status: StatusCode::BAD_REQUEST,
        }
    }

    pub fn payload_too_large(err: anyhow::Error) -> Self {
        WebError {
            err,
            status: StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn timeout(err: anyhow::Error) -> Self {
        WebError {
            err,
            status: StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl std::fmt::Display for WebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.err)
    }
}

impl actix_web::error::ResponseError for WebError {
    fn error_response(&self) -> HttpResponse {
        let err = HashMap::from([("errors", vec![self.to_string()])]);

        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .json(err)
    }

    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for WebError {
    fn from(err: anyhow::Error) -> WebError {
        WebError {
            err,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AnalysisError> for WebError {
    fn from(err: AnalysisError) -> Self {
        anyhow::Error::new(err).into()
    }
}

impl From<BlockingError> for WebError {
    fn from(err: BlockingError) -> Self {
        anyhow::anyhow!("inference task was cancelled: {err}").into()
    }
}
