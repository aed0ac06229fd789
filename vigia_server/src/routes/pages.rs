//! Page fallback
//!
//! Stands in for the template renderer: answers with the classification the
//! shield attached to the request.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use vigia_common::Classification;

pub async fn classified_page(classification: Option<Extension<Arc<Classification>>>) -> Response {
    match classification {
        Some(Extension(classification)) => Json(classification.as_ref().clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
