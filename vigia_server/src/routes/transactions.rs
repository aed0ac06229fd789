//! Transaction submission
//!
//! Every submission is checked against the transaction throttle before it
//! would reach a payment gateway. All rejections look the same to the client.

use crate::routes::{shield::ClientOrigin, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use vigia_common::{constants, TransactionSubmission};

/// Uniform body for every throttle rejection
const TRY_AGAIN_LATER: &str = "Too many attempts. Please try again later.";

/// Build the transactions router
pub fn router() -> Router<AppState> {
    Router::new().route(constants::TRANSACTIONS_PATH, post(submit_transaction))
}

async fn submit_transaction(
    State(state): State<AppState>,
    Extension(ClientOrigin(origin)): Extension<ClientOrigin>,
    Json(submission): Json<TransactionSubmission>,
) -> Response {
    let key = match submission.identity_key() {
        Ok(key) => key,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let decision = state.throttle.check_now(&key, &origin);
    if !decision.is_allowed() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "error": TRY_AGAIN_LATER })),
        )
            .into_response();
    }

    tracing::info!("Transaction accepted for identity {} from {}", key.masked(), origin);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use crate::abuse::clock::MockClock;
    use crate::routes::{router, test_support};
    use axum::{
        body::{to_bytes, Body},
        extract::{ConnectInfo, Request},
        http::{header, StatusCode},
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn submit(origin: [u8; 4], body: &str) -> Request {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/transactions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((origin, 40000))));
        request
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const JANE: &str = r#"{"name":"Jane Roe","cpf":"123.456.789-00","phone":"+55 11 99999-9999"}"#;

    #[tokio::test]
    async fn test_accepts_then_throttles_per_origin() {
        let clock = MockClock::new();
        let app = router(test_support::state(&clock, &[]));

        for _ in 0..5 {
            let response = app.clone().oneshot(submit([1, 1, 1, 1], JANE)).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            assert_eq!(body_json(response).await["status"], "accepted");
        }

        let response = app.oneshot(submit([1, 1, 1, 1], JANE)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body_json(response).await["error"],
            "Too many attempts. Please try again later."
        );
    }

    #[tokio::test]
    async fn test_rejections_are_uniform() {
        let clock = MockClock::new();
        let state = test_support::state(&clock, &[]);
        let app = router(state.clone());

        app.clone().oneshot(submit([1, 1, 1, 1], JANE)).await.unwrap();
        app.clone().oneshot(submit([2, 2, 2, 2], JANE)).await.unwrap();

        // Third origin trips attack detection, the fourth request hits a ban
        let attack = app.clone().oneshot(submit([3, 3, 3, 3], JANE)).await.unwrap();
        let banned = app.oneshot(submit([1, 1, 1, 1], JANE)).await.unwrap();

        assert_eq!(attack.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(banned.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_json(attack).await, body_json(banned).await);

        let rejections = state.throttle.rejections();
        assert_eq!(rejections.attack, 1);
        assert_eq!(rejections.banned, 1);
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let clock = MockClock::new();
        let app = router(test_support::state(&clock, &[]));

        let response = app
            .oneshot(submit([1, 1, 1, 1], r#"{"name":"  ","cpf":"","phone":"-"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
