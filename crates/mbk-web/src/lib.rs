//! JSON API over the booking service.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use mbk_core::{AdminDecision, BookingRequest, UnitId};
use mbk_intake::{BookingService, IntakeConfig, IntakeError};
use mbk_storage::DEFAULT_LIST_LIMIT;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "mbk-web";

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub struct AppState {
    pub service: BookingService,
    /// Admin routes answer 403 while this is unset.
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(service: BookingService, admin_token: Option<String>) -> Self {
        Self { service, admin_token }
    }
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    unit: Option<String>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct OffDaysQuery {
    from: NaiveDate,
    to: NaiveDate,
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    limit: Option<usize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/units", get(units_handler))
        .route("/calendar/off-days", get(off_days_handler))
        .route("/availability", get(availability_handler))
        .route("/requests", post(submit_handler))
        .route("/admin/requests", get(admin_list_handler))
        .route("/admin/requests/{id}", get(admin_detail_handler))
        .route("/admin/requests/{id}/decision", post(admin_decision_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(config: IntakeConfig) -> anyhow::Result<()> {
    let service = BookingService::from_config(&config).await?;
    if config.admin_token.is_none() {
        warn!("MBK_ADMIN_TOKEN not set; admin routes are closed");
    }
    let state = AppState::new(service, config.admin_token.clone());
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "booking api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(IntakeConfig::from_env()).await
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn units_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(&state.service.catalog().units).into_response()
}

async fn off_days_handler(State(state): State<Arc<AppState>>, Query(query): Query<OffDaysQuery>) -> Response {
    match state.service.off_days(query.from, query.to) {
        Ok(days) => Json(days).into_response(),
        Err(err) => intake_error(err),
    }
}

async fn availability_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Response {
    let unit = query
        .unit
        .filter(|unit| !unit.trim().is_empty())
        .map(UnitId::new);
    match state.service.preview(unit.as_ref(), query.start, query.end).await {
        Ok(preview) => Json(preview).into_response(),
        Err(err) => intake_error(err),
    }
}

async fn submit_handler(State(state): State<Arc<AppState>>, Json(request): Json<BookingRequest>) -> Response {
    match state.service.submit(request).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(err) => intake_error(err),
    }
}

async fn admin_list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(denied) = admin_gate(&state, &headers) {
        return denied;
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, DEFAULT_LIST_LIMIT);
    match state.service.list(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => intake_error(err),
    }
}

async fn admin_detail_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(denied) = admin_gate(&state, &headers) {
        return denied;
    }
    match state.service.get(&id).await {
        Ok(record) => Json(record).into_response(),
        Err(err) => intake_error(err),
    }
}

async fn admin_decision_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(decision): Json<AdminDecision>,
) -> Response {
    if let Err(denied) = admin_gate(&state, &headers) {
        return denied;
    }
    match state.service.decide(&id, decision).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => intake_error(err),
    }
}

fn admin_gate(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let presented = headers.get(ADMIN_TOKEN_HEADER).map(|v| v.as_bytes());
    match (&state.admin_token, presented) {
        (Some(expected), Some(presented)) if token_matches(expected, presented) => Ok(()),
        _ => Err((StatusCode::FORBIDDEN, Json(json!({ "error": "admin token required" }))).into_response()),
    }
}

/// Constant-time over the token bytes; a length mismatch fails without
/// comparing contents.
fn token_matches(expected: &str, presented: &[u8]) -> bool {
    expected.as_bytes().ct_eq(presented).into()
}

fn intake_error(err: IntakeError) -> Response {
    let (status, body) = match &err {
        IntakeError::Fields(errors) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": err.to_string(), "fields": errors }),
        ),
        IntakeError::Conflict(report) => (
            StatusCode::CONFLICT,
            json!({ "error": report.message, "conflict": report }),
        ),
        IntakeError::Incomplete
        | IntakeError::InvalidWindow(_)
        | IntakeError::UnknownUnit(_)
        | IntakeError::Calendar(_) => (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() })),
        IntakeError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": err.to_string() })),
        IntakeError::Store(_) => (StatusCode::BAD_GATEWAY, json!({ "error": err.to_string() })),
        IntakeError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": err.to_string() })),
    };
    if status.is_server_error() {
        warn!(error = %err, status = status.as_u16(), "request failed");
    }
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use mbk_core::{AdminContact, BusinessTimezone, UnitCatalog, UnitEntry};
    use mbk_engine::CalendarRules;
    use mbk_storage::MemoryStore;
    use serde_json::Value;
    use tower::ServiceExt;

    const TOKEN: &str = "let-me-in";

    fn test_app(admin_token: Option<&str>) -> Router {
        let catalog = UnitCatalog::new(
            vec![UnitEntry {
                id: UnitId::new("SCM-001-YGN"),
                label: "Yangon unit".into(),
                home_admin: Some("YGN-Admin".into()),
            }],
            vec![AdminContact {
                key: "YGN-Admin".into(),
                display_name: "Yangon Admin".into(),
                email: "admin-ygn@example.com".into(),
            }],
        );
        let service = BookingService::new(
            CalendarRules::default(),
            catalog,
            BusinessTimezone::default(),
            Arc::new(MemoryStore::default()),
        );
        app(AppState::new(service, admin_token.map(str::to_string)))
    }

    fn booking_json(start: &str, end: &str) -> String {
        json!({
            "employee_name": "Thandar",
            "department": "Marketing",
            "position": "Executive",
            "phone_number": "09 555 0101",
            "email": "thandar@example.com",
            "event_name": "Beauty Expo",
            "location": "Myanmar Plaza",
            "expected_users": 150,
            "unit_id": "SCM-001-YGN",
            "event_start": start,
            "event_end": end,
            "inform_to": "YGN-Admin"
        })
        .to_string()
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn health_and_units_answer() {
        let app = test_app(None);
        let health = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let units = app
            .oneshot(Request::builder().uri("/units").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(units.status(), StatusCode::OK);
        let units = body_json(units).await;
        assert_eq!(units[0]["id"], "SCM-001-YGN");
    }

    #[tokio::test]
    async fn availability_previews_the_window() {
        let app = test_app(None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/availability?unit=SCM-001-YGN&start=2025-06-20&end=2025-06-21")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let preview = body_json(resp).await;
        assert_eq!(preview["resolution"]["state"], "resolved");
        assert_eq!(preview["resolution"]["pickup_date"], "2025-06-19");
        assert_eq!(preview["resolution"]["return_date"], "2025-06-23");
        assert_eq!(preview["can_submit"], true);
    }

    #[tokio::test]
    async fn availability_without_end_cannot_submit() {
        let app = test_app(None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/availability?unit=SCM-001-YGN&start=2025-06-20")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let preview = body_json(resp).await;
        assert_eq!(preview["resolution"]["state"], "provisional");
        assert_eq!(preview["can_submit"], false);
    }

    #[tokio::test]
    async fn off_days_lists_weekends() {
        let app = test_app(None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/calendar/off-days?from=2025-06-16&to=2025-06-22")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let days = body_json(resp).await;
        assert_eq!(days.as_array().map(Vec::len), Some(2));
        assert_eq!(days[0]["date"], "2025-06-21");
    }

    #[tokio::test]
    async fn conflicting_submission_is_409() {
        let app = test_app(None);
        let first = app
            .clone()
            .oneshot(post_json("/requests", booking_json("2025-06-11", "2025-06-11")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::CREATED);
        let first = body_json(first).await;
        assert_eq!(first["record"]["status"], "Pending");

        let second = app
            .oneshot(post_json("/requests", booking_json("2025-06-12", "2025-06-12")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let body = body_json(second).await;
        assert_eq!(body["conflict"]["conflicting_date"], "2025-06-11");
    }

    #[tokio::test]
    async fn bad_fields_are_400() {
        let app = test_app(None);
        let mut body: Value = serde_json::from_str(&booking_json("2025-06-20", "2025-06-21")).unwrap();
        body["email"] = Value::from("not-an-email");
        let resp = app.oneshot(post_json("/requests", body.to_string())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["fields"][0]["field"], "email");
    }

    #[tokio::test]
    async fn admin_routes_are_closed_without_a_configured_token() {
        let app = test_app(None);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/admin/requests")
                    .header(ADMIN_TOKEN_HEADER, TOKEN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn token_comparison_needs_an_exact_match() {
        assert!(token_matches(TOKEN, TOKEN.as_bytes()));
        assert!(!token_matches(TOKEN, b"let-me-i"));
        assert!(!token_matches(TOKEN, b"let-me-inn"));
        assert!(!token_matches(TOKEN, b""));
    }

    #[tokio::test]
    async fn admin_routes_reject_a_wrong_token() {
        let app = test_app(Some(TOKEN));
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/admin/requests")
                    .header(ADMIN_TOKEN_HEADER, "guess")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_can_review_and_decide() {
        let app = test_app(Some(TOKEN));
        let created = app
            .clone()
            .oneshot(post_json("/requests", booking_json("2025-06-20", "2025-06-21")))
            .await
            .unwrap();
        let created = body_json(created).await;
        let request_id = created["record"]["request_id"].as_str().unwrap().to_string();

        let list = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/admin/requests")
                    .header(ADMIN_TOKEN_HEADER, TOKEN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        assert_eq!(body_json(list).await.as_array().map(Vec::len), Some(1));

        let mut decide = post_json(
            &format!("/admin/requests/{request_id}/decision"),
            json!({ "status": "Approved", "approved_by": "Ko Aung" }).to_string(),
        );
        decide
            .headers_mut()
            .insert(ADMIN_TOKEN_HEADER, TOKEN.parse().unwrap());
        let decided = app.clone().oneshot(decide).await.unwrap();
        assert_eq!(decided.status(), StatusCode::OK);
        let decided = body_json(decided).await;
        assert_eq!(decided["record"]["status"], "Approved");
        assert_eq!(decided["record"]["admin"]["approved_by"], "Ko Aung");

        let missing = app
            .oneshot(
                Request::builder()
                    .uri("/admin/requests/REQ-00000000")
                    .header(ADMIN_TOKEN_HEADER, TOKEN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
