mod config;
pub mod notify;

use std::str::FromStr;
use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{delete, get, post, put},
};
use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use chorecredit_shared::api;
use chorecredit_shared::domain::Device;
pub use config::{AppConfig, ChildSeed, ConfigError, TaskSeed};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info_span;
use uuid::Uuid;

use crate::reward::{achievements, approval, ledger, pool, registry, streak};
use crate::storage::models::{Achievement, LedgerEntry, ResourceUnit, Submission};
use crate::storage::{StorageError, Store};
use notify::{Dispatcher, PushEvent};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub tz: Tz,
    pub registry: Arc<registry::StrategyRegistry>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store, tz: Tz) -> Self {
        Self {
            config,
            store,
            tz,
            registry: Arc::new(registry::StrategyRegistry::builtin()),
            dispatcher: Arc::new(notify::LogDispatcher),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/submissions", post(api_create_submission))
        .route("/api/v1/submissions/pending", get(api_list_pending))
        .route("/api/v1/submissions/history", get(api_submission_history))
        .route("/api/v1/submissions/{id}/approve", post(api_approve))
        .route("/api/v1/submissions/{id}/retry", post(api_retry))
        .route("/api/v1/ledger/aggregate", get(api_ledger_aggregate))
        .route("/api/v1/ledger/payout", post(api_ledger_payout))
        .route("/api/v1/ledger/{entry_id}/mark-paid", post(api_mark_paid))
        .route("/api/v1/ledger/{child_id}", get(api_ledger_history))
        .route("/api/v1/pool/import", post(api_pool_import))
        .route("/api/v1/pool", get(api_pool_list))
        .route("/api/v1/pool/stats", get(api_pool_stats))
        .route("/api/v1/pool/{id}", delete(api_pool_delete))
        .route("/api/v1/strategies", get(api_list_strategies))
        .route(
            "/api/v1/families/{family_id}/devices/{device}/strategy",
            put(api_set_strategy),
        )
        .route("/api/v1/families/{family_id}/offers", get(api_list_offers))
        .route(
            "/api/v1/families/{family_id}/payouts",
            get(api_list_payouts),
        )
        .route("/api/v1/children/{id}/streak", get(api_child_streak))
        .route(
            "/api/v1/children/{id}/achievements",
            get(api_child_achievements),
        )
        .route(
            "/api/v1/children/{id}/achievements/new",
            post(api_child_new_achievements),
        )
        .route("/api/v1/learning/sessions", post(api_record_learning))
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

// Submissions

async fn api_create_submission(
    State(state): State<AppState>,
    Json(body): Json<api::SubmissionCreateReq>,
) -> Result<(StatusCode, Json<api::SubmissionCreateResp>), AppError> {
    let registry = state.registry.clone();
    let tz = state.tz;
    let outcome = state
        .store
        .transaction(move |conn| {
            approval::create(
                conn,
                &registry,
                tz,
                &approval::SubmissionInput {
                    task_id: &body.task_id,
                    child_id: &body.child_id,
                    family_id: body.family_id,
                    device: body.selected_device,
                    comment: body.comment.as_deref(),
                    photo_path: body.photo_path.as_deref(),
                },
            )
        })
        .await?;

    if let Some(entry) = &outcome.ledger_entry {
        state.dispatcher.dispatch(
            &outcome.submission.child_id,
            PushEvent::SubmissionAutoApproved {
                submission_id: outcome.submission.id,
                minutes: entry.minutes,
                target_device: entry.target_device.clone(),
                new_achievement_names: achievement_names(&outcome.new_achievements),
            },
        );
    }

    let resp = api::SubmissionCreateResp {
        submission: submission_dto(&outcome.submission)?,
        ledger_entry: outcome
            .ledger_entry
            .as_ref()
            .map(ledger_entry_dto)
            .transpose()?,
        new_achievements: achievement_names(&outcome.new_achievements),
    };
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn api_list_pending(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::SubmissionDto>>, AppError> {
    let rows = state.store.run(approval::list_pending).await?;
    Ok(Json(submission_dtos(&rows)?))
}

#[derive(Deserialize)]
struct HistoryQuery {
    child_id: Option<String>,
}

async fn api_submission_history(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<api::SubmissionDto>>, AppError> {
    let rows = state
        .store
        .run(move |conn| approval::history(conn, q.child_id.as_deref()))
        .await?;
    Ok(Json(submission_dtos(&rows)?))
}

async fn api_approve(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::ApproveReq>,
) -> Result<Json<api::ApproveResp>, AppError> {
    let registry = state.registry.clone();
    let tz = state.tz;
    let outcome = state
        .store
        .transaction(move |conn| {
            approval::approve(
                conn,
                &registry,
                tz,
                id,
                body.minutes,
                body.resource_code.as_deref(),
                body.comment.as_deref(),
            )
        })
        .await?;

    let entry = outcome
        .ledger_entry
        .as_ref()
        .ok_or_else(|| AppError::internal("approval produced no ledger entry"))?;
    state.dispatcher.dispatch(
        &outcome.submission.child_id,
        PushEvent::SubmissionApproved {
            submission_id: outcome.submission.id,
            minutes: entry.minutes,
            target_device: entry.target_device.clone(),
            new_achievement_names: achievement_names(&outcome.new_achievements),
        },
    );

    Ok(Json(api::ApproveResp {
        submission: submission_dto(&outcome.submission)?,
        ledger_entry: ledger_entry_dto(entry)?,
        new_achievements: achievement_names(&outcome.new_achievements),
    }))
}

async fn api_retry(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<api::RetryReq>,
) -> Result<Json<api::SubmissionDto>, AppError> {
    let submission = state
        .store
        .transaction(move |conn| approval::retry(conn, id, body.comment.as_deref()))
        .await?;
    Ok(Json(submission_dto(&submission)?))
}

// Ledger

#[derive(Deserialize)]
struct AggregateQuery {
    family_id: Option<i32>,
    child_id: Option<String>,
    device: Option<Device>,
}

async fn api_ledger_aggregate(
    State(state): State<AppState>,
    Query(q): Query<AggregateQuery>,
) -> Result<Json<Vec<api::BalanceDto>>, AppError> {
    let rows = state
        .store
        .run(move |conn| {
            ledger::aggregate_unpaid(conn, q.family_id, q.child_id.as_deref(), q.device, None)
        })
        .await?;
    rows.iter()
        .map(|p| {
            Ok(api::BalanceDto {
                child_id: p.child_id.clone(),
                target_device: parse_device(&p.target_device)?,
                total_minutes: p.total_minutes,
                entry_count: p.entry_count,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()
        .map(Json)
}

async fn api_ledger_history(
    State(state): State<AppState>,
    Path(child_id): Path<String>,
) -> Result<Json<Vec<api::LedgerEntryDto>>, AppError> {
    let rows = state
        .store
        .run(move |conn| ledger::list_for_child(conn, &child_id))
        .await?;
    rows.iter()
        .map(ledger_entry_dto)
        .collect::<Result<Vec<_>, AppError>>()
        .map(Json)
}

async fn api_ledger_payout(
    State(state): State<AppState>,
    Json(body): Json<api::PayoutCreateReq>,
) -> Result<(StatusCode, Json<api::LedgerEntryDto>), AppError> {
    let entry = state
        .store
        .transaction(move |conn| {
            ledger::manual_payout(
                conn,
                body.family_id,
                &body.child_id,
                body.minutes,
                body.target_device,
                body.resource_code.as_deref(),
                body.reason.as_deref(),
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ledger_entry_dto(&entry)?)))
}

async fn api_mark_paid(
    State(state): State<AppState>,
    Path(entry_id): Path<i32>,
) -> Result<Json<api::LedgerEntryDto>, AppError> {
    let entry = state
        .store
        .transaction(move |conn| ledger::mark_paid(conn, entry_id))
        .await?;
    Ok(Json(ledger_entry_dto(&entry)?))
}

// Resource pool

async fn api_pool_import(
    State(state): State<AppState>,
    Json(body): Json<api::PoolImportReq>,
) -> Result<Json<api::PoolImportResp>, AppError> {
    let outcome = state
        .store
        .transaction(move |conn| pool::import(conn, body.family_id, &body.raw_text))
        .await?;
    Ok(Json(api::PoolImportResp {
        imported: outcome.imported,
        skipped: outcome.skipped,
        errors: outcome.errors,
    }))
}

#[derive(Deserialize)]
struct PoolQuery {
    family_id: Option<i32>,
    #[serde(default)]
    available_only: bool,
    device: Option<Device>,
}

async fn api_pool_list(
    State(state): State<AppState>,
    Query(q): Query<PoolQuery>,
) -> Result<Json<Vec<api::ResourceUnitDto>>, AppError> {
    let rows = state
        .store
        .run(move |conn| pool::list(conn, q.family_id, q.available_only, q.device))
        .await?;
    rows.iter()
        .map(resource_unit_dto)
        .collect::<Result<Vec<_>, AppError>>()
        .map(Json)
}

#[derive(Deserialize)]
struct PoolStatsQuery {
    family_id: Option<i32>,
}

async fn api_pool_stats(
    State(state): State<AppState>,
    Query(q): Query<PoolStatsQuery>,
) -> Result<Json<api::PoolStatsDto>, AppError> {
    let stats = state
        .store
        .run(move |conn| pool::stats(conn, q.family_id))
        .await?;
    Ok(Json(api::PoolStatsDto {
        total: stats.total,
        available: stats.available,
        used: stats.used,
        by_device: stats.by_device,
    }))
}

async fn api_pool_delete(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .transaction(move |conn| pool::delete(conn, id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Strategies

async fn api_list_strategies(
    State(state): State<AppState>,
) -> Result<Json<Vec<api::StrategyDescriptorDto>>, AppError> {
    let items = state
        .registry
        .descriptors()
        .into_iter()
        .map(|d| api::StrategyDescriptorDto {
            code: d.code,
            name: d.name.to_string(),
            requires_pool: d.requires_pool,
        })
        .collect();
    Ok(Json(items))
}

#[derive(Deserialize)]
struct FamilyDevicePath {
    family_id: i32,
    device: Device,
}

async fn api_set_strategy(
    State(state): State<AppState>,
    Path(p): Path<FamilyDevicePath>,
    Json(body): Json<api::SetStrategyReq>,
) -> Result<Json<api::StrategyDescriptorDto>, AppError> {
    let settings = body
        .settings
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(AppError::internal)?;
    let registry = state.registry.clone();
    let row = state
        .store
        .transaction(move |conn| {
            registry::set_device_strategy(
                conn,
                p.family_id,
                p.device,
                &body.strategy,
                settings.as_deref(),
            )
        })
        .await?;
    let code = row.strategy.parse().map_err(AppError::internal)?;
    let descriptor = registry.get(code).descriptor();
    Ok(Json(api::StrategyDescriptorDto {
        code: descriptor.code,
        name: descriptor.name.to_string(),
        requires_pool: descriptor.requires_pool,
    }))
}

#[derive(Deserialize)]
struct FamilyPath {
    family_id: i32,
}

#[derive(Deserialize)]
struct OffersQuery {
    device: Option<Device>,
}

async fn api_list_offers(
    State(state): State<AppState>,
    Path(p): Path<FamilyPath>,
    Query(q): Query<OffersQuery>,
) -> Result<Json<Vec<api::RewardOfferDto>>, AppError> {
    let registry = state.registry.clone();
    let offers = state
        .store
        .run(move |conn| {
            // Offers only make sense for a concrete device binding; without
            // one, collect over every device the family has configured.
            match q.device {
                Some(device) => {
                    let strategy = registry.resolve(conn, Some(p.family_id), device)?;
                    strategy.list_available(conn, Some(p.family_id), Some(device))
                }
                None => {
                    let mut all = Vec::new();
                    for device in [Device::Phone, Device::Pc, Device::Tablet, Device::Console] {
                        let strategy = registry.resolve(conn, Some(p.family_id), device)?;
                        all.extend(strategy.list_available(
                            conn,
                            Some(p.family_id),
                            Some(device),
                        )?);
                    }
                    Ok(all)
                }
            }
        })
        .await?;
    offers
        .iter()
        .map(|o| {
            Ok(api::RewardOfferDto {
                unit_id: o.unit_id,
                code: o.code.clone(),
                minutes: o.minutes,
                target_device: parse_device(&o.device)?,
                created_at: rfc3339(o.created_at),
            })
        })
        .collect::<Result<Vec<_>, AppError>>()
        .map(Json)
}

#[derive(Deserialize)]
struct PayoutsQuery {
    child_id: Option<String>,
    device: Option<Device>,
}

async fn api_list_payouts(
    State(state): State<AppState>,
    Path(p): Path<FamilyPath>,
    Query(q): Query<PayoutsQuery>,
) -> Result<Json<Vec<api::BalanceDto>>, AppError> {
    let registry = state.registry.clone();
    let rows = state
        .store
        .run(move |conn| match q.device {
            Some(device) => {
                let strategy = registry.resolve(conn, Some(p.family_id), device)?;
                strategy.list_pending_payouts(
                    conn,
                    Some(p.family_id),
                    q.child_id.as_deref(),
                    Some(device),
                )
            }
            // No device binding to resolve against: report across all tags.
            None => ledger::aggregate_unpaid(
                conn,
                Some(p.family_id),
                q.child_id.as_deref(),
                None,
                None,
            ),
        })
        .await?;
    rows.iter()
        .map(|row| {
            Ok(api::BalanceDto {
                child_id: row.child_id.clone(),
                target_device: parse_device(&row.target_device)?,
                total_minutes: row.total_minutes,
                entry_count: row.entry_count,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()
        .map(Json)
}

// Streaks & achievements

async fn api_child_streak(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<api::StreakDto>, AppError> {
    let tz = state.tz;
    let child = id.clone();
    let days = state
        .store
        .run(move |conn| streak::current_streak(conn, &child, tz))
        .await?;
    Ok(Json(api::StreakDto {
        child_id: id,
        streak_days: days,
    }))
}

async fn api_child_achievements(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<api::AchievementDto>>, AppError> {
    let rows = state
        .store
        .run(move |conn| achievements::list_with_status(conn, &id))
        .await?;
    let items = rows
        .into_iter()
        .map(|(ach, unlocked_at)| api::AchievementDto {
            id: ach.id,
            code: ach.code,
            name: ach.name,
            description: ach.description,
            icon: ach.icon,
            category: ach.category,
            threshold: ach.threshold,
            bonus_minutes: ach.bonus_minutes,
            unlocked: unlocked_at.is_some(),
            unlocked_at: unlocked_at.map(rfc3339),
        })
        .collect();
    Ok(Json(items))
}

async fn api_child_new_achievements(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let rows = state
        .store
        .transaction(move |conn| achievements::take_unnotified(conn, &id))
        .await?;
    Ok(Json(achievement_names(&rows)))
}

// Learning sessions

async fn api_record_learning(
    State(state): State<AppState>,
    Json(body): Json<api::LearningSessionReq>,
) -> Result<StatusCode, AppError> {
    use crate::storage::models::NewLearningSession;
    use crate::storage::schema::learning_sessions::dsl as ls;
    use diesel::prelude::*;

    state
        .store
        .transaction(move |conn| {
            diesel::insert_into(ls::learning_sessions)
                .values(&NewLearningSession {
                    child_id: &body.child_id,
                    completed: body.completed,
                    correct_answers: body.correct_answers,
                    total_questions: body.total_questions,
                    created_at: Utc::now().naive_utc(),
                })
                .execute(conn)?;
            Ok(())
        })
        .await?;
    Ok(StatusCode::CREATED)
}

// DTO helpers

fn rfc3339(ndt: NaiveDateTime) -> String {
    chrono::DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc).to_rfc3339()
}

fn parse_device(raw: &str) -> Result<Device, AppError> {
    Device::from_str(raw).map_err(AppError::internal)
}

fn achievement_names(rows: &[Achievement]) -> Vec<String> {
    rows.iter().map(|a| a.name.clone()).collect()
}

fn submission_dto(row: &Submission) -> Result<api::SubmissionDto, AppError> {
    Ok(api::SubmissionDto {
        id: row.id,
        task_id: row.task_id.clone(),
        child_id: row.child_id.clone(),
        family_id: row.family_id,
        status: row.status.parse().map_err(AppError::internal)?,
        selected_device: parse_device(&row.selected_device)?,
        comment: row.comment.clone(),
        photo_path: row.photo_path.clone(),
        created_at: rfc3339(row.created_at),
        updated_at: rfc3339(row.updated_at),
    })
}

fn submission_dtos(rows: &[Submission]) -> Result<Vec<api::SubmissionDto>, AppError> {
    rows.iter().map(submission_dto).collect()
}

fn ledger_entry_dto(row: &LedgerEntry) -> Result<api::LedgerEntryDto, AppError> {
    Ok(api::LedgerEntryDto {
        id: row.id,
        child_id: row.child_id.clone(),
        family_id: row.family_id,
        submission_id: row.submission_id,
        minutes: row.minutes,
        target_device: parse_device(&row.target_device)?,
        resource_code: row.resource_code.clone(),
        strategy: row.strategy.parse().map_err(AppError::internal)?,
        expires_at: row.expires_at.map(rfc3339),
        reason: row.reason.clone(),
        paid_out: row.paid_out,
        created_at: rfc3339(row.created_at),
    })
}

fn resource_unit_dto(row: &ResourceUnit) -> Result<api::ResourceUnitDto, AppError> {
    Ok(api::ResourceUnitDto {
        id: row.id,
        code: row.code.clone(),
        minutes: row.minutes,
        target_device: parse_device(&row.target_device)?,
        family_id: row.family_id,
        used: row.used,
        used_at: row.used_at.map(rfc3339),
        used_by: row.used_by.clone(),
        created_at: rfc3339(row.created_at),
    })
}

// Errors

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::Conflict(m) => AppError::Conflict(m),
            StorageError::InvalidState(m) => AppError::Conflict(m),
            StorageError::InvalidInput(m) => AppError::BadRequest(m),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
