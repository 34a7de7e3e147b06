//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! Every handler here sits behind `require_auth`, which supplies the caller's
//! user id through the request extensions.

use crate::error::port_error_response;
use crate::web::auth::{AuthResponse, LoginRequest, SignupRequest};
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, NaiveDate, Utc};
use quill_core::{
    documents, stats, streak, CheckInOutcome, DailyStat, DailyTotals, Document, LevelProgress,
    PortError, Profile,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        get_profile_handler,
        check_in_handler,
        stats_today_handler,
        stats_range_handler,
        stats_totals_handler,
        create_document_handler,
        list_documents_handler,
        get_document_handler,
        rename_document_handler,
        archive_document_handler,
    ),
    components(
        schemas(
            SignupRequest, LoginRequest, AuthResponse, ProfileResponse, CheckInRequest,
            CheckInResponse, DailyStatResponse, TotalsResponse, CreateDocumentRequest,
            RenameDocumentRequest, RenameDocumentResponse, DocumentResponse, DocumentSummary
        )
    ),
    tags(
        (name = "Quill API", description = "Writing tracker: documents, daily stats, streaks and XP.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A user's gamification state plus the XP bar.
#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub level: u32,
    pub xp: u32,
    pub xp_for_next_level: u64,
    pub xp_remaining: u64,
    pub progress_percent: u8,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_check_in_date: Option<NaiveDate>,
    pub streak_freezes: u32,
    pub badges: Vec<String>,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        let progress = LevelProgress::for_profile(&profile);
        Self {
            user_id: profile.user_id,
            level: progress.level,
            xp: progress.xp,
            xp_for_next_level: progress.xp_for_next_level,
            xp_remaining: progress.xp_remaining,
            progress_percent: progress.percent,
            current_streak: profile.current_streak,
            longest_streak: profile.longest_streak,
            last_check_in_date: profile.last_check_in_date,
            streak_freezes: profile.streak_freezes,
            badges: profile.badges.into_iter().collect(),
        }
    }
}

#[derive(Deserialize, Default, ToSchema)]
pub struct CheckInRequest {
    /// Calendar day to check in for; defaults to today (UTC).
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Serialize, ToSchema)]
pub struct CheckInResponse {
    pub streak: u32,
    pub longest_streak: u32,
    pub is_new_check_in: bool,
}

impl From<CheckInOutcome> for CheckInResponse {
    fn from(outcome: CheckInOutcome) -> Self {
        Self {
            streak: outcome.streak,
            longest_streak: outcome.longest_streak,
            is_new_check_in: outcome.is_new_check_in,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DailyStatResponse {
    pub date: NaiveDate,
    pub words_written: u32,
    pub sessions_count: u32,
    pub minutes_written: u32,
    pub xp_earned: u32,
    pub checked_in: bool,
}

impl From<DailyStat> for DailyStatResponse {
    fn from(stat: DailyStat) -> Self {
        Self {
            date: stat.date,
            words_written: stat.words_written,
            sessions_count: stat.sessions_count,
            minutes_written: stat.minutes_written,
            xp_earned: stat.xp_earned,
            checked_in: stat.checked_in,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TotalsResponse {
    pub total_words: u64,
    pub total_sessions: u64,
    pub total_minutes: u64,
    pub total_xp: u64,
    pub days_active: u64,
}

impl From<DailyTotals> for TotalsResponse {
    fn from(totals: DailyTotals) -> Self {
        Self {
            total_words: totals.total_words,
            total_sessions: totals.total_sessions,
            total_minutes: totals.total_minutes,
            total_xp: totals.total_xp,
            days_active: totals.days_active,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DayQuery {
    /// Defaults to today (UTC).
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Deserialize, Default, ToSchema)]
pub struct CreateDocumentRequest {
    #[serde(default)]
    pub title: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RenameDocumentRequest {
    pub title: String,
}

#[derive(Serialize, ToSchema)]
pub struct RenameDocumentResponse {
    /// `false` when the title was empty or unchanged.
    pub updated: bool,
}

#[derive(Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub word_count: u32,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            title: document.title,
            content: document.content,
            word_count: document.word_count,
            is_archived: document.is_archived,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

/// A document without its content, for listings.
#[derive(Serialize, ToSchema)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub title: String,
    pub word_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<Document> for DocumentSummary {
    fn from(document: Document) -> Self {
        Self {
            id: document.id,
            title: document.title,
            word_count: document.word_count,
            updated_at: document.updated_at,
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Today's calendar date in UTC, the day boundary used for stats and check-ins.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn failed(action: &str, e: PortError) -> (StatusCode, String) {
    match e {
        PortError::NotFound(_) | PortError::NotAuthorized | PortError::InvalidInput(_) => {}
        _ => error!("Failed to {}: {:?}", action, e),
    }
    port_error_response(e)
}

//=========================================================================================
// Profile and Check-in Handlers
//=========================================================================================

/// Get the caller's profile with level progress.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "The caller's profile", body = ProfileResponse),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let profile = state
        .db
        .get_or_create_profile(user_id)
        .await
        .map_err(|e| failed("load profile", e))?;
    Ok(Json(ProfileResponse::from(profile)))
}

/// Check in for a day. Repeated check-ins on the same day change nothing.
#[utoipa::path(
    post,
    path = "/check-in",
    request_body = CheckInRequest,
    responses(
        (status = 200, description = "Check-in result", body = CheckInResponse),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn check_in_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CheckInRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let date = req.date.unwrap_or_else(today);
    let outcome = streak::check_in(state.db.as_ref(), user_id, date)
        .await
        .map_err(|e| failed("check in", e))?;
    Ok(Json(CheckInResponse::from(outcome)))
}

//=========================================================================================
// Stats Handlers
//=========================================================================================

/// Get the stats of a single day (`null` when nothing happened that day).
#[utoipa::path(
    get,
    path = "/stats/today",
    params(DayQuery),
    responses(
        (status = 200, description = "The day's record, or null", body = DailyStatResponse)
    )
)]
pub async fn stats_today_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<DayQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let date = query.date.unwrap_or_else(today);
    let stat = stats::stats_for_day(state.db.as_ref(), user_id, date)
        .await
        .map_err(|e| failed("load daily stats", e))?;
    Ok(Json(stat.map(DailyStatResponse::from)))
}

/// Get every daily record in `[start, end]`, for the activity calendar.
#[utoipa::path(
    get,
    path = "/stats/range",
    params(RangeQuery),
    responses(
        (status = 200, description = "Records ordered by date", body = Vec<DailyStatResponse>),
        (status = 400, description = "start is after end")
    )
)]
pub async fn stats_range_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let records = stats::stats_range(state.db.as_ref(), user_id, query.start, query.end)
        .await
        .map_err(|e| failed("load stats range", e))?;
    let body: Vec<DailyStatResponse> = records.into_iter().map(DailyStatResponse::from).collect();
    Ok(Json(body))
}

/// Get lifetime totals.
#[utoipa::path(
    get,
    path = "/stats/totals",
    responses(
        (status = 200, description = "Sums over every day", body = TotalsResponse)
    )
)]
pub async fn stats_totals_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let totals = stats::totals(state.db.as_ref(), user_id)
        .await
        .map_err(|e| failed("load totals", e))?;
    Ok(Json(TotalsResponse::from(totals)))
}

//=========================================================================================
// Document Handlers
//=========================================================================================

/// Create an empty document.
#[utoipa::path(
    post,
    path = "/documents",
    request_body = CreateDocumentRequest,
    responses(
        (status = 201, description = "Document created", body = DocumentResponse)
    )
)]
pub async fn create_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(req): Json<CreateDocumentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let document = documents::create(state.db.as_ref(), user_id, &req.title)
        .await
        .map_err(|e| failed("create document", e))?;
    Ok((StatusCode::CREATED, Json(DocumentResponse::from(document))))
}

/// List the caller's documents that are not archived, newest first.
#[utoipa::path(
    get,
    path = "/documents",
    responses(
        (status = 200, description = "The caller's documents", body = Vec<DocumentSummary>)
    )
)]
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let listed = documents::list(state.db.as_ref(), user_id)
        .await
        .map_err(|e| failed("list documents", e))?;
    let body: Vec<DocumentSummary> = listed.into_iter().map(DocumentSummary::from).collect();
    Ok(Json(body))
}

#[utoipa::path(
    get,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 200, description = "The document", body = DocumentResponse),
        (status = 403, description = "Owned by another user"),
        (status = 404, description = "No such document")
    )
)]
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let document = documents::load_owned(state.db.as_ref(), user_id, document_id)
        .await
        .map_err(|e| failed("load document", e))?;
    Ok(Json(DocumentResponse::from(document)))
}

/// Rename a document. Empty or unchanged titles are ignored.
#[utoipa::path(
    put,
    path = "/documents/{id}/title",
    params(("id" = Uuid, Path, description = "Document id")),
    request_body = RenameDocumentRequest,
    responses(
        (status = 200, description = "Whether the title was written", body = RenameDocumentResponse),
        (status = 403, description = "Owned by another user"),
        (status = 404, description = "No such document")
    )
)]
pub async fn rename_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
    Json(req): Json<RenameDocumentRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let updated = documents::rename(state.db.as_ref(), user_id, document_id, &req.title)
        .await
        .map_err(|e| failed("rename document", e))?;
    Ok(Json(RenameDocumentResponse { updated }))
}

/// Archive (soft delete) a document.
#[utoipa::path(
    post,
    path = "/documents/{id}/archive",
    params(("id" = Uuid, Path, description = "Document id")),
    responses(
        (status = 204, description = "Document archived"),
        (status = 403, description = "Owned by another user"),
        (status = 404, description = "No such document")
    )
)]
pub async fn archive_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(document_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    documents::archive(state.db.as_ref(), user_id, document_id)
        .await
        .map_err(|e| failed("archive document", e))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    #[test]
    fn profile_response_includes_level_progress() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut profile = Profile::new(Uuid::new_v4(), now);
        profile.xp = 150;
        profile.level = 2;
        profile.badges = BTreeSet::from(["first_words".to_string()]);

        let response = ProfileResponse::from(profile);
        assert_eq!(response.xp_for_next_level, 200);
        assert_eq!(response.xp_remaining, 50);
        assert_eq!(response.progress_percent, 75);
        assert_eq!(response.badges, vec!["first_words".to_string()]);
        assert_eq!(response.streak_freezes, 1);
    }

    #[test]
    fn check_in_request_date_is_optional() {
        let req: CheckInRequest = serde_json::from_str("{}").unwrap();
        assert!(req.date.is_none());
        let req: CheckInRequest = serde_json::from_str(r#"{"date":"2024-01-02"}"#).unwrap();
        assert_eq!(req.date, NaiveDate::from_ymd_opt(2024, 1, 2));
    }

    #[test]
    fn openapi_lists_the_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in ["/profile", "/check-in", "/stats/range", "/documents/{id}/title"] {
            assert!(paths.iter().any(|p| p.as_str() == expected), "missing {}", expected);
        }
    }
}
