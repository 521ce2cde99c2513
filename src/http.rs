use crate::{
    backend::{AppointmentBackend, ProviderDirectory},
    error::{BookingError, SessionError},
    selection_session::{SelectionSession, SessionUpdate},
    types::{
        not_blank, parse_date, parse_time, BookingResult, FailureReason, PatientId, Provider,
        ProviderId, Slot, SlotKey,
    },
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use axum_valid::Valid;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use validator::Validate;

#[derive(Clone)]
pub struct AppState<B: AppointmentBackend> {
    session: SelectionSession<B>,
    directory: Arc<dyn ProviderDirectory>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct SelectProviderRequest {
    #[validate(range(min = 1))]
    provider_id: ProviderId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SelectSlotRequest {
    date: String,
    time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ConfirmBookingRequest {
    #[validate(range(min = 1))]
    patient_id: PatientId,
    #[validate(custom(function = "not_blank"))]
    reason: String,
}

enum ApiError {
    BadRequest(String),
    Session(SessionError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

fn session_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::InvalidStateTransition { .. }
        | SessionError::SlotNoLongerAvailable(_)
        | SessionError::Booking(BookingError::InProgress)
        | SessionError::Booking(BookingError::SlotNoLongerAvailable(_)) => StatusCode::CONFLICT,
        SessionError::Booking(BookingError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Stream(_) => StatusCode::BAD_GATEWAY,
        SessionError::UnknownProvider(_) => StatusCode::NOT_FOUND,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(error) => (StatusCode::BAD_REQUEST, error),
            Self::Session(err) => (session_status(&err), err.to_string()),
        };
        (status, Json(json!({ "error": error }))).into_response()
    }
}

fn booking_status(result: &BookingResult) -> StatusCode {
    match result.failure_reason() {
        None => StatusCode::OK,
        Some(FailureReason::Conflict(_)) => StatusCode::CONFLICT,
        Some(FailureReason::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(FailureReason::Transport(_)) => StatusCode::BAD_GATEWAY,
        Some(FailureReason::Server(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn create_app<B: AppointmentBackend>(
    backend: B,
    directory: Arc<dyn ProviderDirectory>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        session: SelectionSession::new(backend),
        directory,
    };
    info!(session_id = %state.session.id(), "Session created");

    Router::new()
        .route("/providers", get(get_providers::<B>))
        .route("/provider", post(select_provider::<B>))
        .route("/slot", post(select_slot::<B>).delete(clear_selection::<B>))
        .route("/book", post(confirm_booking::<B>))
        .route("/close", post(close_session::<B>))
        .route("/session", get(get_session::<B>))
        .route("/events", get(session_events::<B>))
        .with_state(state)
        .layer(cors)
}

async fn get_providers<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
) -> Json<Vec<Provider>> {
    Json(state.directory.providers())
}

async fn select_provider<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
    Valid(Json(request)): Valid<Json<SelectProviderRequest>>,
) -> Result<Json<SessionUpdate>, ApiError> {
    if state.directory.provider(request.provider_id).is_none() {
        warn!(provider_id = request.provider_id, "Unknown provider requested");
        return Err(SessionError::UnknownProvider(request.provider_id).into());
    }
    state.session.select_provider(request.provider_id).await?;
    Ok(Json(state.session.current()))
}

async fn select_slot<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
    Json(request): Json<SelectSlotRequest>,
) -> Result<Json<Slot>, ApiError> {
    let slot = SlotKey {
        date: parse_date(&request.date).map_err(ApiError::BadRequest)?,
        time: parse_time(&request.time).map_err(ApiError::BadRequest)?,
    };
    Ok(Json(state.session.select_slot(slot)?))
}

async fn clear_selection<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
) -> Result<Json<SessionUpdate>, ApiError> {
    state.session.clear_selection()?;
    Ok(Json(state.session.current()))
}

async fn confirm_booking<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
    Valid(Json(request)): Valid<Json<ConfirmBookingRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state
        .session
        .confirm_booking(request.patient_id, request.reason)
        .await?;
    Ok((booking_status(&result), Json(result)))
}

async fn close_session<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
) -> Json<SessionUpdate> {
    state.session.close();
    Json(state.session.current())
}

async fn get_session<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
) -> Json<SessionUpdate> {
    Json(state.session.current())
}

/// Starts with the current state, then one `session` event per change.
async fn session_events<B: AppointmentBackend>(
    State(state): State<AppState<B>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let updates = state
        .session
        .subscribe()
        .map(|update| Event::default().event("session").json_data(update));
    Sse::new(updates).keep_alive(KeepAlive::default())
}
