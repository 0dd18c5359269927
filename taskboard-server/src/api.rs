//! REST handlers for authentication and task CRUD.
//!
//! Task routes require `Authorization: Bearer <token>` and only ever expose
//! the caller's own tasks: a task owned by someone else answers 403.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use taskboard_proto::api::{
    AuthResponse, DeleteResponse, ErrorBody, FieldError, LoginRequest, RegisterRequest,
    TaskEnvelope,
};
use taskboard_proto::task::{Task, TaskDraft, TaskId, TaskPatch, ValidationError};

use crate::auth::{self, AuthContext, AuthError};
use crate::server::AppState;
use crate::store::{StoreError, StoredUser};

/// Errors surfaced by REST handlers, each mapped to a status and JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No bearer token on a protected route.
    #[error("authentication required")]
    Unauthenticated,
    /// The bearer token failed verification.
    #[error("invalid token")]
    InvalidToken,
    /// Login with an unknown email or a wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The task belongs to another user.
    #[error("access denied")]
    Forbidden,
    /// No task with this id.
    #[error("task not found")]
    NotFound,
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The body is not valid JSON for the route.
    #[error("invalid request body: {0}")]
    BadRequest(String),
    /// Registration with an email that is already taken.
    #[error("user already exists")]
    UserExists,
    /// Anything else; details are logged, not returned.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidToken | Self::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::BadRequest(_) | Self::UserExists => {
                StatusCode::BAD_REQUEST
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "AUTHENTICATION_REQUIRED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Forbidden => "ACCESS_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UserExists => "USER_EXISTS",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

fn field_of(error: &ValidationError) -> &'static str {
    match error {
        ValidationError::TitleEmpty | ValidationError::TitleTooLong => "title",
        ValidationError::EmptyId(_) | ValidationError::PendingId(_) => "id",
        ValidationError::InvalidStatus(_) => "status",
        ValidationError::InvalidPriority(_) => "priority",
        ValidationError::NameTooShort => "name",
        ValidationError::InvalidEmail => "email",
        ValidationError::PasswordTooShort => "password",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "request failed");
        }
        let details = match &self {
            Self::Validation(e) => Some(vec![FieldError {
                field: field_of(e).to_string(),
                message: e.to_string(),
            }]),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            details,
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::TaskNotFound(_) => Self::NotFound,
            StoreError::EmailTaken(_) => Self::UserExists,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken(_) => Self::InvalidToken,
            AuthError::Sign(_) | AuthError::Hash(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

/// Extracts and verifies the caller's bearer token.
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = auth::bearer_token(&parts.headers).ok_or(ApiError::Unauthenticated)?;
        Ok(state.tokens.verify(token)?)
    }
}

fn auth_response(state: &AppState, user: &StoredUser) -> Result<Json<AuthResponse>, ApiError> {
    let token = state.tokens.issue(&user.id, &user.email)?;
    Ok(Json(AuthResponse {
        user: user.to_public(),
        token,
    }))
}

/// Loads a task and checks the caller owns it.
async fn owned_task(state: &AppState, ctx: &AuthContext, id: &TaskId) -> Result<Task, ApiError> {
    let task = state.store.task(id).await?.ok_or(ApiError::NotFound)?;
    if task.user_id != ctx.user_id {
        tracing::warn!(task_id = %id, user_id = %ctx.user_id, "access to foreign task denied");
        return Err(ApiError::Forbidden);
    }
    Ok(task)
}

/// `POST /api/auth/register`
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    let hash = auth::hash_password(&req.password, state.hash_cost).await?;
    let user = state.store.create_user(&req.name, &req.email, hash).await?;
    auth_response(&state, &user)
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    let user = state
        .store
        .user_by_email(&req.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;
    if !auth::verify_password(&req.password, &user.password_hash).await {
        tracing::info!(user_id = %user.id, "login with wrong password");
        return Err(ApiError::InvalidCredentials);
    }
    auth_response(&state, &user)
}

/// `GET /api/tasks`
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.store.tasks_for_user(&ctx.user_id).await?))
}

/// `POST /api/tasks`
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    payload: Result<Json<TaskDraft>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(draft) = payload?;
    draft.validate()?;
    let task = state.store.create_task(&ctx.user_id, &draft).await?;
    Ok(Json(task))
}

/// `GET /api/tasks/{id}`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    let task = owned_task(&state, &ctx, &TaskId::from(id)).await?;
    Ok(Json(TaskEnvelope { task }))
}

/// `PUT /api/tasks/{id}`
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<String>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Json<TaskEnvelope>, ApiError> {
    let id = TaskId::from(id);
    owned_task(&state, &ctx, &id).await?;
    let Json(patch) = payload?;
    patch.validate()?;
    let task = state.store.update_task(&id, &patch).await?;
    Ok(Json(TaskEnvelope { task }))
}

/// `DELETE /api/tasks/{id}`
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    ctx: AuthContext,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let id = TaskId::from(id);
    owned_task(&state, &ctx, &id).await?;
    state.store.delete_task(&id).await?;
    Ok(Json(DeleteResponse { success: true }))
}
