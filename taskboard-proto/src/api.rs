//! JSON bodies of the REST API.
//!
//! Shared by the server's handlers and the client's HTTP store so both sides
//! agree on field names.

use serde::{Deserialize, Serialize};

use crate::task::{Task, ValidationError};

/// Minimum display-name length.
pub const MIN_NAME_LENGTH: usize = 2;

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 6;

fn validate_email(email: &str) -> Result<(), ValidationError> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(ValidationError::InvalidEmail),
    }
}

fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::PasswordTooShort);
    }
    Ok(())
}

/// `POST /api/auth/register` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Plain-text password (hashed server-side).
    pub password: String,
}

impl RegisterRequest {
    /// Validates name, email and password.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().chars().count() < MIN_NAME_LENGTH {
            return Err(ValidationError::NameTooShort);
        }
        validate_email(&self.email)?;
        validate_password(&self.password)
    }
}

/// `POST /api/auth/login` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
}

impl LoginRequest {
    /// Validates email and password shape.
    ///
    /// # Errors
    ///
    /// Returns the first failing field's error.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_email(&self.email)?;
        validate_password(&self.password)
    }
}

/// A user as exposed over the API (no password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Registration time (ms since epoch).
    pub created_at: u64,
}

/// Response to register and login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// The authenticated user.
    pub user: PublicUser,
    /// Bearer token for subsequent requests.
    pub token: String,
}

/// Response wrapper used by `GET`/`PUT /api/tasks/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// The task.
    pub task: Task,
}

/// Response to `DELETE /api/tasks/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Always `true` on a 2xx response.
    pub success: bool,
}

/// Field-level error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `VALIDATION_ERROR`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional per-field details.
    #[serde(default)]
    pub details: Option<Vec<FieldError>>,
}
