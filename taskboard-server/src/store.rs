//! Authoritative Store: users and tasks persisted as JSON files.
//!
//! Two files live in the data directory, `users.json` and `tasks.json`, each
//! a JSON array. Every mutation is a read-modify-write of the whole file,
//! serialised behind a [`Mutex`] and committed with a temp-file rename so a
//! crash never leaves a half-written file behind.
//!
//! The store assigns ids (UUID v7) and timestamps; callers never do.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use taskboard_proto::api::PublicUser;
use taskboard_proto::task::{Task, TaskDraft, TaskId, TaskPatch, now_ms};
use tokio::sync::Mutex;
use uuid::Uuid;

const USERS_FILE: &str = "users.json";
const TASKS_FILE: &str = "tasks.json";

/// Errors returned by the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing a data file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A data file does not contain valid JSON.
    #[error("corrupt data file {path}: {source}")]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// No task with the given id.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// A user with this email is already registered.
    #[error("user already exists: {0}")]
    EmailTaken(String),
}

/// A registered user as persisted (includes the password hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login email, stored lower-cased.
    pub email: String,
    /// Output of [`crate::auth::hash_password`].
    pub password_hash: String,
    /// Registration time (ms since epoch).
    pub created_at: u64,
}

impl StoredUser {
    /// Projection without the password hash.
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
        }
    }
}

/// JSON-file backed store for users and tasks.
pub struct JsonStore {
    users_path: PathBuf,
    tasks_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Opens the store in `data_dir`, creating the directory and empty data
    /// files if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or files cannot be created.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;

        let store = Self {
            users_path: dir.join(USERS_FILE),
            tasks_path: dir.join(TASKS_FILE),
            write_lock: Mutex::new(()),
        };
        for path in [&store.users_path, &store.tasks_path] {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                write_json::<Vec<()>>(path, &Vec::new()).await?;
            }
        }
        tracing::info!(dir = %dir.display(), "opened data store");
        Ok(store)
    }

    // --- Users ---

    /// Registers a new user. Email comparison is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmailTaken`] if the email is already registered.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password_hash: String,
    ) -> Result<StoredUser, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut users: Vec<StoredUser> = read_json(&self.users_path).await?;
        let email = email.trim().to_lowercase();
        if users.iter().any(|u| u.email == email) {
            return Err(StoreError::EmailTaken(email));
        }
        let user = StoredUser {
            id: Uuid::now_v7().to_string(),
            name: name.trim().to_string(),
            email,
            password_hash,
            created_at: now_ms(),
        };
        users.push(user.clone());
        write_json(&self.users_path, &users).await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Looks a user up by email (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the users file cannot be read.
    pub async fn user_by_email(&self, email: &str) -> Result<Option<StoredUser>, StoreError> {
        let email = email.trim().to_lowercase();
        let users: Vec<StoredUser> = read_json(&self.users_path).await?;
        Ok(users.into_iter().find(|u| u.email == email))
    }

    // --- Tasks ---

    /// All tasks owned by `user_id`, in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the tasks file cannot be read.
    pub async fn tasks_for_user(&self, user_id: &str) -> Result<Vec<Task>, StoreError> {
        let tasks: Vec<Task> = read_json(&self.tasks_path).await?;
        Ok(tasks.into_iter().filter(|t| t.user_id == user_id).collect())
    }

    /// Looks a task up by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the tasks file cannot be read.
    pub async fn task(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let tasks: Vec<Task> = read_json(&self.tasks_path).await?;
        Ok(tasks.into_iter().find(|t| &t.id == id))
    }

    /// Creates a task owned by `user_id`, assigning its id and timestamps.
    ///
    /// The draft is expected to be validated already.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the tasks file cannot be read or written.
    pub async fn create_task(&self, user_id: &str, draft: &TaskDraft) -> Result<Task, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tasks: Vec<Task> = read_json(&self.tasks_path).await?;
        let task = Task::from_draft(TaskId::new(), draft, user_id, now_ms());
        tasks.push(task.clone());
        write_json(&self.tasks_path, &tasks).await?;
        tracing::debug!(task_id = %task.id, user_id, "task created");
        Ok(task)
    }

    /// Merges `patch` into the task and bumps `updated_at`.
    ///
    /// `updated_at` never moves backwards even if the wall clock does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if there is no such task.
    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tasks: Vec<Task> = read_json(&self.tasks_path).await?;
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        patch.apply_to(task);
        task.updated_at = now_ms().max(task.updated_at);
        let updated = task.clone();
        write_json(&self.tasks_path, &tasks).await?;
        tracing::debug!(task_id = %id, "task updated");
        Ok(updated)
    }

    /// Removes a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if there is no such task.
    pub async fn delete_task(&self, id: &TaskId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut tasks: Vec<Task> = read_json(&self.tasks_path).await?;
        let before = tasks.len();
        tasks.retain(|t| &t.id != id);
        if tasks.len() == before {
            return Err(StoreError::TaskNotFound(id.clone()));
        }
        write_json(&self.tasks_path, &tasks).await?;
        tracing::debug!(task_id = %id, "task deleted");
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}
