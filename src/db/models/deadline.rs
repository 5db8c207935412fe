//! Deadline model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deadline {
    pub id: String,
    pub case_id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: String,
    pub priority: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDeadlineRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "dueDate")]
    pub due_date: String,
    pub priority: Option<String>,
}
