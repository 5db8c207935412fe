//! Case note model. Notes are append-only; there is no update endpoint
//! and rows are removed only by the owning case's cascade.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CaseNote {
    pub id: String,
    pub case_id: String,
    pub user_id: String,
    pub note: String,
    pub note_type: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    General,
    ClientCommunication,
    CourtFiling,
    Research,
    Strategy,
}

impl std::fmt::Display for NoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::General => "general",
            Self::ClientCommunication => "client_communication",
            Self::CourtFiling => "court_filing",
            Self::Research => "research",
            Self::Strategy => "strategy",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for NoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(Self::General),
            "client_communication" => Ok(Self::ClientCommunication),
            "court_filing" => Ok(Self::CourtFiling),
            "research" => Ok(Self::Research),
            "strategy" => Ok(Self::Strategy),
            _ => Err(format!("Unknown note type: {}", s)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub note: String,
    #[serde(rename = "noteType")]
    pub note_type: Option<String>,
}
