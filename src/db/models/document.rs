//! Document model. The row carries a denormalized copy of the owning
//! case's user_id so download/delete can check ownership without a join;
//! the case remains the source of truth.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: String,
    pub case_id: String,
    pub user_id: String,
    pub stored_filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub mime_type: String,
    pub document_type: String,
    pub description: Option<String>,
    pub uploaded_at: String,
}

/// Document metadata as returned by the API: everything a client needs
/// to list and request downloads, without filesystem internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: String,
    pub case_id: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub document_type: String,
    pub description: Option<String>,
    pub uploaded_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            case_id: doc.case_id,
            original_filename: doc.original_filename,
            file_size: doc.file_size,
            mime_type: doc.mime_type,
            document_type: doc.document_type,
            description: doc.description,
            uploaded_at: doc.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Contract,
    Evidence,
    Correspondence,
    CourtFiling,
    MedicalRecord,
    Insurance,
    Other,
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Contract => "contract",
            Self::Evidence => "evidence",
            Self::Correspondence => "correspondence",
            Self::CourtFiling => "court_filing",
            Self::MedicalRecord => "medical_record",
            Self::Insurance => "insurance",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contract" => Ok(Self::Contract),
            "evidence" => Ok(Self::Evidence),
            "correspondence" => Ok(Self::Correspondence),
            "court_filing" => Ok(Self::CourtFiling),
            "medical_record" => Ok(Self::MedicalRecord),
            "insurance" => Ok(Self::Insurance),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown document type: {}", s)),
        }
    }
}
