//! Case model and the closed enumerations scoped to it.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Case {
    pub id: String,
    pub case_number: String,
    pub user_id: String,
    pub title: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub case_type: String,
    pub status: String,
    pub priority: String,
    pub description: Option<String>,
    pub incident_date: Option<String>,
    pub statute_of_limitations: Option<String>,
    pub settlement_amount: Option<f64>,
    pub insurance_company: Option<String>,
    pub insurance_adjuster: Option<String>,
    pub claim_number: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Type of legal matter a case tracks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    PersonalInjury,
    AutoAccident,
    MedicalMalpractice,
    WorkersComp,
    SlipAndFall,
    ProductLiability,
    Other,
}

impl CaseType {
    /// Short code used as the case-number prefix
    pub fn code(&self) -> &'static str {
        match self {
            Self::PersonalInjury => "PI",
            Self::AutoAccident => "AA",
            Self::MedicalMalpractice => "MM",
            Self::WorkersComp => "WC",
            Self::SlipAndFall => "SF",
            Self::ProductLiability => "PL",
            Self::Other => "GEN",
        }
    }
}

impl std::fmt::Display for CaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PersonalInjury => "personal_injury",
            Self::AutoAccident => "auto_accident",
            Self::MedicalMalpractice => "medical_malpractice",
            Self::WorkersComp => "workers_comp",
            Self::SlipAndFall => "slip_and_fall",
            Self::ProductLiability => "product_liability",
            Self::Other => "other",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal_injury" => Ok(Self::PersonalInjury),
            "auto_accident" => Ok(Self::AutoAccident),
            "medical_malpractice" => Ok(Self::MedicalMalpractice),
            "workers_comp" => Ok(Self::WorkersComp),
            "slip_and_fall" => Ok(Self::SlipAndFall),
            "product_liability" => Ok(Self::ProductLiability),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown case type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Closed,
    Settled,
    Dismissed,
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Settled => "settled",
            Self::Dismissed => "dismissed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "settled" => Ok(Self::Settled),
            "dismissed" => Ok(Self::Dismissed),
            _ => Err(format!("Unknown case status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCaseRequest {
    pub title: String,
    #[serde(rename = "clientName")]
    pub client_name: String,
    #[serde(rename = "clientEmail")]
    pub client_email: Option<String>,
    #[serde(rename = "clientPhone")]
    pub client_phone: Option<String>,
    #[serde(rename = "caseType")]
    pub case_type: String,
    pub priority: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "incidentDate")]
    pub incident_date: Option<String>,
    #[serde(rename = "insuranceCompany")]
    pub insurance_company: Option<String>,
    #[serde(rename = "insuranceAdjuster")]
    pub insurance_adjuster: Option<String>,
    #[serde(rename = "claimNumber")]
    pub claim_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListCasesQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

#[derive(Debug, Serialize)]
pub struct CaseListResponse {
    pub cases: Vec<Case>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct CaseStatsResponse {
    #[serde(rename = "totalCases")]
    pub total_cases: i64,
    #[serde(rename = "byStatus")]
    pub by_status: Vec<StatusCount>,
    #[serde(rename = "totalSettlements")]
    pub total_settlements: f64,
    #[serde(rename = "averageSettlement")]
    pub average_settlement: f64,
    #[serde(rename = "recentCases")]
    pub recent_cases: Vec<Case>,
    #[serde(rename = "upcomingDeadlines")]
    pub upcoming_deadlines: Vec<super::Deadline>,
}
