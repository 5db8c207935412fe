use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, NaiveDate};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_case_status, validate_case_type, validate_date, validate_due_date, validate_email,
    validate_note_type, validate_priority, validate_required_text, validate_uuid,
};
use crate::db::{
    Case, CaseListResponse, CaseNote, CaseStatsResponse, CaseType, CreateCaseRequest,
    CreateDeadlineRequest, CreateNoteRequest, Deadline, Document, DocumentResponse,
    ListCasesQuery, Pagination, StatusCount,
};
use crate::AppState;

/// Hard ceiling on page size regardless of what the client asks for
const MAX_PAGE_SIZE: u32 = 100;

/// Attempts at generating a unique case number before giving up
const CASE_NUMBER_ATTEMPTS: u32 = 5;

/// Case fields a client may update, as a fixed API-field to column mapping.
/// Keys outside this table are rejected, never silently applied or ignored.
/// caseType is immutable (it anchors the case number) and
/// statuteOfLimitations is derived once at creation.
const UPDATABLE_CASE_FIELDS: &[(&str, &str)] = &[
    ("title", "title"),
    ("clientName", "client_name"),
    ("clientEmail", "client_email"),
    ("clientPhone", "client_phone"),
    ("status", "status"),
    ("priority", "priority"),
    ("description", "description"),
    ("incidentDate", "incident_date"),
    ("settlementAmount", "settlement_amount"),
    ("insuranceCompany", "insurance_company"),
    ("insuranceAdjuster", "insurance_adjuster"),
    ("claimNumber", "claim_number"),
];

/// Generate a human-readable case number: type code, year, random suffix.
/// Uniqueness is enforced by the column constraint plus a retry loop at the
/// insert site.
fn generate_case_number(case_type: CaseType) -> String {
    let year = chrono::Utc::now().year();
    let suffix: u32 = rand::rng().random_range(0..1000);
    format!("{}-{}-{:03}", case_type.code(), year, suffix)
}

/// Statute of limitations: incident date plus two years, same month and
/// day. Feb 29 origins land on Feb 28 of the target year.
fn statute_of_limitations(incident: NaiveDate) -> NaiveDate {
    let target_year = incident.year() + 2;
    incident
        .with_year(target_year)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(target_year, 2, 28).expect("Feb 28 always exists"))
}

/// Escape LIKE wildcards in a user-supplied search term
fn like_pattern(term: &str) -> String {
    let escaped = term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Fetch a case only if it belongs to the caller. A case owned by someone
/// else reports the same not_found as a case that does not exist.
async fn find_owned_case(
    state: &AppState,
    case_id: &str,
    user_id: &str,
) -> Result<Case, ApiError> {
    validate_uuid(case_id, "case_id")
        .map_err(|e| ApiError::validation_field("case_id", e))?;

    sqlx::query_as::<_, Case>("SELECT * FROM cases WHERE id = ? AND user_id = ?")
        .bind(case_id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Case not found"))
}

/// GET /api/cases
pub async fn list_cases(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Query(query): Query<ListCasesQuery>,
) -> Result<Json<CaseListResponse>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, MAX_PAGE_SIZE);

    let mut conditions = vec!["user_id = ?".to_string()];
    let mut binds: Vec<String> = vec![current.user.id.clone()];

    if let Some(ref status) = query.status {
        let status = validate_case_status(status)
            .map_err(|e| ApiError::validation_field("status", e))?;
        conditions.push("status = ?".to_string());
        binds.push(status.to_string());
    }
    if let Some(ref priority) = query.priority {
        let priority = validate_priority(priority)
            .map_err(|e| ApiError::validation_field("priority", e))?;
        conditions.push("priority = ?".to_string());
        binds.push(priority.to_string());
    }
    if let Some(ref search) = query.search {
        if !search.trim().is_empty() {
            conditions.push(
                "(title LIKE ? ESCAPE '\\' OR client_name LIKE ? ESCAPE '\\' \
                 OR case_number LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            let pattern = like_pattern(search.trim());
            binds.push(pattern.clone());
            binds.push(pattern.clone());
            binds.push(pattern);
        }
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM cases WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for bind in &binds {
        count_query = count_query.bind(bind);
    }
    let (total,) = count_query.fetch_one(&state.db).await?;

    let rows_sql = format!(
        "SELECT * FROM cases WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut rows_query = sqlx::query_as::<_, Case>(&rows_sql);
    for bind in &binds {
        rows_query = rows_query.bind(bind);
    }
    let offset = (page - 1) as i64 * limit as i64;
    let cases = rows_query
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&state.db)
        .await?;

    let pages = (total + limit as i64 - 1) / limit as i64;

    Ok(Json(CaseListResponse {
        cases,
        pagination: Pagination {
            page,
            limit,
            total,
            pages,
        },
    }))
}

/// Aggregate view of a case with all its sub-resources
#[derive(Debug, Serialize)]
pub struct CaseDetailResponse {
    #[serde(rename = "case")]
    pub case: Case,
    pub notes: Vec<CaseNote>,
    pub deadlines: Vec<Deadline>,
    pub documents: Vec<DocumentResponse>,
}

/// GET /api/cases/:id
pub async fn get_case(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<CaseDetailResponse>, ApiError> {
    let case = find_owned_case(&state, &id, &current.user.id).await?;

    let notes: Vec<CaseNote> =
        sqlx::query_as("SELECT * FROM case_notes WHERE case_id = ? ORDER BY created_at DESC")
            .bind(&case.id)
            .fetch_all(&state.db)
            .await?;

    let deadlines: Vec<Deadline> =
        sqlx::query_as("SELECT * FROM deadlines WHERE case_id = ? ORDER BY due_date ASC")
            .bind(&case.id)
            .fetch_all(&state.db)
            .await?;

    let documents: Vec<Document> =
        sqlx::query_as("SELECT * FROM documents WHERE case_id = ? ORDER BY uploaded_at DESC")
            .bind(&case.id)
            .fetch_all(&state.db)
            .await?;

    Ok(Json(CaseDetailResponse {
        case,
        notes,
        deadlines,
        documents: documents.into_iter().map(DocumentResponse::from).collect(),
    }))
}

fn validate_create_request(req: &CreateCaseRequest) -> Result<CaseType, ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    if let Err(e) = validate_required_text(&req.title, "Title", 200) {
        errors.add("title", e);
    }
    if let Err(e) = validate_required_text(&req.client_name, "Client name", 200) {
        errors.add("clientName", e);
    }
    let case_type = match validate_case_type(&req.case_type) {
        Ok(t) => Some(t),
        Err(e) => {
            errors.add("caseType", e);
            None
        }
    };
    if let Some(ref priority) = req.priority {
        if let Err(e) = validate_priority(priority) {
            errors.add("priority", e);
        }
    }
    if let Some(ref email) = req.client_email {
        if !email.is_empty() {
            if let Err(e) = validate_email(email) {
                errors.add("clientEmail", e);
            }
        }
    }
    if let Some(ref incident) = req.incident_date {
        if let Err(e) = validate_date(incident, "incidentDate") {
            errors.add("incidentDate", e);
        }
    }

    errors.finish()?;
    Ok(case_type.expect("case_type validated above"))
}

#[derive(Debug, Serialize)]
pub struct CaseResponse {
    pub message: String,
    #[serde(rename = "case")]
    pub case: Case,
}

/// POST /api/cases
pub async fn create_case(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<CreateCaseRequest>,
) -> Result<(StatusCode, Json<CaseResponse>), ApiError> {
    let case_type = validate_create_request(&req)?;

    let statute = req
        .incident_date
        .as_deref()
        .map(|d| validate_date(d, "incidentDate"))
        .transpose()
        .map_err(|e| ApiError::validation_field("incidentDate", e))?
        .map(|d| statute_of_limitations(d).format("%Y-%m-%d").to_string());

    let id = Uuid::new_v4().to_string();
    let priority = req.priority.clone().unwrap_or_else(|| "medium".to_string());
    let now = chrono::Utc::now().to_rfc3339();

    // The random three-digit suffix can collide; the UNIQUE constraint
    // catches it and we retry with a fresh suffix.
    let mut attempts = 0;
    loop {
        let case_number = generate_case_number(case_type);
        let result = sqlx::query(
            "INSERT INTO cases (id, case_number, user_id, title, client_name, client_email, \
             client_phone, case_type, status, priority, description, incident_date, \
             statute_of_limitations, insurance_company, insurance_adjuster, claim_number, \
             created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'open', ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&case_number)
        .bind(&current.user.id)
        .bind(&req.title)
        .bind(&req.client_name)
        .bind(&req.client_email)
        .bind(&req.client_phone)
        .bind(case_type.to_string())
        .bind(&priority)
        .bind(&req.description)
        .bind(&req.incident_date)
        .bind(&statute)
        .bind(&req.insurance_company)
        .bind(&req.insurance_adjuster)
        .bind(&req.claim_number)
        .bind(&now)
        .bind(&now)
        .execute(&state.db)
        .await;

        match result {
            Ok(_) => break,
            Err(e)
                if e.to_string()
                    .contains("UNIQUE constraint failed: cases.case_number")
                    && attempts < CASE_NUMBER_ATTEMPTS =>
            {
                attempts += 1;
                tracing::debug!(case_number = %case_number, attempts, "Case number collision, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let case: Case = sqlx::query_as("SELECT * FROM cases WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(case_id = %id, case_number = %case.case_number, "Case created");

    Ok((
        StatusCode::CREATED,
        Json(CaseResponse {
            message: "Case created".to_string(),
            case,
        }),
    ))
}

/// PUT /api/cases/:id
///
/// Partial update against the fixed allow-list above. Unknown keys fail
/// validation rather than being dropped, so a typo never silently loses a
/// write.
pub async fn update_case(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<CaseResponse>, ApiError> {
    let object = body
        .as_object()
        .ok_or_else(|| ApiError::validation_field("body", "Expected a JSON object"))?;

    let mut errors = ValidationErrorBuilder::new();
    let mut updates: Vec<(&'static str, &serde_json::Value)> = Vec::new();

    for (key, value) in object {
        let Some(&(field, column)) = UPDATABLE_CASE_FIELDS
            .iter()
            .find(|(field, _)| *field == key.as_str())
        else {
            errors.add(key.clone(), "Unknown field");
            continue;
        };

        match field {
            "title" | "clientName" => match value.as_str() {
                Some(s) => {
                    let label = if field == "title" { "Title" } else { "Client name" };
                    if let Err(e) = validate_required_text(s, label, 200) {
                        errors.add(field, e);
                    }
                }
                None => {
                    errors.add(field, "Must be a string");
                }
            },
            "status" => match value.as_str().map(validate_case_status) {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    errors.add(field, e);
                }
                None => {
                    errors.add(field, "Must be a string");
                }
            },
            "priority" => match value.as_str().map(validate_priority) {
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    errors.add(field, e);
                }
                None => {
                    errors.add(field, "Must be a string");
                }
            },
            "clientEmail" => {
                if let Some(s) = value.as_str() {
                    if !s.is_empty() {
                        if let Err(e) = validate_email(s) {
                            errors.add(field, e);
                        }
                    }
                } else if !value.is_null() {
                    errors.add(field, "Must be a string or null");
                }
            }
            "incidentDate" => {
                if let Some(s) = value.as_str() {
                    if let Err(e) = validate_date(s, "incidentDate") {
                        errors.add(field, e);
                    }
                } else if !value.is_null() {
                    errors.add(field, "Must be a date string or null");
                }
            }
            "settlementAmount" => match value {
                serde_json::Value::Null => {}
                v if v.as_f64().map(|n| n >= 0.0).unwrap_or(false) => {}
                _ => {
                    errors.add(field, "Must be a non-negative number or null");
                }
            },
            // Remaining fields are free-text, nullable
            _ => {
                if !value.is_string() && !value.is_null() {
                    errors.add(field, "Must be a string or null");
                }
            }
        }

        updates.push((column, value));
    }

    errors.finish()?;

    if updates.is_empty() {
        return Err(ApiError::validation_field(
            "body",
            "No updatable fields supplied",
        ));
    }

    // Ownership check before any write
    find_owned_case(&state, &id, &current.user.id).await?;

    let set_clause: Vec<String> = updates
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .collect();
    let sql = format!(
        "UPDATE cases SET {}, updated_at = ? WHERE id = ? AND user_id = ?",
        set_clause.join(", ")
    );

    let now = chrono::Utc::now().to_rfc3339();
    let mut query = sqlx::query(&sql);
    for (column, value) in &updates {
        query = if *column == "settlement_amount" {
            query.bind(value.as_f64())
        } else {
            query.bind(value.as_str().map(|s| s.to_string()))
        };
    }
    query
        .bind(&now)
        .bind(&id)
        .bind(&current.user.id)
        .execute(&state.db)
        .await?;

    let case: Case = sqlx::query_as("SELECT * FROM cases WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(CaseResponse {
        message: "Case updated".to_string(),
        case,
    }))
}

/// DELETE /api/cases/:id
///
/// The row delete cascades to notes, deadlines and document rows; the
/// uploaded files are not covered by the cascade and are removed here as
/// an explicit compensating step. A file already gone is logged, never an
/// error.
pub async fn delete_case(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let case = find_owned_case(&state, &id, &current.user.id).await?;

    let file_paths: Vec<(String,)> =
        sqlx::query_as("SELECT file_path FROM documents WHERE case_id = ?")
            .bind(&case.id)
            .fetch_all(&state.db)
            .await?;

    sqlx::query("DELETE FROM cases WHERE id = ? AND user_id = ?")
        .bind(&case.id)
        .bind(&current.user.id)
        .execute(&state.db)
        .await?;

    for (path,) in &file_paths {
        state.file_store.remove(path).await;
    }

    tracing::info!(case_id = %case.id, files = file_paths.len(), "Case deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub message: String,
    pub note: CaseNote,
}

/// POST /api/cases/:id/notes
pub async fn add_note(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<NoteResponse>), ApiError> {
    let case = find_owned_case(&state, &id, &current.user.id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&req.note, "Note", 10_000) {
        errors.add("note", e);
    }
    if let Some(ref note_type) = req.note_type {
        if let Err(e) = validate_note_type(note_type) {
            errors.add("noteType", e);
        }
    }
    errors.finish()?;

    let note_id = Uuid::new_v4().to_string();
    let note_type = req.note_type.clone().unwrap_or_else(|| "general".to_string());
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO case_notes (id, case_id, user_id, note, note_type, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&note_id)
    .bind(&case.id)
    .bind(&current.user.id)
    .bind(&req.note)
    .bind(&note_type)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let note: CaseNote = sqlx::query_as("SELECT * FROM case_notes WHERE id = ?")
        .bind(&note_id)
        .fetch_one(&state.db)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(NoteResponse {
            message: "Note added".to_string(),
            note,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct DeadlineResponse {
    pub message: String,
    pub deadline: Deadline,
}

/// POST /api/cases/:id/deadlines
pub async fn add_deadline(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreateDeadlineRequest>,
) -> Result<(StatusCode, Json<DeadlineResponse>), ApiError> {
    let case = find_owned_case(&state, &id, &current.user.id).await?;

    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_required_text(&req.title, "Title", 200) {
        errors.add("title", e);
    }
    if let Err(e) = validate_due_date(&req.due_date, "Due date") {
        errors.add("dueDate", e);
    }
    if let Some(ref priority) = req.priority {
        if let Err(e) = validate_priority(priority) {
            errors.add("priority", e);
        }
    }
    errors.finish()?;

    let deadline_id = Uuid::new_v4().to_string();
    let priority = req.priority.clone().unwrap_or_else(|| "medium".to_string());
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO deadlines (id, case_id, user_id, title, description, due_date, priority, \
         status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
    )
    .bind(&deadline_id)
    .bind(&case.id)
    .bind(&current.user.id)
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.due_date)
    .bind(&priority)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let deadline: Deadline = sqlx::query_as("SELECT * FROM deadlines WHERE id = ?")
        .bind(&deadline_id)
        .fetch_one(&state.db)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(DeadlineResponse {
            message: "Deadline added".to_string(),
            deadline,
        }),
    ))
}

/// GET /api/cases/stats/overview
pub async fn case_stats(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<CaseStatsResponse>, ApiError> {
    let (total_cases,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM cases WHERE user_id = ?")
        .bind(&current.user.id)
        .fetch_one(&state.db)
        .await?;

    let by_status: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM cases WHERE user_id = ? GROUP BY status",
    )
    .bind(&current.user.id)
    .fetch_all(&state.db)
    .await?;

    let (total_settlements, average_settlement): (f64, f64) = sqlx::query_as(
        "SELECT COALESCE(SUM(settlement_amount), 0.0), COALESCE(AVG(settlement_amount), 0.0) \
         FROM cases WHERE user_id = ? AND settlement_amount IS NOT NULL",
    )
    .bind(&current.user.id)
    .fetch_one(&state.db)
    .await?;

    let recent_cases: Vec<Case> = sqlx::query_as(
        "SELECT * FROM cases WHERE user_id = ? ORDER BY created_at DESC LIMIT 5",
    )
    .bind(&current.user.id)
    .fetch_all(&state.db)
    .await?;

    let upcoming_deadlines: Vec<Deadline> = sqlx::query_as(
        "SELECT * FROM deadlines WHERE user_id = ? AND status = 'pending' \
         AND datetime(due_date) >= datetime('now') ORDER BY due_date ASC LIMIT 5",
    )
    .bind(&current.user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(CaseStatsResponse {
        total_cases,
        by_status: by_status
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect(),
        total_settlements,
        average_settlement,
        recent_cases,
        upcoming_deadlines,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::test_util::{register_user, test_state};
    use serde_json::json;

    fn create_request(title: &str, client: &str) -> CreateCaseRequest {
        CreateCaseRequest {
            title: title.to_string(),
            client_name: client.to_string(),
            client_email: None,
            client_phone: None,
            case_type: "auto_accident".to_string(),
            priority: None,
            description: None,
            incident_date: None,
            insurance_company: None,
            insurance_adjuster: None,
            claim_number: None,
        }
    }

    #[test]
    fn test_statute_of_limitations_plus_two_years() {
        let incident = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(
            statute_of_limitations(incident),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_statute_of_limitations_leap_day() {
        let incident = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(
            statute_of_limitations(incident),
            NaiveDate::from_ymd_opt(2026, 2, 28).unwrap()
        );
    }

    #[test]
    fn test_case_number_shape() {
        let number = generate_case_number(CaseType::AutoAccident);
        let year = chrono::Utc::now().year();
        let re = regex::Regex::new(&format!("^AA-{}-[0-9]{{3}}$", year)).unwrap();
        assert!(re.is_match(&number), "unexpected case number: {number}");
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("smith"), "%smith%");
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
    }

    #[tokio::test]
    async fn test_create_case_computes_statute() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;

        let mut req = create_request("Smith v. Jones", "John Smith");
        req.incident_date = Some("2024-01-15".to_string());

        let (status, Json(created)) =
            create_case(State(state.clone()), current, Json(req)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.case.status, "open");
        assert_eq!(created.case.priority, "medium");
        assert_eq!(
            created.case.statute_of_limitations.as_deref(),
            Some("2026-01-15")
        );
        assert!(created.case.case_number.starts_with("AA-"));
    }

    #[tokio::test]
    async fn test_create_case_requires_fields() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;

        let mut req = create_request("", "");
        req.case_type = "divorce".to_string();

        let err = create_case(State(state.clone()), current, Json(req))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_ownership_scoping_hides_other_users_cases() {
        let state = test_state().await;
        let owner = register_user(&state, "owner@b.example").await;
        let intruder = register_user(&state, "intruder@b.example").await;

        let (_, Json(created)) = create_case(
            State(state.clone()),
            owner.clone(),
            Json(create_request("Smith v. Jones", "John Smith")),
        )
        .await
        .unwrap();
        let case_id = created.case.id.clone();

        // Owner sees it
        assert!(get_case(State(state.clone()), owner.clone(), Path(case_id.clone()))
            .await
            .is_ok());

        // Intruder gets the same not_found as a nonexistent id
        let err = get_case(State(state.clone()), intruder.clone(), Path(case_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = update_case(
            State(state.clone()),
            intruder.clone(),
            Path(case_id.clone()),
            Json(json!({"title": "Hijacked"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = delete_case(State(state.clone()), intruder.clone(), Path(case_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = add_note(
            State(state.clone()),
            intruder,
            Path(case_id),
            Json(CreateNoteRequest {
                note: "spy note".to_string(),
                note_type: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;

        for i in 0..15 {
            let client = if i < 12 { format!("Smith {i}") } else { format!("Brown {i}") };
            create_case(
                State(state.clone()),
                current.clone(),
                Json(create_request(&format!("Case {i}"), &client)),
            )
            .await
            .unwrap();
        }

        let Json(page2) = list_cases(
            State(state.clone()),
            current.clone(),
            Query(ListCasesQuery {
                page: Some(2),
                limit: Some(10),
                status: Some("open".to_string()),
                priority: None,
                search: Some("smith".to_string()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(page2.pagination.total, 12);
        assert_eq!(page2.pagination.pages, 2);
        assert_eq!(page2.cases.len(), 2);
        for case in &page2.cases {
            assert!(case.client_name.to_lowercase().contains("smith"));
            assert_eq!(case.status, "open");
        }
    }

    #[tokio::test]
    async fn test_list_rejects_unknown_status() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;

        let err = list_cases(
            State(state.clone()),
            current,
            Query(ListCasesQuery {
                page: None,
                limit: None,
                status: Some("archived".to_string()),
                priority: None,
                search: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_update_rejects_unknown_keys() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let (_, Json(created)) = create_case(
            State(state.clone()),
            current.clone(),
            Json(create_request("Smith v. Jones", "John Smith")),
        )
        .await
        .unwrap();

        let err = update_case(
            State(state.clone()),
            current.clone(),
            Path(created.case.id.clone()),
            Json(json!({"title": "New title", "userId": "someone-else"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        // The valid key in the same request must not have been applied
        let Json(detail) = get_case(
            State(state.clone()),
            current,
            Path(created.case.id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(detail.case.title, "Smith v. Jones");
    }

    #[tokio::test]
    async fn test_update_touches_only_supplied_fields() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let (_, Json(created)) = create_case(
            State(state.clone()),
            current.clone(),
            Json(create_request("Smith v. Jones", "John Smith")),
        )
        .await
        .unwrap();

        let Json(updated) = update_case(
            State(state.clone()),
            current.clone(),
            Path(created.case.id.clone()),
            Json(json!({"status": "settled", "settlementAmount": 25000.0})),
        )
        .await
        .unwrap();

        assert_eq!(updated.case.status, "settled");
        assert_eq!(updated.case.settlement_amount, Some(25000.0));
        assert_eq!(updated.case.title, "Smith v. Jones");
        assert_eq!(updated.case.case_number, created.case.case_number);
        assert!(updated.case.updated_at >= created.case.updated_at);
    }

    #[tokio::test]
    async fn test_update_rejects_bad_enum_value() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let (_, Json(created)) = create_case(
            State(state.clone()),
            current.clone(),
            Json(create_request("Smith v. Jones", "John Smith")),
        )
        .await
        .unwrap();

        let err = update_case(
            State(state.clone()),
            current,
            Path(created.case.id),
            Json(json!({"status": "archived"})),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_delete_cascades_sub_resources() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let (_, Json(created)) = create_case(
            State(state.clone()),
            current.clone(),
            Json(create_request("Smith v. Jones", "John Smith")),
        )
        .await
        .unwrap();
        let case_id = created.case.id.clone();

        add_note(
            State(state.clone()),
            current.clone(),
            Path(case_id.clone()),
            Json(CreateNoteRequest {
                note: "Initial consult".to_string(),
                note_type: Some("client_communication".to_string()),
            }),
        )
        .await
        .unwrap();
        add_deadline(
            State(state.clone()),
            current.clone(),
            Path(case_id.clone()),
            Json(CreateDeadlineRequest {
                title: "File answer".to_string(),
                description: None,
                due_date: "2027-03-01T09:00:00Z".to_string(),
                priority: Some("high".to_string()),
            }),
        )
        .await
        .unwrap();

        let status = delete_case(State(state.clone()), current.clone(), Path(case_id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (notes,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM case_notes")
            .fetch_one(&state.db)
            .await
            .unwrap();
        let (deadlines,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM deadlines")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(notes, 0);
        assert_eq!(deadlines, 0);
    }

    #[tokio::test]
    async fn test_add_deadline_rejects_unparsable_due_date() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let (_, Json(created)) = create_case(
            State(state.clone()),
            current.clone(),
            Json(create_request("Smith v. Jones", "John Smith")),
        )
        .await
        .unwrap();

        let err = add_deadline(
            State(state.clone()),
            current.clone(),
            Path(created.case.id.clone()),
            Json(CreateDeadlineRequest {
                title: "File answer".to_string(),
                description: None,
                due_date: "next tuesday".to_string(),
                priority: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        // A plain calendar date is accepted alongside full timestamps.
        add_deadline(
            State(state.clone()),
            current,
            Path(created.case.id),
            Json(CreateDeadlineRequest {
                title: "File answer".to_string(),
                description: None,
                due_date: "2027-03-01".to_string(),
                priority: None,
            }),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stats_scoped_to_caller() {
        let state = test_state().await;
        let a = register_user(&state, "a@b.example").await;
        let b = register_user(&state, "b@b.example").await;

        for _ in 0..3 {
            create_case(
                State(state.clone()),
                a.clone(),
                Json(create_request("Case", "Smith")),
            )
            .await
            .unwrap();
        }
        let (_, Json(created)) = create_case(
            State(state.clone()),
            a.clone(),
            Json(create_request("Settled case", "Smith")),
        )
        .await
        .unwrap();
        update_case(
            State(state.clone()),
            a.clone(),
            Path(created.case.id),
            Json(json!({"status": "settled", "settlementAmount": 10000.0})),
        )
        .await
        .unwrap();

        let Json(stats_a) = case_stats(State(state.clone()), a).await.unwrap();
        assert_eq!(stats_a.total_cases, 4);
        assert_eq!(stats_a.total_settlements, 10000.0);
        assert_eq!(stats_a.average_settlement, 10000.0);
        assert_eq!(stats_a.recent_cases.len(), 4);

        let Json(stats_b) = case_stats(State(state.clone()), b).await.unwrap();
        assert_eq!(stats_b.total_cases, 0);
    }
}
