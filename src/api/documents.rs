//! Document upload, download and delete.
//!
//! Uploads are case-scoped: the multipart body is parsed and validated
//! fully before anything touches disk, and the owning case is verified
//! before the file write. The insert order is file first, row second,
//! with a compensating file delete if the row insert fails, so a row
//! never points at a file that was never written.

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_document_type, validate_uuid};
use crate::db::{Document, DocumentResponse};
use crate::storage::is_allowed_mime;
use crate::AppState;

/// A fully parsed upload, ready for validation and persistence
#[derive(Debug)]
struct DocumentUpload {
    original_filename: String,
    mime_type: String,
    data: Bytes,
    document_type: Option<String>,
    description: Option<String>,
}

/// Fetch a document only if it belongs to the caller. The user_id column
/// is denormalized from the owning case at upload time.
async fn find_owned_document(
    state: &AppState,
    document_id: &str,
    user_id: &str,
) -> Result<Document, ApiError> {
    validate_uuid(document_id, "document_id")
        .map_err(|e| ApiError::validation_field("document_id", e))?;

    sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ? AND user_id = ?")
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Document not found"))
}

async fn parse_multipart(multipart: &mut Multipart) -> Result<DocumentUpload, ApiError> {
    let mut original_filename = None;
    let mut mime_type = None;
    let mut data = None;
    let mut document_type = None;
    let mut description = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::validation_field("body", format!("Malformed multipart body: {}", e))
    })? {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("file") => {
                original_filename = field.file_name().map(|s| s.to_string());
                mime_type = field.content_type().map(|s| s.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::validation_field("file", format!("Failed to read upload: {}", e))
                })?;
                data = Some(bytes);
            }
            Some("documentType") => {
                document_type = Some(field.text().await.map_err(|e| {
                    ApiError::validation_field("documentType", format!("Unreadable field: {}", e))
                })?);
            }
            Some("description") => {
                description = Some(field.text().await.map_err(|e| {
                    ApiError::validation_field("description", format!("Unreadable field: {}", e))
                })?);
            }
            // Unknown parts are skipped, not rejected; browsers add
            // incidental fields to multipart forms
            _ => {}
        }
    }

    let data = data.ok_or_else(|| ApiError::validation_field("file", "A file part is required"))?;
    let original_filename =
        original_filename.unwrap_or_else(|| "unnamed".to_string());
    // Fall back to guessing from the filename when the part carries no
    // content type; the allow-list still gates the result.
    let mime_type = mime_type.unwrap_or_else(|| {
        mime_guess::from_path(&original_filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    Ok(DocumentUpload {
        original_filename,
        mime_type,
        data,
        document_type,
        description,
    })
}

/// Validate and persist an upload against an ownership-checked case
async fn store_document(
    state: &AppState,
    current: &CurrentUser,
    case_id: &str,
    upload: DocumentUpload,
) -> Result<Document, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if !is_allowed_mime(&upload.mime_type) {
        errors.add(
            "file",
            format!("File type {} is not allowed", upload.mime_type),
        );
    }
    let max_bytes = state.file_store.max_upload_bytes();
    if upload.data.len() as u64 > max_bytes {
        errors.add(
            "file",
            format!("File exceeds the maximum size of {} bytes", max_bytes),
        );
    }
    if upload.data.is_empty() {
        errors.add("file", "Uploaded file is empty");
    }
    if let Some(ref doc_type) = upload.document_type {
        if let Err(e) = validate_document_type(doc_type) {
            errors.add("documentType", e);
        }
    }
    errors.finish()?;

    // Ownership before any disk write
    validate_uuid(case_id, "case_id")
        .map_err(|e| ApiError::validation_field("case_id", e))?;
    let case: Option<(String,)> =
        sqlx::query_as("SELECT id FROM cases WHERE id = ? AND user_id = ?")
            .bind(case_id)
            .bind(&current.user.id)
            .fetch_optional(&state.db)
            .await?;
    case.ok_or_else(|| ApiError::not_found("Case not found"))?;

    let stored_filename = state.file_store.generate_stored_filename(&upload.mime_type);
    let file_path = state
        .file_store
        .write(&stored_filename, &upload.data)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to write uploaded file");
            ApiError::internal("Failed to store the uploaded file")
        })?;

    let id = Uuid::new_v4().to_string();
    let document_type = upload
        .document_type
        .unwrap_or_else(|| "other".to_string());
    let now = chrono::Utc::now().to_rfc3339();

    let inserted = sqlx::query(
        "INSERT INTO documents (id, case_id, user_id, stored_filename, original_filename, \
         file_path, file_size, mime_type, document_type, description, uploaded_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(case_id)
    .bind(&current.user.id)
    .bind(&stored_filename)
    .bind(&upload.original_filename)
    .bind(&file_path)
    .bind(upload.data.len() as i64)
    .bind(&upload.mime_type)
    .bind(&document_type)
    .bind(&upload.description)
    .bind(&now)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        // The file is already on disk; remove it so nothing orphaned
        // remains.
        state.file_store.remove(&file_path).await;
        return Err(e.into());
    }

    let document: Document = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(
        document_id = %id,
        case_id,
        size = document.file_size,
        mime = %document.mime_type,
        "Document uploaded"
    );

    Ok(document)
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub document: DocumentResponse,
}

/// POST /api/documents/upload/:caseId
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(case_id): Path<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let upload = parse_multipart(&mut multipart).await?;
    let document = store_document(&state, &current, &case_id, upload).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Document uploaded".to_string(),
            document: DocumentResponse::from(document),
        }),
    ))
}

/// Content-Disposition filename: strip quotes and control characters so
/// the header cannot be broken out of
fn disposition_filename(original: &str) -> String {
    original
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect()
}

/// GET /api/documents/download/:documentId
pub async fn download_document(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(document_id): Path<String>,
) -> Result<Response, ApiError> {
    let document = find_owned_document(&state, &document_id, &current.user.id).await?;

    let path = state.file_store.absolute_path(&document.file_path);
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        // A row without its file means the store and the database have
        // diverged; surface as not found but leave a trace for the
        // operator.
        tracing::warn!(
            document_id = %document.id,
            path = %path.display(),
            error = %e,
            "Document row has no backing file"
        );
        ApiError::not_found("Document file not found")
    })?;

    let stream = ReaderStream::new(file);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, document.mime_type.as_str())
        .header(header::CONTENT_LENGTH, document.file_size)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                disposition_filename(&document.original_filename)
            ),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build download response");
            ApiError::internal("Failed to stream document")
        })?;

    Ok(response)
}

/// DELETE /api/documents/:documentId
///
/// The disk delete runs first and is idempotent; the row delete follows
/// so a crash in between leaves a row pointing at a missing file, which
/// download already reports as not found.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Path(document_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let document = find_owned_document(&state, &document_id, &current.user.id).await?;

    state.file_store.remove(&document.file_path).await;

    sqlx::query("DELETE FROM documents WHERE id = ? AND user_id = ?")
        .bind(&document.id)
        .bind(&current.user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(document_id = %document.id, "Document deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::test_util::{register_user, test_state};

    async fn make_case(state: &AppState, user_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let number = format!("PI-2026-{}", &id[..3]);
        sqlx::query(
            "INSERT INTO cases (id, case_number, user_id, title, client_name, case_type) \
             VALUES (?, ?, ?, 'Smith v. Jones', 'John Smith', 'personal_injury')",
        )
        .bind(&id)
        .bind(&number)
        .bind(user_id)
        .execute(&state.db)
        .await
        .unwrap();
        id
    }

    fn pdf_upload(data: &[u8]) -> DocumentUpload {
        DocumentUpload {
            original_filename: "deposition.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            data: Bytes::copy_from_slice(data),
            document_type: Some("evidence".to_string()),
            description: None,
        }
    }

    #[test]
    fn test_disposition_filename_strips_header_breakers() {
        assert_eq!(disposition_filename("report.pdf"), "report.pdf");
        assert_eq!(disposition_filename("a\"b\r\n.pdf"), "ab.pdf");
    }

    #[tokio::test]
    async fn test_store_rejects_disallowed_mime() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let case_id = make_case(&state, &current.user.id).await;

        let mut upload = pdf_upload(b"MZ");
        upload.mime_type = "application/x-msdownload".to_string();

        let err = store_document(&state, &current, &case_id, upload)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);
    }

    #[tokio::test]
    async fn test_store_rejects_oversize_before_persisting() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let case_id = make_case(&state, &current.user.id).await;

        let too_big = vec![0u8; state.file_store.max_upload_bytes() as usize + 1];
        let err = store_document(&state, &current, &case_id, pdf_upload(&too_big))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationFailed);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_store_rejects_foreign_case() {
        let state = test_state().await;
        let owner = register_user(&state, "owner@b.example").await;
        let intruder = register_user(&state, "intruder@b.example").await;
        let case_id = make_case(&state, &owner.user.id).await;

        let err = store_document(&state, &intruder, &case_id, pdf_upload(b"%PDF-1.4"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_upload_then_download_roundtrip() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let case_id = make_case(&state, &current.user.id).await;

        let document = store_document(&state, &current, &case_id, pdf_upload(b"%PDF-1.4 body"))
            .await
            .unwrap();
        assert_ne!(document.stored_filename, "deposition.pdf");
        assert!(document.stored_filename.ends_with(".pdf"));
        assert!(state.file_store.exists(&document.file_path).await);

        let response = download_document(
            State(state.clone()),
            current.clone(),
            Path(document.id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/pdf"
        );
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(disposition.contains("deposition.pdf"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"%PDF-1.4 body");
    }

    #[tokio::test]
    async fn test_download_hides_foreign_documents() {
        let state = test_state().await;
        let owner = register_user(&state, "owner@b.example").await;
        let intruder = register_user(&state, "intruder@b.example").await;
        let case_id = make_case(&state, &owner.user.id).await;

        let document = store_document(&state, &owner, &case_id, pdf_upload(b"%PDF-1.4"))
            .await
            .unwrap();

        let err = download_document(State(state.clone()), intruder, Path(document.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_download_of_missing_file_is_not_found() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let case_id = make_case(&state, &current.user.id).await;

        let document = store_document(&state, &current, &case_id, pdf_upload(b"%PDF-1.4"))
            .await
            .unwrap();
        state.file_store.remove(&document.file_path).await;

        let err = download_document(State(state.clone()), current, Path(document.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_file() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let case_id = make_case(&state, &current.user.id).await;

        let document = store_document(&state, &current, &case_id, pdf_upload(b"%PDF-1.4"))
            .await
            .unwrap();

        let status = delete_document(
            State(state.clone()),
            current.clone(),
            Path(document.id.clone()),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(!state.file_store.exists(&document.file_path).await);

        let err = download_document(State(state.clone()), current, Path(document.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_delete_tolerates_already_missing_file() {
        let state = test_state().await;
        let current = register_user(&state, "a@b.example").await;
        let case_id = make_case(&state, &current.user.id).await;

        let document = store_document(&state, &current, &case_id, pdf_upload(b"%PDF-1.4"))
            .await
            .unwrap();
        state.file_store.remove(&document.file_path).await;

        let status = delete_document(State(state.clone()), current, Path(document.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
