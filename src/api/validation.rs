//! Input validation for API requests.
//!
//! Validation happens at the route boundary, before any data access.
//! For collecting multiple validation errors and returning them as an
//! ApiError, use the `ValidationErrorBuilder` from the `error` module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;

use crate::db::{CaseStatus, CaseType, DocumentType, NoteType, Priority};

lazy_static! {
    /// Pragmatic email shape check; the unique constraint is the real
    /// identity guard
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Loose phone format: digits with optional separators and country code
    static ref PHONE_REGEX: Regex =
        Regex::new(r"^\+?[0-9][0-9 ().-]{5,19}$").unwrap();

    /// UUID v4 as produced for all row ids
    static ref UUID_REGEX: Regex = Regex::new(
        r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$"
    ).unwrap();
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

/// Validate a required free-text field such as a title or client name
pub fn validate_required_text(value: &str, label: &str, max_len: usize) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is required", label));
    }
    if value.len() > max_len {
        return Err(format!("{} is too long (max {} characters)", label, max_len));
    }
    Ok(())
}

pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    if let Some(p) = phone {
        if p.is_empty() {
            return Ok(());
        }
        if !PHONE_REGEX.is_match(p) {
            return Err("Invalid phone number format".to_string());
        }
    }
    Ok(())
}

pub fn validate_uuid(id: &str, label: &str) -> Result<(), String> {
    if !UUID_REGEX.is_match(id) {
        return Err(format!("Invalid {} format", label));
    }
    Ok(())
}

/// Validate a calendar date in YYYY-MM-DD form, returning the parsed date
pub fn validate_date(value: &str, label: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{} must be a date in YYYY-MM-DD format", label))
}

/// Validate a due date: an RFC 3339 timestamp or a plain calendar date.
/// Anything else would be stored but never compare correctly against
/// `datetime('now')` in the deadline queries.
pub fn validate_due_date(value: &str, label: &str) -> Result<(), String> {
    if chrono::DateTime::parse_from_rfc3339(value).is_ok() {
        return Ok(());
    }
    if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() {
        return Ok(());
    }
    Err(format!(
        "{} must be an RFC 3339 timestamp or a YYYY-MM-DD date",
        label
    ))
}

pub fn validate_case_type(value: &str) -> Result<CaseType, String> {
    CaseType::from_str(value)
}

pub fn validate_case_status(value: &str) -> Result<CaseStatus, String> {
    CaseStatus::from_str(value)
}

pub fn validate_priority(value: &str) -> Result<Priority, String> {
    Priority::from_str(value)
}

pub fn validate_note_type(value: &str) -> Result<NoteType, String> {
    NoteType::from_str(value)
}

pub fn validate_document_type(value: &str) -> Result<DocumentType, String> {
    DocumentType::from_str(value)
}
