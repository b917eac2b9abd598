//! Request validation and sanitization.

use super::error::ApiError;
use crate::auth::models::Role;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Trim and HTML-escape free text before it is stored.
pub fn sanitize(input: &str) -> String {
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// A required free-text field: non-blank, returned sanitized.
pub fn required_text(field: &str, value: &str) -> Result<String, ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(sanitize(value))
}

/// Minimal address shape check: `local@domain.tld`, no whitespace or markup.
pub fn email(value: &str) -> Result<String, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request("email is required"));
    }

    let invalid = || ApiError::bad_request("email is not a valid address");
    if value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '\'' | '&' | ',' | ';'))
    {
        return Err(invalid());
    }

    let (local, domain) = value.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|label| label.is_empty()) {
        return Err(invalid());
    }

    Ok(value.to_string())
}

pub fn password(value: &str) -> Result<(), ApiError> {
    if value.is_empty() {
        return Err(ApiError::bad_request("password is required"));
    }
    if value.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn role(value: &str) -> Result<Role, ApiError> {
    value
        .parse::<Role>()
        .map_err(|e| ApiError::bad_request(e.to_string()))
}
