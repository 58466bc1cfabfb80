use regex::Regex;
use crate::errors::{AppError, AppResult};

/// Largest batch a single pipeline run accepts.
pub const MAX_BATCH_SIZE: usize = 10;

/// MIME types the upload endpoint accepts.
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/jpg", "image/png"];

pub struct InputValidator;

impl InputValidator {
    pub fn validate_batch_size(count: usize) -> AppResult<()> {
        if count == 0 {
            return Err(AppError::input("no images selected"));
        }

        if count > MAX_BATCH_SIZE {
            return Err(AppError::input("batch too large"));
        }

        Ok(())
    }

    pub fn validate_mime_type(mime_type: &str) -> AppResult<()> {
        let normalized = mime_type.trim().to_lowercase();
        if ALLOWED_MIME_TYPES.contains(&normalized.as_str()) {
            Ok(())
        } else {
            Err(AppError::validation(
                "mime_type",
                &format!("{} is not an accepted image type", mime_type),
            ))
        }
    }

    pub fn validate_category(category: &str) -> AppResult<()> {
        let trimmed = category.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("category", "Category cannot be empty"));
        }

        if trimmed.len() > 64 {
            return Err(AppError::validation("category", "Category too long (max 64 characters)"));
        }

        let safe_chars = Regex::new(r"^[a-zA-Z0-9\s\-_]+$")
            .map_err(|e| AppError::Config(e.to_string()))?;
        if !safe_chars.is_match(trimmed) {
            return Err(AppError::validation("category", "Category contains invalid characters"));
        }

        Ok(())
    }

    pub fn validate_user_id(user_id: &str) -> AppResult<()> {
        if user_id.trim().is_empty() {
            return Err(AppError::auth("no user in session"));
        }
        Ok(())
    }

    pub fn validate_base_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("api_base_url", "Base URL cannot be empty"));
        }

        let pattern = Regex::new(r"^https?://[^\s/?#]+(/[^\s?#]*)?$")
            .map_err(|e| AppError::Config(e.to_string()))?;
        if !pattern.is_match(trimmed) {
            return Err(AppError::validation("api_base_url", "Must be an http(s) URL"));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        // Strip anything that would break a multipart file name
        let sanitized = match Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#) {
            Ok(unsafe_chars) => unsafe_chars.replace_all(filename.trim(), "_").to_string(),
            Err(_) => filename.trim().to_string(),
        };

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else if sanitized.is_empty() {
            "image".to_string()
        } else {
            sanitized
        }
    }
}
