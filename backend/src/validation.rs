//! Input validation for the workflow engine
//!
//! Rejection reasons and uploaded files are checked here before anything is
//! written. Failures accumulate into [`WorkflowError::ValidationFailed`] so a
//! caller sees every problem at once.

use std::collections::HashMap;
use std::path::Path;

use dossierflow_shared::DocumentType;

use crate::workflow::WorkflowError;

pub type ValidationResult<T> = Result<T, WorkflowError>;

/// Minimum number of printable characters in a rejection reason.
pub const MIN_REASON_CHARS: usize = 10;

/// Upper bound on rejection reasons; longer input is refused, not truncated.
pub const MAX_REASON_CHARS: usize = 2000;

/// Rejection reason rules
pub mod reason {
    use super::*;

    /// Validate and normalize a rejection reason.
    ///
    /// Control characters are dropped and surrounding whitespace is trimmed;
    /// what remains must hold at least [`MIN_REASON_CHARS`] characters.
    pub fn validate(raw: &str) -> ValidationResult<String> {
        let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
        let cleaned = cleaned.trim().to_string();
        let count = cleaned.chars().count();

        Validator::new()
            .error_if(
                count < MIN_REASON_CHARS,
                "reason",
                &format!("reason must be at least {} printable characters", MIN_REASON_CHARS),
            )
            .error_if(
                count > MAX_REASON_CHARS,
                "reason",
                &format!("reason must be {} characters or less", MAX_REASON_CHARS),
            )
            .finish()?;

        Ok(cleaned)
    }
}

/// Upload checks against a document type
pub mod upload {
    use super::*;

    /// MIME type a file extension is expected to carry, if we know it.
    pub fn mime_for_extension(extension: &str) -> Option<mime::Mime> {
        let parsed = match extension {
            "pdf" => return Some(mime::APPLICATION_PDF),
            "png" => return Some(mime::IMAGE_PNG),
            "jpg" | "jpeg" => return Some(mime::IMAGE_JPEG),
            "gif" => return Some(mime::IMAGE_GIF),
            "txt" => return Some(mime::TEXT_PLAIN),
            "csv" => return Some(mime::TEXT_CSV),
            "doc" => "application/msword".parse(),
            "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document".parse(),
            "xls" => "application/vnd.ms-excel".parse(),
            "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet".parse(),
            "odt" => "application/vnd.oasis.opendocument.text".parse(),
            _ => return None,
        };
        parsed.ok()
    }

    /// Lowercased extension of `filename`, without the dot.
    pub fn extension(filename: &str) -> Option<String> {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    /// Check a file against `document_type` and resolve the MIME type that
    /// gets recorded on the version.
    ///
    /// A generic `application/octet-stream` declaration is replaced by the
    /// type implied by the extension. A specific declaration that contradicts
    /// the extension is refused.
    pub fn validate(
        document_type: &DocumentType,
        filename: &str,
        content_type: &str,
        size: usize,
    ) -> ValidationResult<String> {
        let ext = extension(filename);
        let expected = ext.as_deref().and_then(mime_for_extension);

        let mut validator = Validator::new()
            .error_if(filename.trim().is_empty(), "filename", "filename is required")
            .error_if(size == 0, "file", "File is empty")
            .error_if(
                size as u64 > document_type.max_size_bytes.max(0) as u64,
                "file",
                &format!(
                    "FileTooLarge: {} bytes exceeds the {} byte limit for {}",
                    size, document_type.max_size_bytes, document_type.code
                ),
            );

        if !document_type.allowed_extensions.is_empty() {
            let allowed = ext.as_ref().is_some_and(|ext| {
                document_type
                    .allowed_extensions
                    .iter()
                    .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
            });
            validator = validator.error_if(
                !allowed,
                "file",
                &format!(
                    "UnsupportedMimeType: .{} is not accepted for {} (allowed: {})",
                    ext.as_deref().unwrap_or(""),
                    document_type.code,
                    document_type.allowed_extensions.join(", ")
                ),
            );
        }

        let resolved = match content_type.trim().parse::<mime::Mime>() {
            Ok(declared) if declared == mime::APPLICATION_OCTET_STREAM => {
                expected.unwrap_or(declared).essence_str().to_string()
            }
            Ok(declared) => {
                if let Some(expected) = &expected {
                    validator = validator.error_if(
                        expected.essence_str() != declared.essence_str(),
                        "file",
                        &format!(
                            "UnsupportedMimeType: {} does not match a .{} file",
                            declared.essence_str(),
                            ext.as_deref().unwrap_or("")
                        ),
                    );
                }
                declared.essence_str().to_string()
            }
            Err(_) => {
                validator = validator.error(
                    "file",
                    &format!("UnsupportedMimeType: '{}' is not a valid content type", content_type),
                );
                String::new()
            }
        };

        validator.finish()?;
        Ok(resolved)
    }
}

/// Accumulates field errors and turns them into a single
/// [`WorkflowError::ValidationFailed`].
#[derive(Debug, Default)]
pub struct Validator {
    details: HashMap<String, Vec<String>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add error for a field
    pub fn error(mut self, field: &str, message: &str) -> Self {
        self.details
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
        self
    }

    /// Add error if condition is true
    pub fn error_if(self, condition: bool, field: &str, message: &str) -> Self {
        if condition {
            self.error(field, message)
        } else {
            self
        }
    }

    /// Finish validation, returning error if any
    pub fn finish(self) -> ValidationResult<()> {
        if self.details.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::ValidationFailed { details: self.details })
        }
    }
}
