use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A local image picked by the user for upload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub uri: String,
    pub mime_type: String,
    pub name: String,
}

impl UploadItem {
    pub fn new(uri: impl Into<String>, mime_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: mime_type.into(),
            name: name.into(),
        }
    }

    /// Build an item from a local path, deriving the display name and MIME type
    /// from the file name.
    pub fn from_path(path: &str) -> Self {
        let local = local_path(path);
        let name = Path::new(local)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let mime_type = match Path::new(local)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("webp") => "image/webp",
            Some("gif") => "image/gif",
            _ => "application/octet-stream",
        };

        Self::new(path, mime_type, name)
    }

    /// Filesystem path behind the item's URI.
    pub fn local_path(&self) -> &str {
        local_path(&self.uri)
    }
}

fn local_path(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

/// A successfully uploaded image, keyed to its position in the batch.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub index: usize,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Accepted,
    Rejected { urls: Vec<String> },
}

impl ClassificationOutcome {
    /// Drop repeated rejected URLs, keeping first-seen order. A rejection
    /// naming no URLs is treated the same as full acceptance.
    pub fn normalized(self) -> Self {
        match self {
            ClassificationOutcome::Accepted => ClassificationOutcome::Accepted,
            ClassificationOutcome::Rejected { urls } => {
                let mut seen = HashSet::new();
                let urls: Vec<String> = urls
                    .into_iter()
                    .filter(|url| seen.insert(url.clone()))
                    .collect();

                if urls.is_empty() {
                    ClassificationOutcome::Accepted
                } else {
                    ClassificationOutcome::Rejected { urls }
                }
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ManualAssignment {
    pub url: String,
    pub category: String,
}

impl ManualAssignment {
    pub fn new(url: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: category.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Uploading,
    Analyzing,
    Complete,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Phase::Uploading => "uploading",
            Phase::Analyzing => "analyzing",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Progress record observed by display code. `phase` is `None` before a run starts.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PipelineProgress {
    pub phase: Option<Phase>,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_detects_mime_type() {
        let item = UploadItem::from_path("/photos/Jacket.JPG");
        assert_eq!(item.mime_type, "image/jpeg");
        assert_eq!(item.name, "Jacket.JPG");

        let item = UploadItem::from_path("file:///photos/shoes.png");
        assert_eq!(item.mime_type, "image/png");
        assert_eq!(item.local_path(), "/photos/shoes.png");
        assert_eq!(item.uri, "file:///photos/shoes.png");
    }

    #[test]
    fn test_from_path_unknown_extension() {
        let item = UploadItem::from_path("notes.txt");
        assert_eq!(item.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_empty_rejection_normalizes_to_accepted() {
        let outcome = ClassificationOutcome::Rejected { urls: vec![] };
        assert_eq!(outcome.normalized(), ClassificationOutcome::Accepted);

        let outcome = ClassificationOutcome::Rejected {
            urls: vec!["u1".to_string()],
        };
        assert_eq!(
            outcome.clone().normalized(),
            outcome,
        );
    }

    #[test]
    fn test_repeated_rejections_collapse_in_order() {
        let outcome = ClassificationOutcome::Rejected {
            urls: vec![
                "u/b.jpg".to_string(),
                "u/a.jpg".to_string(),
                "u/b.jpg".to_string(),
            ],
        };
        assert_eq!(
            outcome.normalized(),
            ClassificationOutcome::Rejected {
                urls: vec!["u/b.jpg".to_string(), "u/a.jpg".to_string()]
            }
        );
    }

    #[test]
    fn test_default_progress_is_baseline() {
        let progress = PipelineProgress::default();
        assert!(progress.phase.is_none());
        assert_eq!(progress.current, 0);
        assert_eq!(progress.total, 0);
        assert!(progress.message.is_empty());
    }
}
