use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::models::{ClassificationOutcome, ManualAssignment, UploadItem};
use crate::security::InputValidator;

/// The remote item service as seen by the pipeline.
#[async_trait]
pub trait WardrobeApi: Send + Sync {
    /// Upload one image and return its download URL.
    async fn upload_asset(&self, item: &UploadItem) -> AppResult<String>;

    async fn classify_auto(
        &self,
        user_id: &str,
        urls: &[String],
    ) -> AppResult<ClassificationOutcome>;

    async fn classify_manual(
        &self,
        user_id: &str,
        assignments: &[ManualAssignment],
    ) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Serialize)]
struct AutoClassifyRequest<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    urls: &'a [String],
}

#[derive(Debug, Serialize)]
struct ManualClassifyRequest<'a> {
    #[serde(rename = "userId")]
    user_id: &'a str,
    items: &'a [ManualAssignment],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RejectedBody {
    List(Vec<String>),
    Wrapped {
        #[serde(rename = "rejectedUrls")]
        rejected_urls: Vec<String>,
    },
}

/// HTTP client for the item service. Timeouts are the transport's concern.
pub struct HttpWardrobeClient {
    client: Client,
    base_url: String,
}

impl HttpWardrobeClient {
    pub fn new(config: &Config) -> AppResult<Self> {
        InputValidator::validate_base_url(&config.api_base_url)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl WardrobeApi for HttpWardrobeClient {
    async fn upload_asset(&self, item: &UploadItem) -> AppResult<String> {
        let payload = UploadPayload::from_item(item).await?;
        let url = self.endpoint("upload");

        log::debug!("Uploading {} to {}", item.name, url);

        let response = self
            .client
            .post(&url)
            .multipart(payload.build_form()?)
            .send()
            .await?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        parse_upload_response(status, &body)
    }

    async fn classify_auto(
        &self,
        user_id: &str,
        urls: &[String],
    ) -> AppResult<ClassificationOutcome> {
        let response = self
            .client
            .post(self.endpoint("items/auto"))
            .json(&AutoClassifyRequest { user_id, urls })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        log::debug!(
            "Auto classification response {}: {}",
            status,
            preview(&body, 300)
        );

        interpret_auto_classification(status, &body)
    }

    async fn classify_manual(
        &self,
        user_id: &str,
        assignments: &[ManualAssignment],
    ) -> AppResult<()> {
        let response = self
            .client
            .post(self.endpoint("items/manual"))
            .json(&ManualClassifyRequest {
                user_id,
                items: assignments,
            })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        interpret_manual_classification(status, &body)
    }
}

/// Multipart body for a single image upload.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    filename: String,
    data: Vec<u8>,
    mime_type: String,
    field_name: String,
}

impl UploadPayload {
    pub async fn from_item(item: &UploadItem) -> AppResult<Self> {
        let data = tokio::fs::read(item.local_path()).await?;

        Ok(Self {
            filename: InputValidator::sanitize_filename(&item.name),
            data,
            mime_type: item.mime_type.trim().to_lowercase(),
            field_name: "image".to_string(),
        })
    }

    pub fn build_form(&self) -> AppResult<multipart::Form> {
        let part = multipart::Part::bytes(self.data.clone())
            .file_name(self.filename.clone())
            .mime_str(&self.mime_type)?;

        Ok(multipart::Form::new().part(self.field_name.clone(), part))
    }
}

fn preview(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

pub fn parse_upload_response(status: StatusCode, body: &str) -> AppResult<String> {
    if status != StatusCode::OK {
        return Err(AppError::upload_failed(format!(
            "server returned {}: {}",
            status,
            preview(body, 200)
        )));
    }

    let parsed: UploadResponse = serde_json::from_str(body)
        .map_err(|e| AppError::upload_failed(format!("unreadable upload response: {}", e)))?;

    if parsed.url.trim().is_empty() {
        return Err(AppError::upload_failed("upload response carried an empty URL"));
    }

    Ok(parsed.url)
}

/// 201 means every URL was accepted; 404 carries the rejected URLs.
pub fn interpret_auto_classification(
    status: StatusCode,
    body: &str,
) -> AppResult<ClassificationOutcome> {
    match status {
        StatusCode::CREATED => Ok(ClassificationOutcome::Accepted),
        StatusCode::NOT_FOUND => {
            if body.trim().is_empty() {
                return Err(AppError::classification(
                    "rejection response carried no body",
                ));
            }

            let urls = match serde_json::from_str::<RejectedBody>(body) {
                Ok(RejectedBody::List(urls)) => urls,
                Ok(RejectedBody::Wrapped { rejected_urls }) => rejected_urls,
                Err(e) => {
                    return Err(AppError::classification(format!(
                        "unreadable rejection list: {}",
                        e
                    )))
                }
            };

            Ok(ClassificationOutcome::Rejected { urls }.normalized())
        }
        other => Err(AppError::classification(format!(
            "unexpected response {}: {}",
            other,
            preview(body, 200)
        ))),
    }
}

pub fn interpret_manual_classification(status: StatusCode, body: &str) -> AppResult<()> {
    if status == StatusCode::CREATED {
        Ok(())
    } else {
        Err(AppError::manual_classification(format!(
            "server returned {}: {}",
            status,
            preview(body, 200)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé");
        assert_eq!(preview("short", 100), "short");
    }

    #[test]
    fn test_upload_response_ok() {
        let url = parse_upload_response(StatusCode::OK, r#"{"url": "https://cdn/a.png"}"#).unwrap();
        assert_eq!(url, "https://cdn/a.png");
    }

    #[test]
    fn test_upload_response_requires_200() {
        let result = parse_upload_response(StatusCode::CREATED, r#"{"url": "https://cdn/a.png"}"#);
        assert!(matches!(result, Err(AppError::UploadFailed { .. })));

        let result = parse_upload_response(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(matches!(result, Err(AppError::UploadFailed { .. })));
    }

    #[test]
    fn test_upload_response_bad_body() {
        assert!(parse_upload_response(StatusCode::OK, "not json").is_err());
        assert!(parse_upload_response(StatusCode::OK, r#"{"url": ""}"#).is_err());
    }

    #[test]
    fn test_auto_classification_accepted() {
        let outcome = interpret_auto_classification(StatusCode::CREATED, "").unwrap();
        assert_eq!(outcome, ClassificationOutcome::Accepted);
    }

    #[test]
    fn test_auto_classification_rejected_list() {
        let outcome =
            interpret_auto_classification(StatusCode::NOT_FOUND, r#"["urlB"]"#).unwrap();
        assert_eq!(
            outcome,
            ClassificationOutcome::Rejected {
                urls: vec!["urlB".to_string()]
            }
        );

        let outcome = interpret_auto_classification(
            StatusCode::NOT_FOUND,
            r#"{"rejectedUrls": ["urlA", "urlC"]}"#,
        )
        .unwrap();
        assert_eq!(
            outcome,
            ClassificationOutcome::Rejected {
                urls: vec!["urlA".to_string(), "urlC".to_string()]
            }
        );
    }

    #[test]
    fn test_auto_classification_empty_rejection_is_acceptance() {
        let outcome = interpret_auto_classification(StatusCode::NOT_FOUND, "[]").unwrap();
        assert_eq!(outcome, ClassificationOutcome::Accepted);
    }

    #[test]
    fn test_auto_classification_unexpected_shapes() {
        assert!(matches!(
            interpret_auto_classification(StatusCode::OK, "[]"),
            Err(AppError::Classification { .. })
        ));
        assert!(matches!(
            interpret_auto_classification(StatusCode::NOT_FOUND, ""),
            Err(AppError::Classification { .. })
        ));
        assert!(matches!(
            interpret_auto_classification(StatusCode::NOT_FOUND, r#"{"error": "nope"}"#),
            Err(AppError::Classification { .. })
        ));
    }

    #[test]
    fn test_manual_classification_status() {
        assert!(interpret_manual_classification(StatusCode::CREATED, "").is_ok());
        assert!(matches!(
            interpret_manual_classification(StatusCode::BAD_REQUEST, "missing category"),
            Err(AppError::ManualClassification { .. })
        ));
    }

    #[test]
    fn test_client_rejects_bad_base_url() {
        let mut config = Config::default();
        config.api_base_url = "not a url".to_string();
        assert!(HttpWardrobeClient::new(&config).is_err());
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let mut config = Config::default();
        config.api_base_url = "https://api.example.com/v1/".to_string();
        let client = HttpWardrobeClient::new(&config).unwrap();
        assert_eq!(client.endpoint("items/auto"), "https://api.example.com/v1/items/auto");
    }

    #[tokio::test]
    async fn test_payload_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shirt.png");
        std::fs::write(&path, [0x89u8, 0x50, 0x4E, 0x47]).unwrap();

        let item = UploadItem::from_path(&path.to_string_lossy());
        let payload = UploadPayload::from_item(&item).await.unwrap();
        assert_eq!(payload.filename, "shirt.png");
        assert_eq!(payload.data.len(), 4);
        assert!(payload.build_form().is_ok());
    }

    #[tokio::test]
    async fn test_payload_missing_file() {
        let item = UploadItem::from_path("definitely_missing_file.png");
        assert!(matches!(
            UploadPayload::from_item(&item).await,
            Err(AppError::Io(_))
        ));
    }
}
