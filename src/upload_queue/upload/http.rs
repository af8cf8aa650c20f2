//! Multipart import against the portal backend.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::Value;

use crate::api::{endpoint_url, ApiEnvelope};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::logging::log_info;
use crate::upload_queue::types::ImportMeta;

use super::{ImportFailure, ImportRequest, Importer};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ImportResponseData {
    imported_count: u64,
    error_count: u64,
    errors: Vec<Value>,
}

/// Row errors come back as strings or `{row, message}` objects
fn error_details(errors: &[Value]) -> Vec<String> {
    errors
        .iter()
        .map(|error| match error {
            Value::String(s) => s.clone(),
            Value::Object(map) => {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("invalid row");
                match map.get("row").and_then(Value::as_u64) {
                    Some(row) => format!("row {}: {}", row, message),
                    None => message.to_string(),
                }
            }
            other => other.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct HttpImporter {
    client: reqwest::Client,
    url: url::Url,
    token: String,
}

impl HttpImporter {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            url: endpoint_url(config.require_server_url()?, &config.endpoints.import)?,
            token: config.require_token()?.to_string(),
        })
    }
}

#[async_trait]
impl Importer for HttpImporter {
    async fn import(
        &self,
        request: &ImportRequest,
    ) -> std::result::Result<ImportMeta, ImportFailure> {
        let file = &request.file;
        let part = Part::bytes(file.body().to_vec())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ImportFailure::new(format!("Invalid mime type: {}", e)))?;

        let form = Form::new()
            .part("file", part)
            .text("displayName", request.display_name.clone());

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImportFailure::new(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ImportFailure::new(format!("Failed to read import response: {}", e)))?;

        let envelope: Option<ApiEnvelope<ImportResponseData>> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let details = envelope
                .as_ref()
                .and_then(|env| env.data.as_ref())
                .map(|data| error_details(&data.errors))
                .unwrap_or_default();
            let message = envelope
                .and_then(|env| env.message)
                .unwrap_or(body);
            return Err(ImportFailure::new(format!(
                "Import failed with status {}: {}",
                status, message
            ))
            .with_details(details));
        }

        let envelope = envelope
            .ok_or_else(|| ImportFailure::new("Failed to parse import response"))?;

        if !envelope.success {
            let details = envelope
                .data
                .as_ref()
                .map(|data| error_details(&data.errors))
                .unwrap_or_default();
            return Err(ImportFailure::new(
                envelope
                    .message
                    .unwrap_or_else(|| "Import rejected by server".to_string()),
            )
            .with_details(details));
        }

        let data = envelope.data.unwrap_or_default();
        log_info(
            "upload-queue",
            &format!(
                "📦 Server imported {} rows from {} ({} row errors)",
                data.imported_count, file.name, data.error_count
            ),
        )
        .unwrap_or_default();

        Ok(ImportMeta {
            imported_count: data.imported_count,
            error_count: data.error_count,
            error_details: error_details(&data.errors),
        })
    }
}
