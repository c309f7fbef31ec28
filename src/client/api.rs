//! The two vault RPCs the coordinator depends on.

use crate::{
    errors::{UploadError, UploadResult},
    models::upload::{
        CompleteUploadRequest, CompleteUploadResponse, CreateUploadRequest, CreateUploadResponse,
    },
    services::auth::ADMIN_KEY_HEADER,
};
use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use tracing::debug;

pub const CREATE_PATH: &str = "/api/admin/uploads/create";
pub const COMPLETE_PATH: &str = "/api/admin/uploads/complete";

/// Session creation and completion, as seen from the uploading client.
pub trait UploadApi: Send + Sync {
    fn create_session(
        &self,
        request: &CreateUploadRequest,
    ) -> impl Future<Output = UploadResult<CreateUploadResponse>> + Send;

    fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> impl Future<Output = UploadResult<CompleteUploadResponse>> + Send;
}

/// JSON client for a running vault server.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    admin_key: String,
}

impl ApiClient {
    pub fn new(http: reqwest::Client, base_url: &str, admin_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_key: admin_key.into(),
        }
    }

    async fn post<B, R>(&self, operation: &'static str, path: &str, body: &B) -> UploadResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, operation, "calling vault api");
        let response = self
            .http
            .post(&url)
            .header(ADMIN_KEY_HEADER, &self.admin_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Protocol {
                operation,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

impl UploadApi for ApiClient {
    async fn create_session(
        &self,
        request: &CreateUploadRequest,
    ) -> UploadResult<CreateUploadResponse> {
        self.post("create session", CREATE_PATH, request).await
    }

    async fn complete_upload(
        &self,
        request: &CompleteUploadRequest,
    ) -> UploadResult<CompleteUploadResponse> {
        self.post("complete session", COMPLETE_PATH, request).await
    }
}
