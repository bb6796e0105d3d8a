//! Xero accounts API client.

use crate::config::UploadConfig;
use crate::config::secrets::bearer_header;
use crate::error::Result;
use crate::model::Record;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use super::{UploadError, Uploader};

const TENANT_HEADER: &str = "Xero-Tenant-Id";

/// Uploads one account per `PUT` to the Xero accounts endpoint.
pub struct XeroUploader {
    client: reqwest::Client,
    api_url: String,
    access_token: SecretString,
    tenant_id: String,
}

impl XeroUploader {
    pub fn new(
        api_url: impl Into<String>,
        access_token: SecretString,
        tenant_id: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            access_token,
            tenant_id: tenant_id.into(),
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        Self::new(
            config.api_url.clone(),
            SecretString::from(config.access_token.expose_secret().to_owned()),
            config.tenant_id.clone(),
        )
    }
}

impl Uploader for XeroUploader {
    async fn upload(&self, record: &Record) -> std::result::Result<(), UploadError> {
        let body =
            serde_json::to_vec(record).map_err(|e| UploadError::Serialize(e.to_string()))?;

        let resp = self
            .client
            .put(&self.api_url)
            .header(AUTHORIZATION, bearer_header(&self.access_token))
            .header(CONTENT_TYPE, "application/json")
            .header(TENANT_HEADER, &self.tenant_id)
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Network(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            debug!(code = %record.code, status = status.as_u16(), "account accepted");
            return Ok(());
        }

        // A body we cannot read is one failed attempt, same as any other.
        let text = resp.text().await.map_err(|e| UploadError::BodyRead {
            status: status.as_u16(),
            message: e.to_string(),
        })?;

        Err(UploadError::from_rejection(status.as_u16(), text))
    }
}
