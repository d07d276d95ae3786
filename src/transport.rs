//! Wire-level access to the remote OCR job service.
//!
//! The protocol logic in [`crate::remote`] is split from the HTTP plumbing
//! here so that tests can script transport responses.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::{error::OffloadError, prelude::*};

/// Response body for a job submission.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// The opaque id of the created job. Optional here because the protocol
    /// layer, not the transport, decides that a missing id is fatal.
    #[serde(default)]
    pub job_id: Option<String>,
}

/// Response body for a status poll.
#[derive(Debug, Default, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Operations against the job endpoint.
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// `POST {endpoint}` with the PDF as a multipart payload.
    async fn submit(
        &self,
        pdf: Vec<u8>,
        filename: String,
    ) -> Result<SubmitResponse, OffloadError>;

    /// `GET {endpoint}/{job_id}`.
    async fn poll(&self, job_id: &str) -> Result<PollResponse, OffloadError>;
}

/// [`JobTransport`] over a real HTTP endpoint.
pub struct HttpJobTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpJobTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl JobTransport for HttpJobTransport {
    #[instrument(level = "debug", skip_all)]
    async fn submit(
        &self,
        pdf: Vec<u8>,
        filename: String,
    ) -> Result<SubmitResponse, OffloadError> {
        let part = Part::bytes(pdf)
            .file_name(filename)
            .mime_str("application/pdf")
            .map_err(OffloadError::transport)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OffloadError::transport(anyhow!(
                "job submission returned {status}"
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| {
            OffloadError::Protocol(format!("unexpected submission response: {body}"))
        })
    }

    #[instrument(level = "debug", skip_all, fields(job_id = %job_id))]
    async fn poll(&self, job_id: &str) -> Result<PollResponse, OffloadError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), job_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OffloadError::transport(anyhow!(
                "status poll returned {status}"
            )));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|_| {
            OffloadError::Protocol(format!("unexpected poll response: {body}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_response_tolerates_partial_bodies() -> Result<()> {
        let parsed: PollResponse = serde_json::from_str(r#"{"status": "IN_PROGRESS"}"#)?;
        assert_eq!(parsed.status.as_deref(), Some("IN_PROGRESS"));
        assert!(parsed.result.is_none());
        assert!(parsed.error.is_none());

        let parsed: PollResponse = serde_json::from_str(r#"{"error": "boom"}"#)?;
        assert_eq!(parsed.error.as_deref(), Some("boom"));
        Ok(())
    }

    #[test]
    fn submit_response_job_id_is_optional() -> Result<()> {
        let parsed: SubmitResponse = serde_json::from_str(r#"{}"#)?;
        assert!(parsed.job_id.is_none());

        let parsed: SubmitResponse = serde_json::from_str(r#"{"job_id": "abc"}"#)?;
        assert_eq!(parsed.job_id.as_deref(), Some("abc"));
        Ok(())
    }
}
