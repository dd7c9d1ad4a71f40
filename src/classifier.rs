//! HTTP client for external classifier services.
//!
//! Contract:
//!
//! | Method | Path | Body | Response |
//! |--------|------|------|----------|
//! | `POST` | `/classify` | multipart, one `file` field | `{service:{name,version}, labels:{<name>: float}}` |
//! | `GET`  | `/about` | none | `{service:{name,version}}` |

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::error::ResolveError;

/// Identity of the service that produced a verdict.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    pub service: ServiceInfo,
    pub labels: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct AboutResponse {
    service: ServiceInfo,
}

pub struct ClassifierClient {
    service: String,
    base_url: String,
    client: reqwest::Client,
}

impl ClassifierClient {
    /// `service` is the name predictions are recorded under.
    pub fn new(service: &str, config: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            service: service.to_string(),
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn failure(&self, detail: impl Into<String>) -> ResolveError {
        ResolveError::Classifier {
            service: self.service.clone(),
            detail: detail.into(),
        }
    }

    /// Submits one object's bytes for classification.
    pub async fn classify(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<Classification, ResolveError> {
        let endpoint = format!("{}/classify", self.base_url);
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| ResolveError::network(&endpoint, e))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ResolveError::network(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.failure(format!("{} returned {}: {}", endpoint, status, body)));
        }

        let classification: Classification = response
            .json()
            .await
            .map_err(|e| self.failure(format!("invalid response from {}: {}", endpoint, e)))?;
        validate_labels(&classification.labels).map_err(|detail| self.failure(detail))?;
        Ok(classification)
    }

    /// Fetches the service identity from `/about`.
    pub async fn about(&self) -> Result<ServiceInfo, ResolveError> {
        let endpoint = format!("{}/about", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .map_err(|e| ResolveError::network(&endpoint, e))?;
        if !response.status().is_success() {
            return Err(ResolveError::UnexpectedStatus {
                url: endpoint,
                status: response.status().as_u16(),
            });
        }
        let about: AboutResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("invalid response from {}: {}", endpoint, e)))?;
        Ok(about.service)
    }
}

fn validate_labels(labels: &BTreeMap<String, f64>) -> Result<(), String> {
    for (name, score) in labels {
        if !score.is_finite() || !(0.0..=1.0).contains(score) {
            return Err(format!("label {} has out-of-range score {}", name, score));
        }
    }
    Ok(())
}
