use async_trait::async_trait;
use cdc_core::{CaptureGateway, CaptureJobConfig, Error, RegistrationFailure, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Error body returned by the Kafka Connect REST API
#[derive(Deserialize)]
struct ConnectErrorBody {
    message: String,
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    name: &'a str,
    config: &'a CaptureJobConfig,
}

/// Capture service gateway backed by the Kafka Connect REST API
pub struct KafkaConnectGateway {
    connect_url: String,
    client: Client,
}

impl KafkaConnectGateway {
    pub fn new(connect_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            connect_url: connect_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn job_url(&self, name: &str) -> String {
        format!("{}/connectors/{}", self.connect_url, name)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            Error::Connection(format!(
                "Capture service at {} unreachable: {}",
                self.connect_url, e
            ))
        })
    }
}

/// Translate the capture service's raw error text into a failure kind
pub fn classify_failure(message: &str) -> RegistrationFailure {
    let lower = message.to_lowercase();
    const CREDENTIALS: &[&str] = &[
        "password authentication failed",
        "access denied",
        "authentication failed",
        "permission denied",
        "not authorized",
    ];
    const CONNECTIVITY: &[&str] = &[
        "connection attempt failed",
        "connection refused",
        "communications link failure",
        "unknown host",
        "unknownhostexception",
        "could not connect",
        "timed out",
    ];

    if CREDENTIALS.iter().any(|p| lower.contains(p)) {
        RegistrationFailure::Credentials
    } else if CONNECTIVITY.iter().any(|p| lower.contains(p)) {
        RegistrationFailure::Connectivity
    } else {
        RegistrationFailure::Rejected
    }
}

async fn rejection(resp: Response) -> Error {
    let status = resp.status();
    let message = match resp.json::<ConnectErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };
    let kind = classify_failure(&message);
    let guidance = match kind {
        RegistrationFailure::Connectivity => {
            "The capture service could not reach the database; check host and port"
        }
        RegistrationFailure::Credentials => {
            "The capture service could not log in; check user name and password"
        }
        RegistrationFailure::Rejected => "The capture service rejected the job",
    };
    Error::registration(kind, format!("{} ({}): {}", guidance, status, message))
}

#[async_trait]
impl CaptureGateway for KafkaConnectGateway {
    async fn get_job(&self, name: &str) -> Result<Option<Value>> {
        let resp = self.send(self.client.get(self.job_url(name))).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let job = resp.json::<Value>().await.map_err(|e| {
                    Error::Connection(format!("Invalid response for '{}': {}", name, e))
                })?;
                Ok(Some(job))
            }
            _ => Err(rejection(resp).await),
        }
    }

    async fn create_job(&self, name: &str, config: &CaptureJobConfig) -> Result<()> {
        debug!("POST {}/connectors/ for '{}'", self.connect_url, name);
        let resp = self
            .send(
                self.client
                    .post(format!("{}/connectors/", self.connect_url))
                    .json(&CreateRequest { name, config }),
            )
            .await?;
        if resp.status().is_success() {
            info!("Capture job '{}' created", name);
            Ok(())
        } else {
            Err(rejection(resp).await)
        }
    }

    async fn update_job(&self, name: &str, config: &CaptureJobConfig) -> Result<()> {
        let resp = self
            .send(
                self.client
                    .put(format!("{}/config", self.job_url(name)))
                    .json(config),
            )
            .await?;
        if resp.status().is_success() {
            info!("Capture job '{}' updated", name);
            Ok(())
        } else {
            Err(rejection(resp).await)
        }
    }

    async fn delete_job(&self, name: &str) -> Result<bool> {
        let resp = self.send(self.client.delete(self.job_url(name))).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(rejection(resp).await),
        }
    }
}
