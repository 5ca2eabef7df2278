//! Periodic self-registration with the registry.
//!
//! Every tick posts this node's [`RegistrationRecord`] as query parameters to
//! `/api/registry/register`. Failures are logged and retried on the next tick;
//! the loop only ends when its task is aborted.

use std::time::Duration;

use axum::http::StatusCode;
use metrics::counter;
use reqwest::Client;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::config::{HeartbeatSettings, NodeSettings};
use crate::domain::registration::RegistrationRecord;

use super::error::InfraError;
use super::origin::user_agent;
use super::telemetry::METRIC_HEARTBEAT_TOTAL;

const REGISTER_PATH: &str = "/api/registry/register";

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("registration request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry rejected registration with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// The record advertised for `node`.
pub fn registration_record(node: &NodeSettings) -> RegistrationRecord {
    RegistrationRecord {
        url: node.public_url.as_str().trim_end_matches('/').to_string(),
        name: node.name.clone(),
        tag: node.tag.clone(),
        zalo: node.zalo.clone(),
        phone: node.phone.clone(),
        email: node.email.clone(),
        contact_name: node.contact_name.clone(),
        facebook: node.facebook.clone(),
    }
}

pub struct Heartbeat {
    client: Client,
    endpoint: Url,
    record: RegistrationRecord,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        registry: &Url,
        record: RegistrationRecord,
        settings: &HeartbeatSettings,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| {
                InfraError::http_client(format!("failed to build heartbeat client: {err}"))
            })?;

        let endpoint = format!("{}{REGISTER_PATH}", registry.as_str().trim_end_matches('/'));
        let endpoint = Url::parse(&endpoint).map_err(|err| {
            InfraError::configuration(format!("invalid registration endpoint `{endpoint}`: {err}"))
        })?;

        Ok(Self {
            client,
            endpoint,
            record,
            interval: settings.interval,
        })
    }

    /// Send one registration. Returns the registry's response body on success.
    pub async fn beat(&self) -> Result<String, HeartbeatError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(self.record.query_pairs());

        let response = self.client.post(url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(HeartbeatError::Rejected { status, body });
        }
        Ok(body)
    }

    /// Run the heartbeat loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                target = "community_node::heartbeat",
                endpoint = %self.endpoint,
                interval_secs = self.interval.as_secs(),
                "starting registration heartbeat"
            );
            loop {
                match self.beat().await {
                    Ok(body) => {
                        counter!(METRIC_HEARTBEAT_TOTAL, "outcome" => "ok").increment(1);
                        info!(
                            target = "community_node::heartbeat",
                            response = %body,
                            "registration succeeded"
                        );
                    }
                    Err(err) => {
                        let outcome = match err {
                            HeartbeatError::Transport(_) => "failed",
                            HeartbeatError::Rejected { .. } => "rejected",
                        };
                        counter!(METRIC_HEARTBEAT_TOTAL, "outcome" => outcome).increment(1);
                        warn!(
                            target = "community_node::heartbeat",
                            error = %err,
                            "registration failed"
                        );
                    }
                }
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}
