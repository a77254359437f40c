//! GitHub `repository_dispatch` executor.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::ExecutorConfig;
use crate::error::{ReleaseError, ReleaseResult};

use super::{DispatchAck, DispatchPayload, ExecutorTrigger};

#[derive(Serialize)]
struct DispatchRequest<'a> {
    event_type: &'a str,
    client_payload: &'a DispatchPayload,
}

/// Triggers a workflow through the repository dispatch API.
pub struct GitHubDispatchExecutor {
    client: Client,
    api_url: String,
    token: Option<SecretString>,
    owner: Option<String>,
    repository: Option<String>,
    event_type: String,
}

impl GitHubDispatchExecutor {
    /// Create an executor from configuration.
    ///
    /// Credentials are not checked here; see [`ExecutorTrigger::trigger`].
    pub fn new(config: &ExecutorConfig) -> ReleaseResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ReleaseError::Http)?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_owned(),
            token: config
                .token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_owned())),
            owner: config.owner.clone(),
            repository: config.repository.clone(),
            event_type: config.event_type.clone(),
        })
    }

    fn credentials(&self) -> ReleaseResult<(&SecretString, &str, &str)> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| ReleaseError::config("executor.token is not set"))?;
        let owner = self
            .owner
            .as_deref()
            .ok_or_else(|| ReleaseError::config("executor.owner is not set"))?;
        let repository = self
            .repository
            .as_deref()
            .ok_or_else(|| ReleaseError::config("executor.repository is not set"))?;
        Ok((token, owner, repository))
    }
}

#[async_trait]
impl ExecutorTrigger for GitHubDispatchExecutor {
    async fn trigger(&self, payload: &DispatchPayload) -> ReleaseResult<DispatchAck> {
        let (token, owner, repository) = self.credentials()?;
        let url = format!("{}/repos/{owner}/{repository}/dispatches", self.api_url);

        tracing::info!(
            deployment_id = %payload.deployment_id,
            environment = %payload.environment,
            version = %payload.version,
            is_rollback = payload.is_rollback,
            "dispatching to executor"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose_secret())
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "sidereal-release")
            .json(&DispatchRequest {
                event_type: &self.event_type,
                client_payload: payload,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::Executor {
                status: status.as_u16(),
                body,
            });
        }

        Ok(DispatchAck {
            status: status.as_u16(),
            dispatched_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for GitHubDispatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubDispatchExecutor")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("repository", &self.repository)
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::types::{DeploymentData, Environment};

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<AtomicUsize>,
        last: Arc<Mutex<Option<(String, Option<String>, serde_json::Value)>>>,
    }

    async fn spawn_executor(status: StatusCode) -> (String, Recorder) {
        let recorder = Recorder::default();

        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/dispatches",
                post(
                    move |State(rec): State<Recorder>,
                          Path((owner, repo)): Path<(String, String)>,
                          headers: HeaderMap,
                          Json(body): Json<serde_json::Value>| async move {
                        rec.calls.fetch_add(1, Ordering::SeqCst);
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        *rec.last.lock().unwrap() = Some((format!("{owner}/{repo}"), auth, body));
                        (status, "workflow not found")
                    },
                ),
            )
            .with_state(recorder.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), recorder)
    }

    fn config(api_url: &str) -> ExecutorConfig {
        ExecutorConfig {
            api_url: api_url.to_owned(),
            token: Some(SecretString::from("ghp_test".to_owned())),
            owner: Some("acme".to_owned()),
            repository: Some("platform".to_owned()),
            ..ExecutorConfig::default()
        }
    }

    fn payload() -> DispatchPayload {
        DispatchPayload::for_deployment(&DeploymentData::new(
            Environment::Production,
            "1.2.3",
            "abc123",
            serde_json::json!({"auto_rollback": true}),
        ))
    }

    #[tokio::test]
    async fn dispatches_payload() {
        let (url, recorder) = spawn_executor(StatusCode::NO_CONTENT).await;
        let executor = GitHubDispatchExecutor::new(&config(&url)).unwrap();

        let ack = executor.trigger(&payload()).await.unwrap();
        assert_eq!(ack.status, 204);

        let (repo, auth, body) = recorder.last.lock().unwrap().clone().unwrap();
        assert_eq!(repo, "acme/platform");
        assert_eq!(auth.as_deref(), Some("Bearer ghp_test"));
        assert_eq!(body["event_type"], "deploy");
        assert_eq!(body["client_payload"]["version"], "1.2.3");
        assert_eq!(body["client_payload"]["config"]["auto_rollback"], true);
    }

    #[tokio::test]
    async fn non_success_surfaces_body() {
        let (url, _) = spawn_executor(StatusCode::UNPROCESSABLE_ENTITY).await;
        let executor = GitHubDispatchExecutor::new(&config(&url)).unwrap();

        let err = executor.trigger(&payload()).await.unwrap_err();
        match err {
            ReleaseError::Executor { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "workflow not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_network() {
        let (url, recorder) = spawn_executor(StatusCode::NO_CONTENT).await;
        let mut config = config(&url);
        config.repository = None;
        let executor = GitHubDispatchExecutor::new(&config).unwrap();

        let err = executor.trigger(&payload()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::Config(_)));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }
}
