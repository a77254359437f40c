//! Outbound alert notification.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::NotifierConfig;
use crate::error::{ReleaseError, ReleaseResult};
use crate::types::{Alert, AlertSeverity};

/// Sends batches of alerts to operators.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a batch of alerts. Empty batches are not sent.
    async fn notify(&self, alerts: &[Alert]) -> ReleaseResult<()>;
}

/// Build the notifier described by the configuration.
///
/// Without an API key alerts are only logged. With one, the endpoint,
/// sender and at least one recipient are required.
pub fn from_config(config: &NotifierConfig) -> ReleaseResult<Box<dyn Notifier>> {
    if config.api_key.is_none() {
        tracing::info!("no notifier API key configured, alerts will only be logged");
        return Ok(Box::new(LogNotifier));
    }

    Ok(Box::new(EmailNotifier::new(config)?))
}

/// Writes alerts to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alerts: &[Alert]) -> ReleaseResult<()> {
        for alert in alerts {
            tracing::warn!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                title = %alert.title,
                "{}",
                alert.message
            );
        }
        Ok(())
    }
}

/// Request body accepted by the email API.
#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: String,
    text: String,
}

/// Sends alert batches through an HTTP email API.
pub struct EmailNotifier {
    client: Client,
    api_url: String,
    api_key: SecretString,
    from_address: String,
    recipients: Vec<String>,
}

impl EmailNotifier {
    /// Create an email notifier from configuration.
    pub fn new(config: &NotifierConfig) -> ReleaseResult<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| ReleaseError::config("notifier.api_key is not set"))?;
        let api_url = config
            .api_url
            .as_deref()
            .ok_or_else(|| ReleaseError::config("notifier.api_url is not set"))?;
        let from_address = config
            .from_address
            .clone()
            .ok_or_else(|| ReleaseError::config("notifier.from_address is not set"))?;
        if config.recipients.is_empty() {
            return Err(ReleaseError::config("notifier.recipients is empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ReleaseError::Http)?;

        Ok(Self {
            client,
            api_url: api_url.to_owned(),
            api_key: SecretString::from(api_key.expose_secret().to_owned()),
            from_address,
            recipients: config.recipients.clone(),
        })
    }

    fn subject(alerts: &[Alert]) -> String {
        let worst = alerts
            .iter()
            .map(|a| a.severity)
            .min()
            .unwrap_or(AlertSeverity::High);
        format!(
            "[{}] {} release alert(s)",
            worst.as_str().to_uppercase(),
            alerts.len()
        )
    }

    fn body(alerts: &[Alert]) -> String {
        alerts
            .iter()
            .map(|a| {
                format!(
                    "[{}] {} ({})\n{}\n",
                    a.severity, a.title, a.alert_type, a.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn notify(&self, alerts: &[Alert]) -> ReleaseResult<()> {
        if alerts.is_empty() {
            return Ok(());
        }

        let request = EmailRequest {
            from: &self.from_address,
            to: &self.recipients,
            subject: Self::subject(alerts),
            text: Self::body(alerts),
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReleaseError::Notification(format!(
                "email API returned {status}: {body}"
            )));
        }

        tracing::debug!(count = alerts.len(), "alert notification sent");
        Ok(())
    }
}

impl std::fmt::Debug for EmailNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailNotifier")
            .field("api_url", &self.api_url)
            .field("from_address", &self.from_address)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::types::NewAlert;

    type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn spawn_email_api(status: StatusCode) -> (String, Captured) {
        let captured: Captured = Arc::default();

        async fn handler(
            State((status, captured)): State<(StatusCode, Captured)>,
            headers: HeaderMap,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            captured.lock().unwrap().push((auth, body));
            status
        }

        let app = Router::new()
            .route("/emails", post(handler))
            .with_state((status, captured.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/emails"), captured)
    }

    fn config(api_url: &str) -> NotifierConfig {
        NotifierConfig {
            api_url: Some(api_url.to_owned()),
            api_key: Some(SecretString::from("re_test_key".to_owned())),
            from_address: Some("alerts@example.com".to_owned()),
            recipients: vec!["oncall@example.com".to_owned()],
            timeout_secs: 5,
        }
    }

    fn alerts() -> Vec<Alert> {
        vec![
            Alert::open(NewAlert::new(
                "high_latency",
                AlertSeverity::High,
                "High latency on api",
                "api responded in 4000ms",
            )),
            Alert::open(NewAlert::new(
                "service_health",
                AlertSeverity::Critical,
                "Service api is failing",
                "api reported 2 error health check(s)",
            )),
        ]
    }

    #[tokio::test]
    async fn sends_one_batched_email() {
        let (url, captured) = spawn_email_api(StatusCode::OK).await;
        let notifier = EmailNotifier::new(&config(&url)).unwrap();

        notifier.notify(&alerts()).await.unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let (auth, body) = &captured[0];
        assert_eq!(auth.as_deref(), Some("Bearer re_test_key"));
        assert_eq!(body["from"], "alerts@example.com");
        assert_eq!(body["to"][0], "oncall@example.com");
        assert_eq!(body["subject"], "[CRITICAL] 2 release alert(s)");
    }

    #[tokio::test]
    async fn empty_batch_is_not_sent() {
        let (url, captured) = spawn_email_api(StatusCode::OK).await;
        let notifier = EmailNotifier::new(&config(&url)).unwrap();

        notifier.notify(&[]).await.unwrap();
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_email_is_an_error() {
        let (url, _) = spawn_email_api(StatusCode::UNAUTHORIZED).await;
        let notifier = EmailNotifier::new(&config(&url)).unwrap();

        let err = notifier.notify(&alerts()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::Notification(_)));
    }

    #[test]
    fn incomplete_config_is_rejected() {
        let mut config = config("http://localhost/emails");
        config.recipients.clear();
        assert!(matches!(
            EmailNotifier::new(&config),
            Err(ReleaseError::Config(_))
        ));
    }

    #[test]
    fn falls_back_to_logging_without_key() {
        assert!(from_config(&NotifierConfig::default()).is_ok());
    }
}
