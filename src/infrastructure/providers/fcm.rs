use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{classify_status, transport_failure};
use crate::domain::service::push_provider::{PushProvider, SendFailure};
use crate::infrastructure::config::FcmConfig;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// FcmProvider は FCM 互換バックエンド向けのプロバイダ。
/// 設定されたサーバキーを Bearer として JSON ペイロードを POST する。
pub struct FcmProvider {
    endpoint: String,
    server_key: String,
    client: Client,
}

impl FcmProvider {
    pub fn new(cfg: &FcmConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let endpoint = cfg.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://fcm.googleapis.com/v1/projects/{}/messages:send",
                cfg.project_id
            )
        });
        Ok(Self {
            endpoint,
            server_key: cfg.server_key.clone(),
            client,
        })
    }
}

/// FCM v1 形式のメッセージペイロードを組み立てる。
/// 文字列のエスケープは serde_json が行う。
fn message_payload(
    device_token: &str,
    title: &str,
    body: &str,
    data: &HashMap<String, String>,
) -> serde_json::Value {
    serde_json::json!({
        "message": {
            "token": device_token,
            "notification": {
                "title": title,
                "body": body,
            },
            "data": data,
        }
    })
}

#[async_trait]
impl PushProvider for FcmProvider {
    fn platform(&self) -> &str {
        "fcm"
    }

    async fn send(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), SendFailure> {
        let payload = message_payload(device_token, title, body, data);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.server_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_failure("fcm send", &e))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(());
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(SendFailure::with_status(
            classify_status(status),
            status,
            format!("FCM returned {}: {}", status, body_text),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_derived_from_project() {
        let provider = FcmProvider::new(&FcmConfig {
            project_id: "proj".to_string(),
            server_key: "key".to_string(),
            endpoint: None,
        })
        .unwrap();
        assert_eq!(
            provider.endpoint,
            "https://fcm.googleapis.com/v1/projects/proj/messages:send"
        );
    }

    #[test]
    fn endpoint_override_wins() {
        let provider = FcmProvider::new(&FcmConfig {
            project_id: "proj".to_string(),
            server_key: "key".to_string(),
            endpoint: Some("http://localhost:9999/send".to_string()),
        })
        .unwrap();
        assert_eq!(provider.endpoint, "http://localhost:9999/send");
    }

    #[test]
    fn payload_shape_and_escaping() {
        let data = HashMap::from([("order".to_string(), "42".to_string())]);
        let payload = message_payload("tok", "Say \"hi\"", "line\nbreak", &data);

        assert_eq!(payload["message"]["token"], "tok");
        assert_eq!(payload["message"]["notification"]["title"], "Say \"hi\"");
        assert_eq!(payload["message"]["data"]["order"], "42");

        // シリアライズ後も JSON として妥当
        let raw = serde_json::to_string(&payload).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["message"]["notification"]["body"], "line\nbreak");
    }
}
