use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use super::{classify_status, transport_failure};
use crate::domain::service::push_provider::{FailureCategory, PushProvider, SendFailure};
use crate::infrastructure::config::WnsConfig;

/// 有効期限のこの秒数前から先行してトークンをリフレッシュする。
const TOKEN_REFRESH_WINDOW_SECS: u64 = 300;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Client Credentials フローで取得した Bearer トークン。
/// 取得時刻と有効期間からリフレッシュタイミングを判定する。
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_in: u64,
    acquired_at: DateTime<Utc>,
}

impl CachedToken {
    fn new(access_token: String, expires_in: u64) -> Self {
        Self {
            access_token,
            expires_in,
            acquired_at: Utc::now(),
        }
    }

    /// `refresh_before_secs` 秒以内に有効期限が切れる場合は true を返す。
    fn should_refresh(&self, refresh_before_secs: u64) -> bool {
        let elapsed = Utc::now()
            .signed_duration_since(self.acquired_at)
            .num_seconds();
        if elapsed < 0 {
            return false;
        }
        elapsed as u64 + refresh_before_secs >= self.expires_in
    }
}

/// トークンエンドポイントのレスポンス（OAuth2 標準形式）。
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// WnsProvider は Windows プッシュサービス向けのプロバイダ。
///
/// OAuth2 Client Credentials フローで取得した Bearer トークンを
/// メモリ内にキャッシュし、有効期限前に先行リフレッシュする。
/// リフレッシュは write ロック + ダブルチェックで 1 タスクに限定され、
/// 並行する send は古い有効なトークンか新しいトークンのどちらかを読む。
pub struct WnsProvider {
    client_id: String,
    client_secret: String,
    token_endpoint: String,
    client: Client,
    token_cache: RwLock<Option<CachedToken>>,
}

impl WnsProvider {
    pub fn new(cfg: &WnsConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            token_endpoint: format!(
                "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
                cfg.tenant_id
            ),
            client,
            token_cache: RwLock::new(None),
        })
    }

    async fn fetch_token(&self) -> Result<CachedToken, SendFailure> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "https://wns.windows.com/.default"),
        ];

        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_failure("wns token endpoint", &e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            // 資格情報の誤りはステータスによらず認証失敗として扱う
            let category = if status == 400 || status == 401 {
                FailureCategory::Unauthorized
            } else {
                classify_status(status)
            };
            return Err(SendFailure::with_status(
                category,
                status,
                format!("token acquisition failed: {}", body),
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            SendFailure::new(
                FailureCategory::Unknown,
                format!("token response parse failed: {}", e),
            )
        })?;

        Ok(CachedToken::new(token.access_token, token.expires_in))
    }

    /// キャッシュ済みトークンを返す。リフレッシュ閾値を超えていたら更新する。
    async fn cached_token(&self) -> Result<String, SendFailure> {
        {
            let cache = self.token_cache.read().await;
            if let Some(token) = cache.as_ref() {
                if !token.should_refresh(TOKEN_REFRESH_WINDOW_SECS) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cache = self.token_cache.write().await;

        // ダブルチェック: 別タスクがすでにリフレッシュを完了しているかもしれない
        if let Some(token) = cache.as_ref() {
            if !token.should_refresh(TOKEN_REFRESH_WINDOW_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("refreshing wns access token");
        let token = self.fetch_token().await?;
        let access_token = token.access_token.clone();
        *cache = Some(token);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token_cache.write().await = None;
    }
}

#[async_trait]
impl PushProvider for WnsProvider {
    fn platform(&self) -> &str {
        "windows"
    }

    async fn send(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), SendFailure> {
        // WNS のチャネル URI がデバイストークンになる
        if !device_token.starts_with("https://") {
            return Err(SendFailure::new(
                FailureCategory::InvalidToken,
                "channel URI must be an https URL",
            ));
        }

        let token = self.cached_token().await?;
        let payload = toast_payload(title, body, data);

        let response = self
            .client
            .post(device_token)
            .header("Content-Type", "text/xml")
            .header("X-WNS-Type", "wns/toast")
            .bearer_auth(&token)
            .body(payload)
            .send()
            .await
            .map_err(|e| transport_failure("wns send", &e))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(());
        }

        if status == 401 {
            // トークン失効の可能性があるためキャッシュを破棄し、次の試行で再取得させる
            self.invalidate_token().await;
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(SendFailure::with_status(
            classify_status(status),
            status,
            format!("WNS returned {}: {}", status, body_text),
        ))
    }
}

/// XML テキストノード・属性値用のエスケープ。ペイロード注入を防ぐ。
fn escape_xml(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// トースト XML を組み立てる。data は launch 属性に JSON として載せる。
fn toast_payload(title: &str, body: &str, data: &HashMap<String, String>) -> String {
    let launch = if data.is_empty() {
        String::new()
    } else {
        serde_json::to_string(data)
            .map(|json| format!(" launch=\"{}\"", escape_xml(&json)))
            .unwrap_or_default()
    };
    format!(
        "<toast{}><visual><binding template=\"ToastGeneric\"><text>{}</text><text>{}</text></binding></visual></toast>",
        launch,
        escape_xml(title),
        escape_xml(body)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider() -> WnsProvider {
        WnsProvider::new(&WnsConfig {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            tenant_id: "tenant".to_string(),
        })
        .unwrap()
    }

    fn make_token_with_acquired_at(expires_in: u64, acquired_at: DateTime<Utc>) -> CachedToken {
        CachedToken {
            access_token: "tok".to_string(),
            expires_in,
            acquired_at,
        }
    }

    #[test]
    fn escape_xml_escapes_markup() {
        assert_eq!(
            escape_xml(r#"<script>&"'</script>"#),
            "&lt;script&gt;&amp;&quot;&apos;&lt;/script&gt;"
        );
        assert_eq!(escape_xml("plain"), "plain");
    }

    #[test]
    fn toast_payload_escapes_fields() {
        let payload = toast_payload("Hi <b>", "a & b", &HashMap::new());
        assert!(payload.contains("<text>Hi &lt;b&gt;</text>"));
        assert!(payload.contains("<text>a &amp; b</text>"));
        assert!(!payload.contains("launch="));
    }

    #[test]
    fn toast_payload_carries_data_as_launch() {
        let data = HashMap::from([("k".to_string(), "v".to_string())]);
        let payload = toast_payload("T", "B", &data);
        assert!(payload.starts_with("<toast launch=\""));
        assert!(payload.contains("&quot;k&quot;:&quot;v&quot;"));
    }

    #[test]
    fn token_endpoint_is_derived_from_tenant() {
        let provider = make_provider();
        assert_eq!(
            provider.token_endpoint,
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn should_refresh_far_from_expiry() {
        let token = CachedToken::new("tok".to_string(), 3600);
        assert!(!token.should_refresh(TOKEN_REFRESH_WINDOW_SECS));
    }

    #[test]
    fn should_refresh_within_window() {
        // 経過 3350 秒、有効期限 3600 秒: 3350 + 300 >= 3600 → リフレッシュが必要
        let acquired_at = Utc::now() - chrono::Duration::seconds(3350);
        let token = make_token_with_acquired_at(3600, acquired_at);
        assert!(token.should_refresh(TOKEN_REFRESH_WINDOW_SECS));
    }

    #[test]
    fn should_refresh_exactly_at_boundary() {
        // 3300 + 300 = 3600 >= 3600 → リフレッシュが必要
        let acquired_at = Utc::now() - chrono::Duration::seconds(3300);
        let token = make_token_with_acquired_at(3600, acquired_at);
        assert!(token.should_refresh(TOKEN_REFRESH_WINDOW_SECS));
    }

    #[test]
    fn should_not_refresh_just_before_window() {
        // 3200 + 300 = 3500 < 3600 → まだ不要（時計誤差の余裕をみて 3200 秒）
        let acquired_at = Utc::now() - chrono::Duration::seconds(3200);
        let token = make_token_with_acquired_at(3600, acquired_at);
        assert!(!token.should_refresh(TOKEN_REFRESH_WINDOW_SECS));
    }

    #[tokio::test]
    async fn non_https_channel_uri_is_invalid_token() {
        let provider = make_provider();
        let result = provider
            .send("not-a-url", "T", "B", &HashMap::new())
            .await;
        let failure = result.unwrap_err();
        assert_eq!(failure.category, FailureCategory::InvalidToken);
        assert!(!failure.retryable());
    }
}
