use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::service::push_provider::{FailureCategory, PushProvider, SendFailure};

/// 20 回に 1 回（約 5%）失敗させてリトライ経路を通す。
const FAILURE_PERIOD: u64 = 20;

/// FakeProvider は外部 I/O を行わない開発・検証用プロバイダ。
///
/// 送信内容をログに出し、決定的に `FAILURE_PERIOD` 回に 1 回
/// `ServiceUnavailable` を返す。
#[derive(Default)]
pub struct FakeProvider {
    calls: AtomicU64,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PushProvider for FakeProvider {
    fn platform(&self) -> &str {
        "fake"
    }

    async fn send(
        &self,
        device_token: &str,
        title: &str,
        _body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), SendFailure> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        if call % FAILURE_PERIOD == 0 {
            warn!(call, device_token, "fake provider simulating outage");
            return Err(SendFailure::new(
                FailureCategory::ServiceUnavailable,
                format!("synthetic outage on call {}", call),
            ));
        }

        info!(call, device_token, title, data_keys = data.len(), "fake provider delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_every_twentieth_call() {
        let provider = FakeProvider::new();
        let data = HashMap::new();

        for call in 1..=40u64 {
            let result = provider.send("t", "title", "body", &data).await;
            if call % 20 == 0 {
                let failure = result.unwrap_err();
                assert_eq!(failure.category, FailureCategory::ServiceUnavailable);
                assert!(failure.retryable());
            } else {
                assert!(result.is_ok(), "call {} should succeed", call);
            }
        }
    }

    #[test]
    fn platform_name() {
        assert_eq!(FakeProvider::new().platform(), "fake");
    }
}
