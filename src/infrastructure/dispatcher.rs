use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::entity::notification_message::NotificationMessage;
use crate::domain::repository::{NotificationMessageRepository, OutboxError};
use crate::domain::service::{
    FailureCategory, ProviderRegistry, PushProvider, RetryPolicy, SendFailure,
};
use crate::infrastructure::config::DispatcherConfig;

/// プロバイダ呼び出し 1 回あたりの外側デッドライン。
/// 超過はトランスポート障害として扱う。
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatcher はアウトボックスをポーリングして通知を配送するバックグラウンドループ。
///
/// 1 サイクルで Pending → Failed の順に claim し、各行の配送を
/// `max_concurrency` のセマフォで束ねた並行タスクとして実行する。
/// プロセス間の調整はすべてストア側の claim が担うため、
/// 複数インスタンスを同じデータベースに向けて動かしてよい。
pub struct Dispatcher {
    repo: Arc<dyn NotificationMessageRepository>,
    registry: Arc<ProviderRegistry>,
    retry_policy: RetryPolicy,
    config: DispatcherConfig,
    semaphore: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<dyn NotificationMessageRepository>,
        registry: Arc<ProviderRegistry>,
        retry_policy: RetryPolicy,
        config: DispatcherConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            repo,
            registry,
            retry_policy,
            config,
            semaphore,
        }
    }

    /// キャンセルされるまでポーリングサイクルを繰り返す。
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval_secs,
            max_concurrency = self.config.max_concurrency,
            "dispatcher started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(&cancel).await {
                Ok(0) => {}
                Ok(dispatched) => debug!(dispatched, "dispatch cycle complete"),
                Err(e) => error!(error = %e, "dispatch cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
            }
        }

        info!("dispatcher stopped");
    }

    /// 1 回分のポーリングサイクルを実行する。
    /// スケジュールした配送数を返し、すべての配送完了を待ってから戻る。
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<u32, OutboxError> {
        // 可視性タイムアウトを超えて Processing のまま残った行を回収する
        match self
            .repo
            .release_stuck(Duration::from_secs(self.config.visibility_timeout_secs))
            .await
        {
            Ok(0) => {}
            Ok(released) => warn!(released, "returned stuck processing rows to pending"),
            Err(e) => error!(error = %e, "failed to release stuck rows"),
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut scheduled = 0u32;

        let pending = self.repo.claim_pending(self.config.batch_size).await?;
        for message in pending {
            if cancel.is_cancelled() {
                break;
            }
            scheduled += 1;
            handles.push(self.spawn_dispatch(message, cancel.clone()));
        }

        if !cancel.is_cancelled() {
            let failed = self.repo.claim_failed(self.config.batch_size).await?;
            for message in failed {
                if cancel.is_cancelled() {
                    break;
                }
                scheduled += 1;
                handles.push(self.spawn_dispatch(message, cancel.clone()));
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "dispatch task panicked");
            }
        }

        Ok(scheduled)
    }

    fn spawn_dispatch(
        &self,
        message: NotificationMessage,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let repo = self.repo.clone();
        let registry = self.registry.clone();
        let retry_policy = self.retry_policy.clone();
        let semaphore = self.semaphore.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            dispatch_message(repo, registry, retry_policy, message, cancel).await;
        })
    }
}

/// claim 済みの 1 行を配送し、結果をストアへ書き戻す。
async fn dispatch_message(
    repo: Arc<dyn NotificationMessageRepository>,
    registry: Arc<ProviderRegistry>,
    retry_policy: RetryPolicy,
    mut message: NotificationMessage,
    cancel: CancellationToken,
) {
    let provider = match registry.resolve(&message.target_platform) {
        Some(provider) => provider,
        None => {
            warn!(
                id = %message.id,
                platform = %message.target_platform,
                "no provider registered, dead-lettering"
            );
            message.mark_dead_lettered(
                &format!("no provider registered for platform '{}'", message.target_platform),
                FailureCategory::PlatformNotSupported,
            );
            persist_outcome(&repo, &message).await;
            return;
        }
    };

    let data = parse_data(&message);

    // キャンセルは future のドロップで伝える。
    // 送信中にキャンセルされた試行は Sent にせず、リトライ可能な Unknown として扱う。
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(SendFailure::new(
            FailureCategory::Unknown,
            "delivery cancelled mid-flight",
        )),
        result = tokio::time::timeout(
            SEND_TIMEOUT,
            provider.send(&message.device_token, &message.title, &message.body, &data),
        ) => match result {
            Ok(send_result) => send_result,
            Err(_) => Err(SendFailure::new(
                FailureCategory::NetworkError,
                format!("provider call exceeded {}s deadline", SEND_TIMEOUT.as_secs()),
            )),
        },
    };

    match outcome {
        Ok(()) => {
            info!(id = %message.id, platform = %message.target_platform, "notification sent");
            message.mark_sent();
        }
        Err(failure) => {
            let will_retry = failure.retryable()
                && retry_policy.should_retry(message.retry_count + 1, message.max_retries);
            warn!(
                id = %message.id,
                platform = %message.target_platform,
                category = %failure.category,
                retryable = failure.retryable(),
                will_retry,
                error = %failure,
                "notification delivery failed"
            );
            let delay = retry_policy.delay(message.retry_count);
            message.mark_failed(&failure.to_string(), failure.category, delay);
        }
    }

    persist_outcome(&repo, &message).await;
}

async fn persist_outcome(
    repo: &Arc<dyn NotificationMessageRepository>,
    message: &NotificationMessage,
) {
    match repo.update_claimed(message).await {
        Ok(true) => {}
        Ok(false) => {
            // 別ワーカーに奪われたか、終端化済み。書き戻しは破棄する。
            warn!(id = %message.id, "claim was lost, abandoning outcome");
        }
        Err(e) => {
            // 行は Processing のまま残り、可視性タイムアウト後に回収される
            error!(id = %message.id, error = %e, "failed to persist dispatch outcome");
        }
    }
}

fn parse_data(message: &NotificationMessage) -> HashMap<String, String> {
    match &message.data {
        None => HashMap::new(),
        Some(raw) => match serde_json::from_str(raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    id = %message.id,
                    error = %e,
                    "failed to parse notification data, sending without it"
                );
                HashMap::new()
            }
        },
    }
}
