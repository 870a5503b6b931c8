use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

/// FailureCategory は送信失敗の抽象的な理由を表す閉じた集合。
/// リトライ可否と運用トリアージの両方がこのカテゴリから導かれる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// 分類不能な失敗（リトライ対象）
    Unknown,
    /// トランスポート層の失敗・タイムアウト
    NetworkError,
    /// バックエンドの一時的な障害（500 / 503）
    ServiceUnavailable,
    /// レート制限（429）
    RateLimited,
    /// デバイストークンが無効（404）
    InvalidToken,
    /// ペイロードがバックエンドに拒否された（400）
    InvalidPayload,
    /// 認証失敗（401）
    Unauthorized,
    /// 対応するプロバイダが登録されていない
    PlatformNotSupported,
}

impl FailureCategory {
    /// カテゴリ名を文字列に変換する（DB保存用）。
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Unknown => "Unknown",
            FailureCategory::NetworkError => "NetworkError",
            FailureCategory::ServiceUnavailable => "ServiceUnavailable",
            FailureCategory::RateLimited => "RateLimited",
            FailureCategory::InvalidToken => "InvalidToken",
            FailureCategory::InvalidPayload => "InvalidPayload",
            FailureCategory::Unauthorized => "Unauthorized",
            FailureCategory::PlatformNotSupported => "PlatformNotSupported",
        }
    }

    /// このカテゴリの失敗を再試行してよいかどうかを返す。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureCategory::Unknown
                | FailureCategory::NetworkError
                | FailureCategory::ServiceUnavailable
                | FailureCategory::RateLimited
        )
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SendFailure は分類済みの送信失敗を表す。
///
/// プロバイダはすべての失敗をいずれかの `FailureCategory` に分類して返す。
/// リトライ可否はカテゴリと常に一貫する。
#[derive(Debug, Clone, thiserror::Error)]
#[error("{category}: {message}")]
pub struct SendFailure {
    pub message: String,
    /// バックエンドが HTTP ステータスを返した場合のコード
    pub status_code: Option<u16>,
    pub category: FailureCategory,
}

impl SendFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: None,
            category,
        }
    }

    pub fn with_status(category: FailureCategory, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: Some(status_code),
            category,
        }
    }

    pub fn retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

/// PushProvider はプラットフォームごとの送信プリミティブ。
///
/// ネットワーク I/O・認証・バックエンド固有のペイロード組み立ては
/// すべてプロバイダの責務。キャンセルは呼び出し側が future のドロップで行う。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// このプロバイダが担当するプラットフォーム名。
    fn platform(&self) -> &str;

    /// 1 件の通知をバックエンドへ送信する。
    async fn send(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
    ) -> Result<(), SendFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_category() {
        assert!(FailureCategory::Unknown.is_retryable());
        assert!(FailureCategory::NetworkError.is_retryable());
        assert!(FailureCategory::ServiceUnavailable.is_retryable());
        assert!(FailureCategory::RateLimited.is_retryable());

        assert!(!FailureCategory::InvalidToken.is_retryable());
        assert!(!FailureCategory::InvalidPayload.is_retryable());
        assert!(!FailureCategory::Unauthorized.is_retryable());
        assert!(!FailureCategory::PlatformNotSupported.is_retryable());
    }

    #[test]
    fn send_failure_retryable_matches_category() {
        let transient = SendFailure::with_status(FailureCategory::ServiceUnavailable, 503, "boom");
        assert!(transient.retryable());
        assert_eq!(transient.status_code, Some(503));

        let terminal = SendFailure::new(FailureCategory::InvalidToken, "gone");
        assert!(!terminal.retryable());
        assert!(terminal.status_code.is_none());
    }

    #[test]
    fn send_failure_display_includes_category() {
        let failure = SendFailure::new(FailureCategory::RateLimited, "slow down");
        assert_eq!(failure.to_string(), "RateLimited: slow down");
    }
}
