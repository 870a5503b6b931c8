pub mod fake;
pub mod fcm;
pub mod wns;

pub use fake::FakeProvider;
pub use fcm::FcmProvider;
pub use wns::WnsProvider;

use crate::domain::service::push_provider::{FailureCategory, SendFailure};

/// バックエンドの HTTP ステータスを失敗カテゴリへ分類する。
/// 両方の実プロバイダで共通のマッピング。
pub(crate) fn classify_status(status: u16) -> FailureCategory {
    match status {
        400 => FailureCategory::InvalidPayload,
        401 => FailureCategory::Unauthorized,
        404 => FailureCategory::InvalidToken,
        429 => FailureCategory::RateLimited,
        500 | 503 => FailureCategory::ServiceUnavailable,
        _ => FailureCategory::Unknown,
    }
}

/// reqwest のトランスポートエラー（接続失敗・タイムアウト）を
/// NetworkError の SendFailure へ変換する。
pub(crate) fn transport_failure(context: &str, err: &reqwest::Error) -> SendFailure {
    SendFailure::new(
        FailureCategory::NetworkError,
        format!("{}: {}", context, err),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_table() {
        assert_eq!(classify_status(400), FailureCategory::InvalidPayload);
        assert_eq!(classify_status(401), FailureCategory::Unauthorized);
        assert_eq!(classify_status(404), FailureCategory::InvalidToken);
        assert_eq!(classify_status(429), FailureCategory::RateLimited);
        assert_eq!(classify_status(500), FailureCategory::ServiceUnavailable);
        assert_eq!(classify_status(503), FailureCategory::ServiceUnavailable);

        assert_eq!(classify_status(402), FailureCategory::Unknown);
        assert_eq!(classify_status(410), FailureCategory::Unknown);
        assert_eq!(classify_status(502), FailureCategory::Unknown);
    }
}
