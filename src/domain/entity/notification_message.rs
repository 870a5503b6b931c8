use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::service::push_provider::FailureCategory;

/// 永続化する際のエラーメッセージ上限。超過分は切り詰める。
const MAX_ERROR_LEN: usize = 2048;

/// MessageStatus は通知メッセージの処理ステータスを表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// 未処理（初期状態）
    Pending,
    /// 配送ワーカーが処理中
    Processing,
    /// 配送完了（終端）
    Sent,
    /// 配送失敗（リトライ対象）
    Failed,
    /// リトライ不能または試行上限超過（終端）
    DeadLettered,
}

impl MessageStatus {
    /// ステータスを文字列に変換する（DB保存用）。
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "Pending",
            MessageStatus::Processing => "Processing",
            MessageStatus::Sent => "Sent",
            MessageStatus::Failed => "Failed",
            MessageStatus::DeadLettered => "DeadLettered",
        }
    }

    /// 文字列からステータスを復元する（DB読み込み用）。
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(MessageStatus::Pending),
            "Processing" => Some(MessageStatus::Processing),
            "Sent" => Some(MessageStatus::Sent),
            "Failed" => Some(MessageStatus::Failed),
            "DeadLettered" => Some(MessageStatus::DeadLettered),
            _ => None,
        }
    }

    /// 終端状態かどうかを返す。終端状態からの遷移は存在しない。
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Sent | MessageStatus::DeadLettered)
    }
}

/// MessagePriority は配送優先度を表す（アドバイザリ）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "Low",
            MessagePriority::Normal => "Normal",
            MessagePriority::High => "High",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(MessagePriority::Low),
            "Normal" => Some(MessagePriority::Normal),
            "High" => Some(MessagePriority::High),
            _ => None,
        }
    }
}

/// NotificationMessage はアウトボックステーブルに格納する通知メッセージを表す。
///
/// ステータス遷移は `mark_*` メソッド経由でのみ行い、
/// 終端状態（Sent / DeadLettered）からの遷移は無視する。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// メッセージの一意識別子
    pub id: Uuid,
    /// 冪等キー（大文字小文字を区別する・グローバルに一意）
    pub idempotency_key: String,
    /// 配送先プラットフォーム名（プロバイダ解決は大文字小文字を区別しない）
    pub target_platform: String,
    /// プラットフォーム固有のデバイストークン
    pub device_token: String,
    pub title: String,
    pub body: String,
    /// 追加データ（JSON オブジェクト文字列・コアからは不透明）
    pub data: Option<String>,
    /// カンマ区切りタグ（不透明・そのまま保持する）
    pub tags: String,
    pub priority: MessagePriority,
    pub status: MessageStatus,
    /// 完了した送信試行の回数
    pub retry_count: u32,
    /// 最大試行回数
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// この時刻より前は配送対象にならない
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Sent へ遷移した時刻
    pub sent_at: Option<DateTime<Utc>>,
    /// 直近の送信試行開始時刻
    pub last_attempt_utc: Option<DateTime<Utc>>,
    /// 次回試行予定時刻（Failed のときのみ設定される）
    pub next_attempt_utc: Option<DateTime<Utc>>,
    /// 直近のプロバイダエラーメッセージ
    pub last_error: Option<String>,
    /// 直近の失敗カテゴリ名
    pub last_error_category: Option<String>,
}

impl NotificationMessage {
    /// 新しい Pending メッセージを生成する。
    pub fn new(
        idempotency_key: impl Into<String>,
        target_platform: impl Into<String>,
        device_token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.into(),
            target_platform: target_platform.into(),
            device_token: device_token.into(),
            title: title.into(),
            body: body.into(),
            data: None,
            tags: String::new(),
            priority: MessagePriority::Normal,
            status: MessageStatus::Pending,
            retry_count: 0,
            max_retries: 5,
            created_at: now,
            updated_at: now,
            scheduled_for: None,
            sent_at: None,
            last_attempt_utc: None,
            next_attempt_utc: None,
            last_error: None,
            last_error_category: None,
        }
    }

    /// メッセージを処理中状態に遷移する（claim 時に呼ばれる）。
    pub fn mark_processing(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = MessageStatus::Processing;
        self.last_attempt_utc = Some(now);
        self.updated_at = now;
    }

    /// メッセージを配送完了状態に遷移する。
    pub fn mark_sent(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.status = MessageStatus::Sent;
        self.sent_at = Some(now);
        self.last_error = None;
        self.last_error_category = None;
        self.next_attempt_utc = None;
        self.updated_at = now;
    }

    /// 完了した送信試行の失敗を記録する。
    ///
    /// 試行回数をインクリメントし、カテゴリがリトライ可能かつ
    /// 試行上限に達していなければ `Failed`（`next_attempt_utc = now + delay`）、
    /// それ以外は `DeadLettered` へ遷移する。
    pub fn mark_failed(&mut self, error: &str, category: FailureCategory, delay: Duration) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.retry_count += 1;
        self.set_error(error, category);
        if !category.is_retryable() || self.retry_count >= self.max_retries {
            self.status = MessageStatus::DeadLettered;
            self.next_attempt_utc = None;
        } else {
            self.status = MessageStatus::Failed;
            self.next_attempt_utc =
                Some(now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1)));
        }
        self.updated_at = now;
    }

    /// 送信試行を経ずにメッセージをデッドレターへ遷移する
    /// （未登録プラットフォームなど）。試行回数は変更しない。
    pub fn mark_dead_lettered(&mut self, reason: &str, category: FailureCategory) {
        if self.status.is_terminal() {
            return;
        }
        self.set_error(reason, category);
        self.status = MessageStatus::DeadLettered;
        self.next_attempt_utc = None;
        self.updated_at = Utc::now();
    }

    /// 運用者による再投入。Failed / DeadLettered の行を Pending へ戻し、
    /// リトライ状態をリセットする。
    pub fn requeue(&mut self) {
        self.status = MessageStatus::Pending;
        self.retry_count = 0;
        self.next_attempt_utc = None;
        self.last_error = None;
        self.last_error_category = None;
        self.updated_at = Utc::now();
    }

    /// 試行上限に達していないかどうかを返す。
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn set_error(&mut self, error: &str, category: FailureCategory) {
        let mut message = error.to_string();
        if message.len() > MAX_ERROR_LEN {
            let mut end = MAX_ERROR_LEN;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        self.last_error = Some(message);
        self.last_error_category = Some(category.as_str().to_string());
    }
}
