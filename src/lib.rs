//! push-outbox-server: トランザクショナルアウトボックスに基づく
//! 耐久性のあるマルチプラットフォームプッシュ通知ディスパッチャ。
//!
//! HTTP で受け付けた通知を単一のアウトボックステーブルに永続化し、
//! バックグラウンドのポーリングディスパッチャがプラットフォームごとの
//! プロバイダへ配送する。配送はリトライ・冪等性・デッドレターを保証し、
//! 取り込みとディスパッチャの結合点はアウトボックスのみ。

pub mod adapter;
pub mod domain;
pub mod infrastructure;
pub mod usecase;
