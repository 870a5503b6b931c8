use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::service::push_provider::PushProvider;

/// RegistryError はレジストリ構築時のエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider already registered for platform: {0}")]
    Duplicate(String),

    #[error("provider platform name must not be empty")]
    EmptyPlatform,
}

/// ProviderRegistry はプラットフォーム名からプロバイダを解決する。
///
/// キーは大文字小文字を区別しない。起動時に構成から組み立てられ、
/// 同一キーへの二重登録は構築時に拒否する。
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn PushProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// プロバイダを登録する。`provider.platform()` がキーになる。
    pub fn register(&mut self, provider: Arc<dyn PushProvider>) -> Result<(), RegistryError> {
        let platform = provider.platform().trim().to_lowercase();
        if platform.is_empty() {
            return Err(RegistryError::EmptyPlatform);
        }
        if self.providers.contains_key(&platform) {
            return Err(RegistryError::Duplicate(platform));
        }
        self.providers.insert(platform, provider);
        Ok(())
    }

    /// プラットフォーム名でプロバイダを解決する。
    /// 未登録または空文字の場合は None を返す。
    pub fn resolve(&self, platform: &str) -> Option<Arc<dyn PushProvider>> {
        let key = platform.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        self.providers.get(&key).cloned()
    }

    /// 登録済みプラットフォーム名の一覧を返す。
    pub fn platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
