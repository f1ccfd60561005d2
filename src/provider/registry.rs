use std::collections::BTreeMap;

use tracing::debug;

use super::{
    CloudflareProvider, ManualProvider, Provider, ProviderError, ProviderOptions, WebrootProvider,
};

/// 依名稱建立提供者的函式。
pub type ProviderConstructor = fn(ProviderOptions) -> Result<Box<dyn Provider>, ProviderError>;

/// 提供者名稱到建構函式的對照表。
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// 空的對照表。
    pub fn new() -> Self {
        Self::default()
    }

    /// 預先註冊 `manual`、`webroot` 與 `cloudflare`。
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("manual", |options| {
            Ok(Box::new(ManualProvider::from_options(options)?))
        });
        registry.register("webroot", |options| {
            Ok(Box::new(WebrootProvider::from_options(options)?))
        });
        registry.register("cloudflare", |options| {
            Ok(Box::new(CloudflareProvider::from_options(options)?))
        });
        registry
    }

    /// 註冊或取代同名的建構函式。
    pub fn register(&mut self, name: impl Into<String>, constructor: ProviderConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// 以名稱與選項建立提供者。
    pub fn create(
        &self,
        name: &str,
        options: ProviderOptions,
    ) -> Result<Box<dyn Provider>, ProviderError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))?;
        debug!(provider = name, "creating challenge provider");
        constructor(options)
    }
}
