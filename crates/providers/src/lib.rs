//! Model provider implementations for taskloop.
//!
//! All providers implement the `taskloop_core::Provider` trait.
//! [`build_provider`] wires the configured backend behind the retry layer.

pub mod anthropic;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use retry::{RetryPolicy, RetryProvider};

use std::sync::Arc;
use taskloop_config::AppConfig;
use taskloop_core::error::ProviderError;

/// Build the provider described by the configuration.
pub fn build_provider(
    config: &AppConfig,
) -> std::result::Result<Arc<dyn taskloop_core::Provider>, ProviderError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured(
            "No API key. Set TASKLOOP_API_KEY or ANTHROPIC_API_KEY, or add api_key to config.toml"
                .into(),
        )
    })?;

    let mut anthropic = AnthropicProvider::new(api_key);
    if let Some(ref url) = config.base_url {
        anthropic = anthropic.with_base_url(url);
    }

    Ok(Arc::new(RetryProvider::new(
        Arc::new(anthropic),
        RetryPolicy::from(&config.retry),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_api_key() {
        let config = AppConfig::default();
        assert!(matches!(
            build_provider(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn build_wraps_anthropic() {
        let config = AppConfig {
            api_key: Some("sk-ant-test".into()),
            ..AppConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
