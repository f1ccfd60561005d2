use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("directory_url must not be empty")]
    EmptyDirectoryUrl,
    #[error("auth_status_max_checks must be at least 1")]
    ZeroMaxChecks,
    #[error("request_timeout must be greater than zero")]
    ZeroRequestTimeout,
}

/// ACME 引擎設定。
///
/// 可直接從設定檔反序列化；未出現的欄位使用預設值。時間欄位的單位皆為秒。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// CA 目錄 URL（預設 Let's Encrypt 正式環境）
    #[serde(default = "default_directory_url")]
    pub directory_url: String,

    /// 每個 HTTP 請求的逾時
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// 兩次授權狀態檢查之間的等待時間
    #[serde(default = "default_auth_status_wait_period")]
    pub auth_status_wait_period: u64,

    /// 授權狀態最多檢查幾次
    #[serde(default = "default_auth_status_max_checks")]
    pub auth_status_max_checks: u32,

    /// 是否驗證 CA 的 TLS 證書；測試用的 CA（例如 pebble）可關閉
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// 帳戶聯絡信箱
    pub contact_email: Option<String>,

    /// 帳戶金鑰是否為新產生的；否則以 `onlyReturnExisting` 查詢既有帳戶
    #[serde(default)]
    pub is_new_account: bool,

    /// User-Agent 標頭，預設為 `racme-issuer/<版本>`
    pub user_agent: Option<String>,

    /// 下載內容之後額外附加的 CA 鏈 PEM
    pub ca_chain_pem: Option<String>,
}

fn default_directory_url() -> String {
    LETSENCRYPT_PRODUCTION.to_string()
}

fn default_request_timeout() -> u64 {
    7
}

fn default_auth_status_wait_period() -> u64 {
    8
}

fn default_auth_status_max_checks() -> u32 {
    3
}

fn default_verify_tls() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            directory_url: default_directory_url(),
            request_timeout: default_request_timeout(),
            auth_status_wait_period: default_auth_status_wait_period(),
            auth_status_max_checks: default_auth_status_max_checks(),
            verify_tls: default_verify_tls(),
            contact_email: None,
            is_new_account: false,
            user_agent: None,
            ca_chain_pem: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory_url.trim().is_empty() {
            return Err(ConfigError::EmptyDirectoryUrl);
        }
        if self.auth_status_max_checks == 0 {
            return Err(ConfigError::ZeroMaxChecks);
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn auth_status_wait_period(&self) -> Duration {
        Duration::from_secs(self.auth_status_wait_period)
    }

    /// 實際送出的 User-Agent。
    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.directory_url, LETSENCRYPT_PRODUCTION);
        assert_eq!(config.request_timeout(), Duration::from_secs(7));
        assert_eq!(config.auth_status_wait_period(), Duration::from_secs(8));
        assert_eq!(config.auth_status_max_checks, 3);
        assert!(config.verify_tls);
        assert!(!config.is_new_account);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.user_agent(),
            format!("racme-issuer/{}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig = serde_json::from_str(&format!(
            r#"{{"directory_url": "{}", "auth_status_max_checks": 5, "contact_email": "a@b.c"}}"#,
            LETSENCRYPT_STAGING
        ))
        .unwrap();
        assert_eq!(config.directory_url, LETSENCRYPT_STAGING);
        assert_eq!(config.auth_status_max_checks, 5);
        assert_eq!(config.auth_status_wait_period, 8);
        assert_eq!(config.contact_email.as_deref(), Some("a@b.c"));

        let empty: ClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ClientConfig::default());
    }

    #[test]
    fn test_validate() {
        let config = ClientConfig {
            auth_status_max_checks: 0,
            ..ClientConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxChecks));

        let config = ClientConfig {
            directory_url: " ".into(),
            ..ClientConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyDirectoryUrl));
    }
}
