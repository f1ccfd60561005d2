//! 挑戰提供者：負責發佈與清除挑戰回應。
//!
//! 引擎把同一張憑證的所有挑戰一次交給提供者，能批次處理多個域名的提供者
//! 可以一次完成。個別挑戰的問題以 [`Errata`] 回報，而不是回傳錯誤。

use std::{collections::BTreeMap, fmt, str::FromStr, time::Duration};

use thiserror::Error;

use crate::challenge::{Challenge, ChallengeError, ChallengeType};

pub mod cloudflare;
pub mod manual;
pub mod registry;
pub mod webroot;

pub use cloudflare::CloudflareProvider;
pub use manual::ManualProvider;
pub use registry::{ProviderConstructor, ProviderRegistry};
pub use webroot::WebrootProvider;

/// 建立提供者時的錯誤。
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("Missing required option: {0}")]
    MissingOption(&'static str),
    #[error("Invalid value for option {name}: {value}")]
    InvalidOption { name: String, value: String },
    #[error("Unknown or redundant option(s): {0:?}")]
    UnknownOptions(Vec<String>),
    #[error("A provider must declare at least one challenge type")]
    NoChallengeTypes,
    #[error("prop_sleep_times must not be empty")]
    EmptySleepTimes,
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    /// 第三方 API 回報失敗。
    #[error("API error: {0}")]
    Api(String),
}

type Result<T> = std::result::Result<T, ProviderError>;

/// Errata 的狀態標記。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrataStatus {
    /// 操作失敗。
    Failed,
    /// 已發佈但尚未可見。
    Unready,
}

impl ErrataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Unready => "unready",
        }
    }
}

/// 單一挑戰的問題回報：（狀態、訊息、挑戰）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Errata {
    pub status: ErrataStatus,
    pub message: String,
    pub challenge: Challenge,
}

impl Errata {
    pub fn failed(message: impl Into<String>, challenge: &Challenge) -> Self {
        Self {
            status: ErrataStatus::Failed,
            message: message.into(),
            challenge: challenge.clone(),
        }
    }

    pub fn unready(message: impl Into<String>, challenge: &Challenge) -> Self {
        Self {
            status: ErrataStatus::Unready,
            message: message.into(),
            challenge: challenge.clone(),
        }
    }
}

impl fmt::Display for Errata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.status.as_str(),
            self.challenge.domain,
            self.message
        )
    }
}

/// 傳播等待的時間設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    delay: Duration,
    timeout: Duration,
    sleep_times: Vec<Duration>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            timeout: Duration::ZERO,
            sleep_times: [1, 2, 4, 8].map(Duration::from_secs).to_vec(),
        }
    }
}

impl PropagationConfig {
    pub fn new(delay: Duration, timeout: Duration, sleep_times: Vec<Duration>) -> Result<Self> {
        if sleep_times.is_empty() {
            return Err(ProviderError::EmptySleepTimes);
        }
        Ok(Self {
            delay,
            timeout,
            sleep_times,
        })
    }

    /// 不延遲，每隔 `interval` 檢查一次，最多 `timeout`。
    pub fn every(timeout: Duration, interval: Duration) -> Self {
        Self {
            delay: Duration::ZERO,
            timeout,
            sleep_times: vec![interval],
        }
    }

    /// 第一次檢查前無條件等待的時間。
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 輪詢上限；為零時完全不輪詢。
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 退避序列，用完後重複最後一個值；保證非空。
    pub fn sleep_times(&self) -> &[Duration] {
        &self.sleep_times
    }

    /// 讀取 `prop_delay`、`prop_timeout`（秒）與 `prop_sleep_times`（以逗號分隔的秒數）。
    ///
    /// 未提供的項目沿用 `defaults`。
    pub fn from_options(options: &mut ProviderOptions, defaults: Self) -> Result<Self> {
        let delay = match options.take_parsed::<u64>("prop_delay")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.delay,
        };
        let timeout = match options.take_parsed::<u64>("prop_timeout")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.timeout,
        };
        let sleep_times = match options.take("prop_sleep_times") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>()
                        .map(Duration::from_secs)
                        .map_err(|_| ProviderError::InvalidOption {
                            name: "prop_sleep_times".to_string(),
                            value: raw.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?,
            None => defaults.sleep_times,
        };
        Self::new(delay, timeout, sleep_times)
    }
}

/// 提供者建構參數：字串鍵值對。
///
/// 建構函式以 `take` 取走自己認得的鍵，最後以 [`ProviderOptions::finish`]
/// 拒絕剩下的未知鍵。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderOptions {
    values: BTreeMap<String, String>,
}

impl ProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn require(&mut self, key: &'static str) -> Result<String> {
        self.take(key).ok_or(ProviderError::MissingOption(key))
    }

    pub fn take_parsed<T: FromStr>(&mut self, key: &str) -> Result<Option<T>> {
        match self.take(key) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| ProviderError::InvalidOption {
                    name: key.to_string(),
                    value: raw,
                }),
            None => Ok(None),
        }
    }

    /// 所有選項都已被取用時回傳 `Ok`。
    pub fn finish(self) -> Result<()> {
        if self.values.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::UnknownOptions(
                self.values.into_keys().collect(),
            ))
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ProviderOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// 挑戰提供者介面。
///
/// `setup` 回傳非空的 errata 代表發佈失敗，引擎會立即中止；
/// `unpropagated` 回傳尚未可見的挑戰，空清單代表全部就緒；
/// `clear` 盡力清除，回傳的 errata 只會被記錄。
pub trait Provider: Send + Sync + fmt::Debug {
    /// 提供者名稱，用於日誌。
    fn name(&self) -> &str;

    /// 可處理的挑戰類型，至少一種。
    fn chal_types(&self) -> &[ChallengeType];

    fn propagation(&self) -> &PropagationConfig;

    fn setup(&self, challenges: &[Challenge]) -> Vec<Errata>;

    fn unpropagated(&self, challenges: &[Challenge]) -> Vec<Errata>;

    fn clear(&self, challenges: &[Challenge]) -> Vec<Errata>;
}

/// 各提供者共用的設定：挑戰類型與傳播時間。
#[derive(Debug, Clone)]
pub struct ProviderBase {
    chal_types: Vec<ChallengeType>,
    propagation: PropagationConfig,
}

impl ProviderBase {
    pub fn new(chal_types: Vec<ChallengeType>, propagation: PropagationConfig) -> Result<Self> {
        if chal_types.is_empty() {
            return Err(ProviderError::NoChallengeTypes);
        }
        Ok(Self {
            chal_types,
            propagation,
        })
    }

    /// HTTP 提供者固定只處理 `http-01`。
    pub fn http(propagation: PropagationConfig) -> Self {
        Self {
            chal_types: vec![ChallengeType::Http01],
            propagation,
        }
    }

    pub fn dns(propagation: PropagationConfig) -> Self {
        Self {
            chal_types: vec![ChallengeType::Dns01],
            propagation,
        }
    }

    pub fn chal_types(&self) -> &[ChallengeType] {
        &self.chal_types
    }

    pub fn propagation(&self) -> &PropagationConfig {
        &self.propagation
    }
}

/// DNS 別名：把挑戰記錄放在另一個網域，並以 CNAME 指過去。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsAlias {
    alias: Option<String>,
}

impl DnsAlias {
    pub fn new(alias: Option<String>) -> Self {
        Self {
            alias: alias.filter(|a| !a.is_empty()),
        }
    }

    /// TXT 記錄實際所在的名稱：`_acme-challenge.<domain>`，
    /// 設定別名時為 `<domain>.<alias>`。
    pub fn target_domain(&self, challenge: &Challenge) -> String {
        match &self.alias {
            None => format!("_acme-challenge.{}", challenge.domain),
            Some(alias) => format!("{}.{}", challenge.domain, alias),
        }
    }

    /// 設定別名時，需要指向 [`DnsAlias::target_domain`] 的 CNAME 名稱。
    pub fn cname_domain(&self, challenge: &Challenge) -> Option<String> {
        self.alias
            .as_ref()
            .map(|_| format!("_acme-challenge.{}", challenge.domain))
    }
}
