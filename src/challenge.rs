use std::{fmt, str::FromStr};

use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{base64::Base64, order::Authorization};

/// 定義與挑戰（Challenge）流程相關的錯誤類型。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("Unsupported challenge type: {0}")]
    UnsupportedType(String),
    /// 授權中沒有任何提供者能處理的挑戰類型。
    #[error("No supported challenge for {domain}; server offered {offered:?}")]
    NoSupportedChallenge {
        domain: String,
        offered: Vec<String>,
    },
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
        }
    }
}

impl FromStr for ChallengeType {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http-01" => Ok(Self::Http01),
            "dns-01" => Ok(Self::Dns01),
            other => Err(ChallengeError::UnsupportedType(other.to_string())),
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示 ACME 挑戰的狀態，用來追蹤挑戰進展。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 一次憑證申請中，針對單一授權所選定的挑戰。
///
/// 在取得授權時建立，交給提供者發佈與清除，申請結束後即丟棄。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// 識別項的值（域名）
    pub domain: String,
    /// 授權是否屬於萬用字元域名
    pub wildcard: bool,
    pub challenge_type: ChallengeType,
    /// 挑戰 token
    pub token: String,
    /// `token + "." + JWK 縮影`
    pub key_authorization: String,
    pub authorization_url: String,
    pub challenge_url: String,
}

impl Challenge {
    /// 從授權物件中選出類型屬於 `chal_types` 的挑戰，並建立 key authorization。
    ///
    /// 有多個符合時，取伺服器列出的最後一個。
    ///
    /// # 參數
    /// - `authorization_url`: 授權資訊的 URL。
    /// - `authorization`: 伺服器回傳的授權物件。
    /// - `chal_types`: 提供者能處理的挑戰類型。
    /// - `thumbprint`: 帳戶 JWK 縮影。
    pub fn select(
        authorization_url: &str,
        authorization: &Authorization,
        chal_types: &[ChallengeType],
        thumbprint: &str,
    ) -> Result<Self> {
        let selected = authorization.challenges.iter().rev().find_map(|c| {
            c.type_
                .parse::<ChallengeType>()
                .ok()
                .filter(|t| chal_types.contains(t))
                .map(|t| (t, c))
        });

        let (challenge_type, entry) =
            selected.ok_or_else(|| ChallengeError::NoSupportedChallenge {
                domain: authorization.identifier.value.clone(),
                offered: authorization
                    .challenges
                    .iter()
                    .map(|c| c.type_.clone())
                    .collect(),
            })?;

        Ok(Self {
            domain: authorization.identifier.value.clone(),
            wildcard: authorization.wildcard,
            challenge_type,
            token: entry.token.clone(),
            key_authorization: key_authorization(&entry.token, thumbprint),
            authorization_url: authorization_url.to_string(),
            challenge_url: entry.url.clone(),
        })
    }

    /// 識別項的值，提供者以此決定發佈位置。
    pub fn ident_value(&self) -> &str {
        &self.domain
    }

    /// DNS-01 的 TXT 記錄值：`base64url(SHA-256(key authorization))`。
    pub fn dns_txt_value(&self) -> String {
        Base64::new(sha256(self.key_authorization.as_bytes())).base64_url()
    }

    /// 針對 HTTP-01 挑戰返回應該作為 HTTP 文件內容的 key authorization，
    /// 若非 HTTP-01 則返回 `None`。
    pub fn http_content(&self) -> Option<&str> {
        if self.challenge_type == ChallengeType::Http01 {
            Some(&self.key_authorization)
        } else {
            None
        }
    }
}

/// 組合 key authorization。
pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}
