//! 訂單與授權物件：伺服器回應的資料結構與狀態列舉。

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{challenge::ChallengeStatus, payload::Identifier};

/// 無法辨識的狀態字串。
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid status value: {0}")]
pub struct InvalidStatus(pub String);

/// 訂單狀態，目前支援的狀態有 pending、ready、processing、valid 與 invalid。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl FromStr for OrderStatus {
    type Err = InvalidStatus;

    /// 根據字串內容解析對應的訂單狀態
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "processing" => Ok(Self::Processing),
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }
}

/// 授權狀態。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }

    /// 伺服器不會再把這些狀態改回 valid。
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(self, Self::Pending | Self::Valid)
    }
}

impl FromStr for AuthorizationStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            "deactivated" => Ok(Self::Deactivated),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            _ => Err(InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `newOrder` 回傳的訂單物件。
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// 訂單當前狀態
    pub status: OrderStatus,
    /// 過期時間（RFC 3339 字串）
    pub expires: Option<String>,
    /// 主域名與所有 SAN 的識別項
    pub identifiers: Vec<Identifier>,
    /// 每個識別項一個授權 URL
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    pub certificate: Option<String>,
    /// 伺服器以 `Location` 標頭回傳的訂單 URL
    #[serde(skip)]
    pub order_url: Option<String>,
}

/// 授權物件中的單一挑戰項目。
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationChallenge {
    #[serde(rename = "type")]
    pub type_: String,
    pub url: String,
    pub token: String,
    pub status: ChallengeStatus,
}

/// 授權物件。
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub expires: Option<String>,
    #[serde(default)]
    pub challenges: Vec<AuthorizationChallenge>,
    #[serde(default)]
    pub wildcard: bool,
}

/// `finalize` 回傳的訂單更新。
#[derive(Debug, Deserialize)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub certificate: Option<String>,
}
