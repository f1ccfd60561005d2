//! ACME 帳戶：一把帳戶金鑰，加上註冊後由伺服器指派的 `kid`（帳戶 URL）。
//!
//! 帳戶檔沿用 PKCS#8 PEM，並可在 PEM 之前附加 `KID:` 與 `Timestamp:` 兩行純文字。

use std::{fs, io, path::Path, sync::OnceLock};

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use crate::{
    jwk::{Jwk, JwkError},
    key_pair::{KeyError, KeyPair},
    signature::SignatureError,
};

/// `kid` 單次賦值規則被違反時的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KidError {
    #[error("Account kid is already {current}, refusing to replace it with {new}")]
    Conflict { current: String, new: String },
    #[error("Account kid has not been set; register the account first")]
    NotSet,
}

/// 帳戶相關操作的錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Kid error: {0}")]
    Kid(#[from] KidError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid account file header line: {0}")]
    InvalidHeader(String),
}

type Result<T> = std::result::Result<T, AccountError>;

const KID_PREFIX: &str = "KID:";
const TIMESTAMP_PREFIX: &str = "Timestamp:";

/// 表示 ACME 帳戶。
///
/// `kid` 與註冊時間只能設定一次，因此帳戶可以安全地在多個執行緒間共用；
/// JWK 另外快取一份，註冊後改用 `kid` 驗證時不再重算。
#[derive(Debug)]
pub struct Account {
    key_pair: KeyPair,
    kid: OnceLock<String>,
    timestamp: OnceLock<f64>,
    jwk: OnceLock<Jwk>,
}

impl Account {
    /// 以既有金鑰建立尚未註冊的帳戶。
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            kid: OnceLock::new(),
            timestamp: OnceLock::new(),
            jwk: OnceLock::new(),
        }
    }

    /// 產生指定類型的新帳戶金鑰。
    pub fn create(key_type: &str) -> Result<Self> {
        Ok(Self::new(KeyPair::create(key_type)?))
    }

    /// 從帳戶檔內容載入帳戶。
    ///
    /// PEM 之前的 `KID: <url>` 與 `Timestamp: <秒數>` 行會被解析，其餘前置行一律忽略；
    /// 不含前置行的一般私鑰 PEM 也可接受。
    pub fn from_pem(data: &[u8]) -> Result<Self> {
        let account = Self::new(KeyPair::from_pem(data)?);

        let mut kid = None;
        let text = String::from_utf8_lossy(data);
        for line in text.lines().take_while(|l| !l.starts_with("-----BEGIN")) {
            let line = line.trim();
            if let Some(value) = line.strip_prefix(KID_PREFIX) {
                kid = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix(TIMESTAMP_PREFIX) {
                let ts: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| AccountError::InvalidHeader(line.to_string()))?;
                let _ = account.timestamp.set(ts);
            }
        }
        // 時間戳須先於 kid 設定，否則 set_kid 會記錄成現在時間。
        if let Some(kid) = kid {
            account.set_kid(&kid)?;
        }

        Ok(account)
    }

    /// 從檔案載入帳戶。
    pub fn read_pem<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_pem(&fs::read(path)?)
    }

    /// 序列化為帳戶檔格式；尚未註冊時只輸出 PKCS#8 PEM。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if let Some(kid) = self.kid.get() {
            out.extend(format!("{} {}\n", KID_PREFIX, kid).into_bytes());
        }
        if let Some(ts) = self.timestamp.get() {
            out.extend(format!("{} {}\n", TIMESTAMP_PREFIX, ts).into_bytes());
        }
        out.extend(self.key_pair.to_pem()?);
        Ok(out)
    }

    /// 將帳戶檔寫入磁碟。
    pub fn write_pem<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_pem()?)?;
        Ok(())
    }

    /// 設定帳戶 URL。
    ///
    /// 相同的值重複設定視為成功；嘗試改成不同的值回傳 `KidError::Conflict`。
    /// 第一次設定時同時記錄註冊時間。
    pub fn set_kid(&self, kid: &str) -> std::result::Result<(), KidError> {
        match self.kid.set(kid.to_string()) {
            Ok(()) => {
                let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
                let _ = self.timestamp.set(now);
                debug!(kid, "account kid set");
                Ok(())
            }
            Err(new) => {
                let current = self.kid.get().cloned().unwrap_or_default();
                if current == new {
                    Ok(())
                } else {
                    Err(KidError::Conflict { current, new })
                }
            }
        }
    }

    /// 讀取帳戶 URL，尚未註冊時回傳 `KidError::NotSet`。
    pub fn get_kid(&self) -> std::result::Result<&str, KidError> {
        self.kid.get().map(String::as_str).ok_or(KidError::NotSet)
    }

    pub fn has_kid(&self) -> bool {
        self.kid.get().is_some()
    }

    /// 註冊時間（Unix 秒數，含小數）。
    pub fn timestamp(&self) -> Option<f64> {
        self.timestamp.get().copied()
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// 帳戶 JWK，快取在帳戶自己的欄位中。
    pub fn jwk(&self) -> Result<&Jwk> {
        if let Some(jwk) = self.jwk.get() {
            return Ok(jwk);
        }
        let jwk = Jwk::from_key_pair(&self.key_pair)?;
        Ok(self.jwk.get_or_init(|| jwk))
    }

    /// JWK 縮影，用於組成 key authorization。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint()?)
    }

    pub fn alg(&self) -> &'static str {
        self.key_pair.alg()
    }

    pub fn sign_message(&self, message: &[u8]) -> std::result::Result<Vec<u8>, SignatureError> {
        self.key_pair.sign_message(message)
    }
}
