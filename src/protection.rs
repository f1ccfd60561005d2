use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
    nonce::{NonceError, NonceT},
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Nonce 相關錯誤
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

/// 自定義的結果型別，錯誤類型為 [`ProtectionError`]
type Result<T> = std::result::Result<T, ProtectionError>;

/// 請求者的身分：註冊時帶完整 JWK，之後一律改用帳戶 URL。
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    Jwk(JsonValue),
    Kid(String),
}

/// 用於生成保護頭（Protected Header）的結構體。
pub struct Protection<'a> {
    nonce: &'a dyn NonceT,
    alg: &'static str,
    credential: Option<Credential>,
}

/// JWS 保護頭 `{alg, nonce, url, jwk | kid}`。
#[derive(Debug, Serialize)]
pub struct ProtectedHeader {
    alg: &'static str,
    nonce: String,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl ProtectedHeader {
    /// 將 [`ProtectedHeader`] 序列化後轉換為 Base64 格式。
    ///
    /// # Errors
    ///
    /// 如果序列化過程中發生錯誤，將返回 [`ProtectionError::Serialization`]。
    pub fn to_base64(&self) -> Result<Base64> {
        let json_str = serde_json::to_string(self)?;
        Ok(Base64::new(json_str.as_bytes()))
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }
}

impl<'a> Protection<'a> {
    /// 建立一個新的 [`Protection`] 實例。
    ///
    /// # 參數
    ///
    /// - `nonce`: 實現了 [`NonceT`] trait 的 nonce 取得器。
    /// - `alg`: 金鑰描述符提供的 JWS 演算法標記，例如 "RS256"、"ES384"。
    pub fn new(nonce: &'a dyn NonceT, alg: &'static str) -> Self {
        Self {
            nonce,
            alg,
            credential: None,
        }
    }

    /// 以 JWK 識別請求者（僅用於 `newAccount`）。
    pub fn with_jwk(mut self, jwk: &Jwk) -> Result<Self> {
        self.credential = Some(Credential::Jwk(jwk.to_value()?));
        Ok(self)
    }

    /// 以帳戶 URL 識別請求者。
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.credential = Some(Credential::Kid(kid.into()));
        self
    }

    /// 根據目前設定的參數生成一個 [`ProtectedHeader`]。
    ///
    /// 每次呼叫都會向 `nonce` 提供器取得新的 nonce。
    ///
    /// # Errors
    ///
    /// 若取得 nonce 時發生錯誤，則返回 [`ProtectionError::Nonce`]。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = self.nonce.get()?;

        let (jwk, kid) = match &self.credential {
            Some(Credential::Jwk(value)) => (Some(value.clone()), None),
            Some(Credential::Kid(kid)) => (None, Some(kid.clone())),
            None => (None, None),
        };

        Ok(ProtectedHeader {
            alg: self.alg,
            nonce,
            url: url.into(),
            jwk,
            kid,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{key_pair::KeyPair, nonce::MockNonce};

    use super::*;

    #[test]
    fn test_jwk_handling() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let key = KeyPair::create("secp256r1").unwrap();

        let header = Protection::new(&nonce, key.alg())
            .with_jwk(key.jwk().unwrap())?
            .create_header("https://example.com/new-acct")?;

        let value = serde_json::to_value(&header)?;
        assert_eq!(value["alg"], "ES256");
        assert_eq!(value["jwk"]["kty"], "EC");
        assert_eq!(value["jwk"]["crv"], "P-256");
        assert!(value.get("kid").is_none());
        Ok(())
    }

    #[test]
    fn test_kid_handling() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let header = Protection::new(&nonce, "RS256")
            .with_kid("https://example.com/acct/1")
            .create_header("https://example.com/order")?;

        assert_eq!(header.kid(), Some("https://example.com/acct/1"));
        let value = serde_json::to_value(&header)?;
        assert!(value.get("jwk").is_none());
        Ok(())
    }

    #[test]
    fn test_header_serialization() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let header = Protection::new(&nonce, "ES384")
            .with_kid("kid-1")
            .create_header("https://example.com")?;

        let decoded = Base64::decode_url(header.to_base64()?.as_str()).unwrap();
        let json = String::from_utf8(decoded).unwrap();
        assert!(json.contains("\"nonce\":\"test-nonce\""));
        assert!(json.contains("\"url\":\"https://example.com\""));
        assert!(json.contains("\"alg\":\"ES384\""));
        assert_eq!(header.nonce(), "test-nonce");
        Ok(())
    }
}
