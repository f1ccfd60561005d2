use std::collections::BTreeMap;

use openssl::sha::sha256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 從金鑰取出公開參數失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] openssl::error::ErrorStack),
    /// 描述符宣告的屬性數量與金鑰的公開參數數量不一致。
    #[error("Key descriptor {0} does not match its public numbers")]
    DescriptorMismatch(&'static str),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, JwkError>;

/// JSON Web Key (JWK) 的公開成員。
///
/// 成員以 `BTreeMap` 保存，序列化時一律依鍵名排序，
/// 因此 [`Jwk::to_acme_json`] 直接就是 RFC 7638 縮影所需的正規形式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jwk {
    members: BTreeMap<String, String>,
}

impl Jwk {
    /// 根據金鑰對的描述符產生 JWK：先放入常數欄位，再依序填入公開參數。
    ///
    /// RSA 的 `e`、`n` 為最短的大端序位元組；EC 的 `x`、`y` 補齊至曲線座標寬度，
    /// 以保留前導零位元組。
    pub fn from_key_pair(key_pair: &KeyPair) -> Result<Self> {
        let desc = key_pair.descriptor();
        let numbers = key_pair.public_numbers()?;
        if numbers.len() != desc.jwk_attr.len() {
            return Err(JwkError::DescriptorMismatch(desc.name));
        }

        let mut members: BTreeMap<String, String> = desc
            .jwk_const
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (name, value) in desc.jwk_attr.iter().zip(numbers) {
            let bytes = if desc.coordinate_bytes == 0 {
                value.to_vec()
            } else {
                value.to_vec_padded(desc.coordinate_bytes as i32)?
            };
            members.insert(name.to_string(), Base64::new(bytes).base64_url());
        }

        Ok(Self { members })
    }

    /// 取得指定成員的值。
    pub fn get(&self, name: &str) -> Option<&str> {
        self.members.get(name).map(String::as_str)
    }

    /// 取得金鑰類型（`RSA` 或 `EC`）。
    pub fn kty(&self) -> Option<&str> {
        self.get("kty")
    }

    /// 轉為 JSON 物件，供保護頭的 `jwk` 欄位使用。
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// 產生符合 ACME 協議要求的 JSON 表示：鍵名排序且不含空白。
    pub fn to_acme_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 計算 JWK 縮影：`base64url(SHA-256(正規 JSON))`。
    pub fn thumbprint(&self) -> Result<String> {
        let digest = sha256(self.to_acme_json()?.as_bytes());
        Ok(Base64::new(digest).base64_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_sorted_and_compact() {
        let jwk: Jwk =
            serde_json::from_str(r#"{"n": "0vx7", "kty": "RSA", "e": "AQAB"}"#).unwrap();
        assert_eq!(
            jwk.to_acme_json().unwrap(),
            r#"{"e":"AQAB","kty":"RSA","n":"0vx7"}"#
        );
        assert_eq!(jwk.kty(), Some("RSA"));
    }

    #[test]
    fn test_rfc7638_thumbprint() {
        // RFC 7638 §3.1 範例金鑰。
        let jwk: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "RSA",
            "e": "AQAB",
            "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw"
        }))
        .unwrap();
        assert_eq!(
            jwk.thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }
}
