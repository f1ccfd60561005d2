//! 此模組提供 ACME 請求使用的扁平化 JSON Web Signature (JWS) 封包。

use std::result;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::Base64,
    key_pair::KeyPair,
    protection::{ProtectedHeader, ProtectionError},
    signature::{create_signature, SignatureError},
};

/// 表示一個 JSON Web Signature (JWS) 物件。
///
/// 此物件包含三個部分：
/// - `header`：保護資料，經 Base64 URL 安全編碼後的字串。
/// - `payload`：負載資料，經 Base64 URL 安全編碼後的字串；POST-as-GET 時為空字串。
/// - `signature`：對 `header + "." + payload` 的簽名。
#[derive(Serialize, Deserialize, Debug)]
pub struct Jws {
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    /// 當 JSON 序列化或反序列化過程中發生錯誤時回傳此錯誤。
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

type Result<T> = result::Result<T, JwsError>;

impl Jws {
    /// 以已編碼的三個部分組成 `Jws`。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 將保護頭與 payload 編碼，並以金鑰對簽名。
    ///
    /// # 參數
    ///
    /// - `header`: 已填好 nonce、url 與 jwk/kid 的保護頭。
    /// - `payload_b64`: 已編碼的 payload。
    /// - `key_pair`: 帳戶金鑰。
    pub fn sign(header: &ProtectedHeader, payload_b64: &Base64, key_pair: &KeyPair) -> Result<Self> {
        let header_b64 = header.to_base64()?;
        let signature = create_signature(&header_b64, payload_b64, key_pair)?;
        Ok(Self::new(&header_b64, payload_b64, &signature))
    }

    pub fn protected(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
