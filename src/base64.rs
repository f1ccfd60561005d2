use ::base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

/// Base64 解碼失敗時回傳的錯誤。
#[derive(Debug, Error)]
#[error("Invalid base64url data: {0}")]
pub struct DecodeError(#[from] ::base64::DecodeError);

/// ACME 所使用的 URL-safe、無填充 Base64 編碼封裝。
///
/// JWS 的 header、payload 與 signature，以及 JWK 的各個數值欄位，
/// 皆透過此型別產生字串表示。
///
/// # 示例
///
/// ```
/// # use racme_issuer::base64::Base64;
/// let b64 = Base64::new("abc?");
/// assert_eq!(b64.base64_url(), "YWJjPw");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 根據輸入數據生成 URL-safe Base64 編碼（不含 `=` 填充）。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: URL_SAFE_NO_PAD.encode(input.as_ref()),
        }
    }

    /// 取得空字串的編碼，供 POST-as-GET 請求使用。
    pub fn empty() -> Self {
        Self {
            encoded: String::new(),
        }
    }

    /// 返回編碼後的字串。
    pub fn base64_url(&self) -> String {
        self.encoded.clone()
    }

    /// 以字串切片形式借用編碼結果。
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// 將 URL-safe 且無填充的字串解碼為原始位元組。
    pub fn decode_url(input: &str) -> Result<Vec<u8>, DecodeError> {
        Ok(URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))?)
    }
}

impl std::fmt::Display for Base64 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}
