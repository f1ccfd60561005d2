use std::sync::Mutex;

use reqwest::{blocking::Client, header::HeaderMap};
use thiserror::Error;
use tracing::trace;

/// 回應標頭中攜帶下一個 nonce 的欄位名稱。
pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    /// 當標頭值無法轉換成字串時回傳此錯誤。
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::ToStrError),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// 定義取得 Nonce 的行為。
pub trait NonceT {
    /// 取得一個尚未使用過的 nonce。
    fn get(&self) -> Result<String, NonceError>;
}

/// 從 ACME 伺服器取得 nonce 的實作。
///
/// 每個回應的 `Replay-Nonce` 會先暫存起來，下一次簽名請求直接使用；
/// 沒有暫存時才向 `newNonce` 發送 HEAD 請求。
#[derive(Debug)]
pub struct Nonce {
    client: Client,
    url: String,
    cached: Mutex<Option<String>>,
}

impl Nonce {
    /// 建立一個新的 `Nonce` 實例。
    ///
    /// # 參數
    ///
    /// * `client` - 共用的 HTTP 用戶端（已設定逾時與 User-Agent）。
    /// * `url` - 目錄中的 `newNonce` URL。
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Nonce {
            client,
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    /// 暫存回應標頭中的 `Replay-Nonce`（若有）。
    pub fn remember(&self, headers: &HeaderMap) -> Result<(), NonceError> {
        if let Some(value) = headers.get(REPLAY_NONCE) {
            let nonce = value.to_str()?.to_string();
            *self.cached.lock().map_err(|_| NonceError::LockPoisoned)? = Some(nonce);
        }
        Ok(())
    }

    fn fetch(&self) -> Result<String, NonceError> {
        trace!(url = %self.url, "requesting fresh nonce");
        let response = self.client.head(&self.url).send()?;

        match response.headers().get(REPLAY_NONCE) {
            Some(nonce) => Ok(nonce.to_str()?.to_string()),
            None => Err(NonceError::NoNonceHeader),
        }
    }
}

impl NonceT for Nonce {
    fn get(&self) -> Result<String, NonceError> {
        let cached = self
            .cached
            .lock()
            .map_err(|_| NonceError::LockPoisoned)?
            .take();
        match cached {
            Some(nonce) => Ok(nonce),
            None => self.fetch(),
        }
    }
}

/// 模擬 Nonce 實作，通常用於測試環境中提供固定的 Nonce 值。
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

impl MockNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl NonceT for MockNonce {
    /// 直接回傳預設的 Nonce 值，適用於測試情境。
    fn get(&self) -> Result<String, NonceError> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_mock_nonce() {
        let nonce = MockNonce::new("test-nonce-123");
        assert_eq!(nonce.get().unwrap(), "test-nonce-123");
    }

    #[test]
    fn test_cached_nonce_used_once_then_fetched() {
        let mut server = mockito::Server::new();
        let head = server
            .mock("HEAD", "/new-nonce")
            .with_header(REPLAY_NONCE, "fresh")
            .expect(1)
            .create();

        let nonce = Nonce::new(Client::new(), format!("{}/new-nonce", server.url()));
        let mut headers = HeaderMap::new();
        headers.insert(REPLAY_NONCE, HeaderValue::from_static("from-response"));
        nonce.remember(&headers).unwrap();

        assert_eq!(nonce.get().unwrap(), "from-response");
        assert_eq!(nonce.get().unwrap(), "fresh");
        head.assert();
    }

    #[test]
    fn test_missing_header() {
        let mut server = mockito::Server::new();
        let _head = server.mock("HEAD", "/new-nonce").create();

        let nonce = Nonce::new(Client::new(), format!("{}/new-nonce", server.url()));
        assert!(matches!(nonce.get(), Err(NonceError::NoNonceHeader)));
    }
}
