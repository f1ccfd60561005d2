use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// JSON 解析或序列化錯誤。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    /// 伺服器回傳非 2xx 狀態。
    #[error("Directory request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

/// 簡化目錄操作結果的型別。
type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// 目錄中的附加資訊。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService")]
    pub terms_of_service: Option<String>,
    pub website: Option<String>,
}

/// ACME 目錄：各項操作的端點 URL。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於訂單相關操作的 API 路徑。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
    /// 更換帳戶金鑰的 API 路徑，部分 CA 不提供。
    #[serde(rename = "keyChange")]
    pub key_change: Option<String>,
    #[serde(default)]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    /// 從指定 URL 取得目錄。
    ///
    /// 只請求一次，不重試；非 2xx 回應回傳 `DirectoryError::Status`。
    ///
    /// # 參數
    ///
    /// - `client`: 共用的 HTTP 用戶端。
    /// - `url`: CA 的目錄 URL。
    pub fn fetch(client: &Client, url: &str) -> DirectoryResult<Self> {
        info!(url, "fetching ACME directory");
        let response = client.get(url).send()?;
        let status = response.status();
        debug!(status = status.as_u16(), "directory response");

        if !status.is_success() {
            return Err(DirectoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text()?,
            });
        }

        Ok(serde_json::from_str(&response.text()?)?)
    }

    /// 服務條款 URL（若目錄有提供）。
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }
}
