use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::Base64;

/// 載荷內容不符合 ACME 規範時的錯誤。
#[derive(Debug, Error)]
#[error("Invalid payload: {0}")]
pub struct PayloadError(pub &'static str);

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化，並提供轉換成 JSON 字串與 Base64 表示的功能，
/// 同時必須實作自定義的驗證邏輯。
pub trait PayloadT: Serialize {
    /// 將載荷轉換成 JSON 格式的字串。
    ///
    /// # 錯誤
    ///
    /// 若序列化失敗，則回傳 [`serde_json::Error`]。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 將載荷先轉換成 JSON 字串，再以 Base64 進行編碼。
    fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// 建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    contact: Option<Vec<String>>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例。
    ///
    /// 傳入的 `email` 參數會自動補足 `mailto:` 前綴，若已包含則不重複補充。
    /// 未提供 email 時不送出 `contact` 欄位。
    pub fn new(email: Option<&str>) -> Self {
        let contact = email.map(|email| {
            if email.starts_with("mailto:") {
                vec![email.to_string()]
            } else {
                vec![format!("mailto:{}", email)]
            }
        });

        NewAccountPayload {
            contact,
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if let Some(contact) = &self.contact {
            if contact.iter().any(|c| c.len() <= "mailto:".len()) {
                return Err(PayloadError("Contact address cannot be empty"));
            }
        }
        if !self.terms_of_service_agreed {
            return Err(PayloadError("Terms of service must be agreed"));
        }
        Ok(())
    }
}

/// 查詢伺服器端既有帳戶的載荷，不會建立新帳戶。
#[derive(Debug, Serialize, Deserialize)]
pub struct ExistingAccountPayload {
    #[serde(rename = "onlyReturnExisting")]
    only_return_existing: bool,
}

impl ExistingAccountPayload {
    pub fn new() -> Self {
        Self {
            only_return_existing: true,
        }
    }
}

impl Default for ExistingAccountPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadT for ExistingAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱等資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// 表示建立新訂單時所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    /// 為每個域名建立一個 `dns` 識別項，順序與輸入相同。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let identifiers = domains
            .iter()
            .map(|domain| Identifier::dns(domain.as_ref()))
            .collect();

        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    /// 驗證新訂單載荷資料：
    ///
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifiers.is_empty() {
            return Err(PayloadError("At least one identifier is required"));
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err(PayloadError("Identifier type must be 'dns'"));
            }
            if identifier.value.is_empty() {
                return Err(PayloadError("Identifier value cannot be empty"));
            }
        }
        Ok(())
    }
}

/// 回應挑戰時送出的載荷，帶有 key authorization。
#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponsePayload {
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengeResponsePayload {
    pub fn new(key_authorization: impl Into<String>) -> Self {
        Self {
            key_authorization: key_authorization.into(),
        }
    }
}

impl PayloadT for ChallengeResponsePayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.key_authorization.contains('.') {
            return Err(PayloadError("Key authorization must be token.thumbprint"));
        }
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料。
///
/// 該載荷主要包含 DER 格式 CSR 的 Base64 URL 安全編碼字串。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_b64: &Base64) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: csr_b64.base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError("CSR cannot be empty"));
        }
        Ok(())
    }
}
