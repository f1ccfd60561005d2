use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No primary domain")]
    NoPrimaryDomain,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器：主體 CN 為主域名，SAN 依序包含主域名與其他名稱（去除重複）。
///
/// # 範例
///
/// ```no_run
/// # use racme_issuer::{csr::CSR, key_pair::KeyPair};
/// let key_pair = KeyPair::create("secp256r1").unwrap();
/// let der = CSR::new("example.com")
///     .set_san("www.example.com")
///     .build(&key_pair)
///     .unwrap()
///     .to_der()
///     .unwrap();
/// ```
pub struct CSR {
    domain: String,
    san_entries: Vec<String>,
}

impl CSR {
    /// 以主域名建立 CSR 建構器。
    pub fn new(domain: &str) -> Self {
        CSR {
            domain: domain.to_string(),
            san_entries: vec![domain.to_string()],
        }
    }

    /// 新增一個 DNS 主體替代名稱 (SAN)；已存在的名稱會被略過。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        if !self.san_entries.iter().any(|e| e == dns_name) {
            self.san_entries.push(dns_name.to_string());
        }
        self
    }

    /// 一次加入多個 SAN。
    pub fn set_sans<S: AsRef<str>>(self, dns_names: &[S]) -> Self {
        dns_names
            .iter()
            .fold(self, |csr, name| csr.set_san(name.as_ref()))
    }

    /// SAN 清單（主域名在前）。
    pub fn names(&self) -> &[String] {
        &self.san_entries
    }

    /// 使用憑證金鑰以 SHA-256 簽署並產生 X509 證書簽名請求。
    ///
    /// # 參數
    ///
    /// * `key_pair` - 憑證金鑰（不是帳戶金鑰）。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.domain.is_empty() {
            return Err(CsrError::NoPrimaryDomain);
        }

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", &self.domain)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(key_pair.pri_key())?;
        req_builder.sign(key_pair.pri_key(), MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 建立並輸出 DER 編碼。
    pub fn to_der(self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}
