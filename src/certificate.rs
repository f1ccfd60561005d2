use openssl::x509::X509;
use thiserror::Error;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    /// 下載內容不是以 PEM 證書開頭。
    #[error("Downloaded data is not a PEM certificate: {0}")]
    NotPem(String),
}

/// 自定義結果型別，錯誤類型為 `CertificateError`
type Result<T> = std::result::Result<T, CertificateError>;

const BEGIN_CERTIFICATE: &str = "-----BEGIN CERTIFICATE-----";

/// 申請完成的證書：葉證書在前，接著是 CA 鏈，順序保持伺服器回傳的樣子。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    leaf: String,
    chain: String,
}

impl Certificate {
    /// 從 CA 下載的 PEM 內容建立證書。
    ///
    /// # 參數
    ///
    /// - `pem`: 下載的 PEM 內容，第一個區塊為葉證書，其餘為鏈。
    /// - `extra_chain`: 需額外附加在最後的 CA 鏈（部分 CA 不在下載內容中提供）。
    ///
    /// # 回傳
    ///
    /// 內容開頭不是 `-----BEGIN CERTIFICATE-----` 時回傳 `CertificateError::NotPem`。
    pub fn from_bundle(pem: &str, extra_chain: Option<&str>) -> Result<Self> {
        let pem = pem.trim_start();
        if !pem.starts_with(BEGIN_CERTIFICATE) {
            let preview: String = pem.chars().take(64).collect();
            return Err(CertificateError::NotPem(preview));
        }

        let (leaf, chain) = match pem[BEGIN_CERTIFICATE.len()..].find(BEGIN_CERTIFICATE) {
            Some(pos) => pem.split_at(pos + BEGIN_CERTIFICATE.len()),
            None => (pem, ""),
        };

        let mut chain = chain.to_string();
        if let Some(extra) = extra_chain.map(str::trim).filter(|e| !e.is_empty()) {
            if !chain.is_empty() && !chain.ends_with('\n') {
                chain.push('\n');
            }
            chain.push_str(extra);
            chain.push('\n');
        }

        Ok(Self {
            leaf: ensure_newline(leaf),
            chain,
        })
    }

    /// 葉證書的 PEM。
    pub fn leaf_pem(&self) -> &str {
        &self.leaf
    }

    /// CA 鏈的 PEM，可能為空字串。
    pub fn chain_pem(&self) -> &str {
        &self.chain
    }

    /// 完整輸出：葉證書後接 CA 鏈。
    pub fn pem(&self) -> String {
        format!("{}{}", self.leaf, self.chain)
    }

    /// 解析葉證書。
    pub fn leaf_x509(&self) -> Result<X509> {
        Ok(X509::from_pem(self.leaf.as_bytes())?)
    }

    /// 解析整個鏈（不含葉證書）。
    pub fn chain_x509(&self) -> Result<Vec<X509>> {
        if self.chain.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(X509::stack_from_pem(self.chain.as_bytes())?)
    }
}

fn ensure_newline(s: &str) -> String {
    if s.ends_with('\n') {
        s.to_string()
    } else {
        format!("{}\n", s)
    }
}
