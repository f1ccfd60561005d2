use openssl::{
    bn::BigNum,
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::{hash, MessageDigest},
    pkey::{PKey, Private},
    sign::{Signer, Verifier},
};
use thiserror::Error;

use crate::{base64::Base64, key_pair::KeyPair};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名或驗證過程中 OpenSSL 回報錯誤。
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    /// 原始 (r, s) 簽名長度與曲線座標寬度不符。
    #[error("Malformed ECDSA signature: expected {expected} bytes, got {actual}")]
    MalformedSignature { expected: usize, actual: usize },
}

type Result<T> = std::result::Result<T, SignatureError>;

/// 定義簽名演算法的介面。
///
/// 每一個金鑰描述符都持有一個靜態的實作，`KeyPair::sign_message` 一律透過它分派。
pub trait SignatureAlgorithm: Send + Sync {
    /// 使用指定的私鑰對資料進行簽名。
    fn sign(&self, data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>>;

    /// 以私鑰所對應的公鑰驗證簽名。
    fn verify(&self, data: &[u8], signature: &[u8], key: &PKey<Private>) -> Result<bool>;
}

/// RSASSA-PKCS1-v1_5 搭配 SHA-256（JWS `RS256`）。
///
/// 不論模數長度，CA 端都只接受 SHA-256。
pub struct RsaPkcs1Sha256;

impl SignatureAlgorithm for RsaPkcs1Sha256 {
    fn sign(&self, data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }

    fn verify(&self, data: &[u8], signature: &[u8], key: &PKey<Private>) -> Result<bool> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), key)?;
        verifier.update(data)?;
        Ok(verifier.verify(signature)?)
    }
}

/// ECDSA 簽名，輸出 JWS 規定的原始 `r || s` 格式（非 ASN.1 DER）。
///
/// `r` 與 `s` 各自以前導零補齊至曲線的座標位元組寬度。
pub struct EcdsaFixedWidth {
    digest: fn() -> MessageDigest,
    coordinate_bytes: usize,
}

impl EcdsaFixedWidth {
    pub const fn new(digest: fn() -> MessageDigest, coordinate_bytes: usize) -> Self {
        Self {
            digest,
            coordinate_bytes,
        }
    }

    /// 簽名固定長度：`2 × 座標寬度`。
    pub fn signature_len(&self) -> usize {
        self.coordinate_bytes * 2
    }
}

impl SignatureAlgorithm for EcdsaFixedWidth {
    fn sign(&self, data: &[u8], key: &PKey<Private>) -> Result<Vec<u8>> {
        let digest = hash((self.digest)(), data)?;
        let ec_key = key.ec_key()?;
        let sig = EcdsaSig::sign(&digest, &ec_key)?;

        let width = self.coordinate_bytes as i32;
        let mut raw = sig.r().to_vec_padded(width)?;
        raw.extend(sig.s().to_vec_padded(width)?);
        Ok(raw)
    }

    fn verify(&self, data: &[u8], signature: &[u8], key: &PKey<Private>) -> Result<bool> {
        if signature.len() != self.signature_len() {
            return Err(SignatureError::MalformedSignature {
                expected: self.signature_len(),
                actual: signature.len(),
            });
        }
        let (r, s) = signature.split_at(self.coordinate_bytes);
        let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
        let digest = hash((self.digest)(), data)?;
        let ec = key.ec_key()?;
        Ok(sig.verify(&digest, &ec)?)
    }
}

pub static RS256: RsaPkcs1Sha256 = RsaPkcs1Sha256;
pub static ES256: EcdsaFixedWidth = EcdsaFixedWidth::new(MessageDigest::sha256, 32);
pub static ES384: EcdsaFixedWidth = EcdsaFixedWidth::new(MessageDigest::sha384, 48);

/// 根據提供的 header、payload 與金鑰對，生成 JWS 簽名。
///
/// 簽名輸入為 `header64 + "." + payload64`，回傳值同樣以 Base64 URL 編碼。
pub fn create_signature(
    header_b64: &Base64,
    payload_b64: &Base64,
    key_pair: &KeyPair,
) -> Result<Base64> {
    let signing_input = format!("{}.{}", header_b64.as_str(), payload_b64.as_str());
    let signature = key_pair.sign_message(signing_input.as_bytes())?;
    Ok(Base64::new(signature))
}
