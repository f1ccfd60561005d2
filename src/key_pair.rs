use std::{fmt, fs, io, path::Path, sync::OnceLock};

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
};
use thiserror::Error;
use tracing::debug;

use crate::{
    jwk::{Jwk, JwkError},
    signature::{SignatureAlgorithm, SignatureError, ES256, ES384, RS256},
};

/// 鍵相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// 未知的金鑰類型名稱，或載入的金鑰不屬於描述符表中的任何一項。
    #[error("Unrecognized key type: {0}")]
    UnknownKeyType(String),
    /// 載入的金鑰同時符合多個描述符；描述符表本身有誤。
    #[error("Key matches more than one descriptor: {0:?}")]
    AmbiguousKeyType(Vec<&'static str>),
    #[error("No PEM block found")]
    MissingPem,
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 金鑰家族。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa,
    Ec,
}

/// 每一種支援金鑰類型的不可變描述符。
///
/// 產生、簽名與 JWK 組裝都由描述符決定，`KeyPair` 建立後描述符不會再改變。
pub struct KeyDescriptor {
    /// 類型名稱，例如 `rsa2048`、`secp256r1`。
    pub name: &'static str,
    pub kind: KeyKind,
    /// RSA 為模數位元數；EC 為曲線位元數。
    pub size: u32,
    /// JWS `alg` 標籤。
    pub alg: &'static str,
    /// EC 座標的固定位元組寬度；0 代表依數值位元長度決定（RSA）。
    pub coordinate_bytes: usize,
    pub jwk_const: &'static [(&'static str, &'static str)],
    pub jwk_attr: &'static [&'static str],
    curve: Option<Nid>,
    generate: fn(&KeyDescriptor) -> std::result::Result<PKey<Private>, ErrorStack>,
    signer: &'static dyn SignatureAlgorithm,
}

impl fmt::Debug for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDescriptor")
            .field("name", &self.name)
            .field("alg", &self.alg)
            .finish()
    }
}

impl KeyDescriptor {
    fn matches(&self, pkey: &PKey<Private>) -> std::result::Result<bool, ErrorStack> {
        Ok(match (self.kind, pkey.id()) {
            (KeyKind::Rsa, Id::RSA) => pkey.bits() == self.size,
            (KeyKind::Ec, Id::EC) => pkey.ec_key()?.group().curve_name() == self.curve,
            _ => false,
        })
    }
}

fn generate_rsa(desc: &KeyDescriptor) -> std::result::Result<PKey<Private>, ErrorStack> {
    PKey::from_rsa(Rsa::generate(desc.size)?)
}

fn generate_ec(desc: &KeyDescriptor) -> std::result::Result<PKey<Private>, ErrorStack> {
    let nid = desc.curve.ok_or_else(ErrorStack::get)?;
    let group = EcGroup::from_curve_name(nid)?;
    PKey::from_ec_key(EcKey::generate(&group)?)
}

const RSA_JWK_CONST: &[(&str, &str)] = &[("kty", "RSA")];
const RSA_JWK_ATTR: &[&str] = &["e", "n"];
const EC_JWK_ATTR: &[&str] = &["x", "y"];

/// 支援的金鑰類型表。
pub static KEY_DESCRIPTORS: [KeyDescriptor; 5] = [
    KeyDescriptor {
        name: "rsa2048",
        kind: KeyKind::Rsa,
        size: 2048,
        alg: "RS256",
        coordinate_bytes: 0,
        jwk_const: RSA_JWK_CONST,
        jwk_attr: RSA_JWK_ATTR,
        curve: None,
        generate: generate_rsa,
        signer: &RS256,
    },
    KeyDescriptor {
        name: "rsa3072",
        kind: KeyKind::Rsa,
        size: 3072,
        alg: "RS256",
        coordinate_bytes: 0,
        jwk_const: RSA_JWK_CONST,
        jwk_attr: RSA_JWK_ATTR,
        curve: None,
        generate: generate_rsa,
        signer: &RS256,
    },
    KeyDescriptor {
        name: "rsa4096",
        kind: KeyKind::Rsa,
        size: 4096,
        alg: "RS256",
        coordinate_bytes: 0,
        jwk_const: RSA_JWK_CONST,
        jwk_attr: RSA_JWK_ATTR,
        curve: None,
        generate: generate_rsa,
        signer: &RS256,
    },
    KeyDescriptor {
        name: "secp256r1",
        kind: KeyKind::Ec,
        size: 256,
        alg: "ES256",
        coordinate_bytes: 32,
        jwk_const: &[("kty", "EC"), ("crv", "P-256")],
        jwk_attr: EC_JWK_ATTR,
        curve: Some(Nid::X9_62_PRIME256V1),
        generate: generate_ec,
        signer: &ES256,
    },
    KeyDescriptor {
        name: "secp384r1",
        kind: KeyKind::Ec,
        size: 384,
        alg: "ES384",
        coordinate_bytes: 48,
        jwk_const: &[("kty", "EC"), ("crv", "P-384")],
        jwk_attr: EC_JWK_ATTR,
        curve: Some(Nid::SECP384R1),
        generate: generate_ec,
        signer: &ES384,
    },
];

/// 一把私鑰與其類型描述符。
///
/// JWK 在第一次需要時計算並快取，之後不再重算。
pub struct KeyPair {
    desc: &'static KeyDescriptor,
    pri_key: PKey<Private>,
    jwk: OnceLock<Jwk>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_type", &self.desc.name)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// 依類型名稱產生新的金鑰。
    ///
    /// # 參數
    ///
    /// - `key_type`: `rsa2048`、`rsa3072`、`rsa4096`、`secp256r1` 或 `secp384r1`。
    ///
    /// # 回傳
    ///
    /// 名稱不在描述符表中時回傳 `KeyError::UnknownKeyType`。
    pub fn create(key_type: &str) -> Result<Self> {
        let desc = Self::descriptor_by_name(key_type)?;
        debug!(key_type, "generating key");
        let pri_key = (desc.generate)(desc)?;
        Ok(Self::with_descriptor(desc, pri_key))
    }

    /// 列出所有支援的類型名稱。
    pub fn type_names() -> impl Iterator<Item = &'static str> {
        KEY_DESCRIPTORS.iter().map(|d| d.name)
    }

    fn descriptor_by_name(key_type: &str) -> Result<&'static KeyDescriptor> {
        KEY_DESCRIPTORS
            .iter()
            .find(|d| d.name == key_type)
            .ok_or_else(|| KeyError::UnknownKeyType(key_type.to_string()))
    }

    fn with_descriptor(desc: &'static KeyDescriptor, pri_key: PKey<Private>) -> Self {
        Self {
            desc,
            pri_key,
            jwk: OnceLock::new(),
        }
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰，並比對描述符表推斷其類型。
    ///
    /// 第一個 `-----BEGIN` 之前的任何文字（例如帳戶檔的 `KID:` 行）都會被忽略。
    /// 接受 PKCS#8 以及傳統的 PKCS#1 / SEC1 格式。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let start = find_pem_start(pem).ok_or(KeyError::MissingPem)?;
        let pri_key = PKey::private_key_from_pem(&pem[start..])?;

        let mut matching = Vec::new();
        for desc in KEY_DESCRIPTORS.iter() {
            if desc.matches(&pri_key)? {
                matching.push(desc);
            }
        }

        match matching.as_slice() {
            [desc] => Ok(Self::with_descriptor(*desc, pri_key)),
            [] => Err(KeyError::UnknownKeyType(format!(
                "key id {} of {} bits",
                pri_key.id().as_raw(),
                pri_key.bits()
            ))),
            many => Err(KeyError::AmbiguousKeyType(
                many.iter().map(|d| d.name).collect(),
            )),
        }
    }

    /// 從檔案讀取 PEM 私鑰。
    pub fn read_pem<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_pem(&fs::read(path)?)
    }

    /// 以未加密的 PKCS#8 PEM 序列化私鑰。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 將 PKCS#8 PEM 寫入檔案。
    pub fn write_pem<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_pem()?)?;
        Ok(())
    }

    /// 以描述符的簽名演算法簽署訊息。
    pub fn sign_message(&self, message: &[u8]) -> std::result::Result<Vec<u8>, SignatureError> {
        self.desc.signer.sign(message, &self.pri_key)
    }

    /// 以金鑰本身的公鑰驗證 [`KeyPair::sign_message`] 產生的簽名。
    pub fn verify_message(
        &self,
        message: &[u8],
        signature: &[u8],
    ) -> std::result::Result<bool, SignatureError> {
        self.desc.signer.verify(message, signature, &self.pri_key)
    }

    /// 取得 JWK；第一次呼叫時計算，之後回傳快取。
    pub fn jwk(&self) -> Result<&Jwk> {
        if let Some(jwk) = self.jwk.get() {
            return Ok(jwk);
        }
        let jwk = Jwk::from_key_pair(self)?;
        Ok(self.jwk.get_or_init(|| jwk))
    }

    /// 計算並回傳金鑰的 JWK 縮影。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint()?)
    }

    pub fn descriptor(&self) -> &'static KeyDescriptor {
        self.desc
    }

    /// 類型名稱，例如 `secp384r1`。
    pub fn key_type(&self) -> &'static str {
        self.desc.name
    }

    /// JWS `alg` 標籤。
    pub fn alg(&self) -> &'static str {
        self.desc.alg
    }

    pub fn pri_key(&self) -> &PKey<Private> {
        &self.pri_key
    }

    /// 依描述符 `jwk_attr` 的順序取出公開參數：RSA 為 (e, n)，EC 為 (x, y)。
    pub(crate) fn public_numbers(&self) -> std::result::Result<Vec<BigNum>, ErrorStack> {
        match self.desc.kind {
            KeyKind::Rsa => {
                let rsa = self.pri_key.rsa()?;
                Ok(vec![rsa.e().to_owned()?, rsa.n().to_owned()?])
            }
            KeyKind::Ec => {
                let ec = self.pri_key.ec_key()?;
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;
                Ok(vec![x, y])
            }
        }
    }
}

fn find_pem_start(data: &[u8]) -> Option<usize> {
    const MARKER: &[u8] = b"-----BEGIN";
    data.windows(MARKER.len()).position(|w| w == MARKER)
}
