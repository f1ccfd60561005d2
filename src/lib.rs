//! # ACME 憑證申請引擎
//!
//! 本庫實作 ACME v2（RFC 8555）用戶端，向 Let's Encrypt 等 CA 申請憑證，
//! 挑戰的發佈與清除則交給可替換的提供者。
//!
//! - **key_pair / account**: 帳戶與憑證金鑰的產生、載入、儲存與簽名；帳戶另外保存 kid。
//! - **provider**: 挑戰提供者介面與內建提供者（manual、webroot、cloudflare），可透過註冊表以名稱建立。
//! - **propagation**: 發佈後等待挑戰傳播的輪詢與退避。
//! - **client**: 一次完整的申請流程：註冊、下訂、驗證、送出 CSR、下載憑證。
//!
//! ## 示例
//!
//! ```no_run
//! use racme_issuer::{
//!     account::Account,
//!     client::ClientBuilder,
//!     config::{ClientConfig, LETSENCRYPT_STAGING},
//!     key_pair::KeyPair,
//!     provider::{ProviderOptions, ProviderRegistry},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = ProviderRegistry::with_builtins().create(
//!         "webroot",
//!         ProviderOptions::new().with("webroot", "/var/www/html"),
//!     )?;
//!
//!     let config = ClientConfig {
//!         directory_url: LETSENCRYPT_STAGING.to_string(),
//!         contact_email: Some("admin@example.com".to_string()),
//!         is_new_account: true,
//!         ..ClientConfig::default()
//!     };
//!
//!     let client = ClientBuilder::new("example.com")
//!         .alt_names(&["www.example.com"])
//!         .account(Account::create("secp256r1")?)
//!         .cert_key(KeyPair::create("rsa2048")?)
//!         .provider(provider)
//!         .config(config)
//!         .build()?;
//!
//!     let certificate = client.get_certificate()?;
//!     client.account().write_pem("account.pem")?;
//!     client.cert_key().write_pem("example.com.key")?;
//!     std::fs::write("example.com.crt", certificate.pem())?;
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod clock;
pub mod config;
pub mod csr;
pub mod directory;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod propagation;
pub mod protection;
pub mod provider;
pub mod signature;
