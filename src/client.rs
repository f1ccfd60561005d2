//! ACME 引擎：一次完整的憑證申請流程。
//!
//! 流程依序為：取得目錄、註冊帳戶、建立訂單、取得每個授權並選定挑戰、
//! 交給提供者發佈、等待傳播、觸發驗證、確認授權有效、送出 CSR、下載憑證。
//! 不論成功與否，提供者的 `clear` 都會在結束前呼叫一次。

use reqwest::{
    blocking::Client as HttpClient,
    header::{ToStrError, CONTENT_TYPE, LOCATION},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    account::{Account, AccountError, KidError},
    base64::Base64,
    certificate::{Certificate, CertificateError},
    challenge::{key_authorization, Challenge, ChallengeError},
    clock::{CancelToken, Cancelled, Clock, SystemClock},
    config::{ClientConfig, ConfigError},
    csr::{CsrError, CSR},
    directory::{Directory, DirectoryError},
    jws::{Jws, JwsError},
    key_pair::{KeyError, KeyPair},
    nonce::{Nonce, NonceError},
    order::{Authorization, AuthorizationStatus, Order, OrderStatus, OrderUpdate},
    payload::{
        ChallengeResponsePayload, ExistingAccountPayload, FinalizeOrderPayload, NewAccountPayload,
        NewOrderPayload, PayloadError, PayloadT,
    },
    propagation::{propagation_delay, PropagationError},
    protection::{Protection, ProtectionError},
    provider::{Errata, Provider},
};

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const LOG_BODY_LIMIT: usize = 300;
const DEFAULT_KEY_TYPE: &str = "rsa2048";

#[derive(Debug, Error)]
pub enum ClientError {
    /// `newAccount` 回傳 200、201、409 以外的狀態。
    #[error("Error while registering: status_code={status} response={body}")]
    Registration { status: u16, body: String },
    /// 單次步驟收到非預期的 HTTP 狀態。
    #[error("Error during {step}: status_code={status} response={body}")]
    Protocol {
        step: &'static str,
        status: u16,
        body: String,
    },
    #[error("Response to {step} has no Location header")]
    MissingLocation { step: &'static str },
    #[error("Order {0} never produced a certificate URL")]
    MissingCertificateUrl(String),
    /// 授權在檢查上限內未達到期望狀態。
    #[error(
        "Checks done={checks}. Max checks allowed={max_checks}. Interval between checks={wait_period}seconds. ({url})"
    )]
    AuthorizationTimeout {
        checks: u32,
        max_checks: u32,
        wait_period: u64,
        url: String,
    },
    #[error("Authorization {url} is {status}")]
    AuthorizationInvalid {
        url: String,
        status: AuthorizationStatus,
    },
    #[error("Challenge setup failed: {}", join_errata(.0))]
    ChallengeSetup(Vec<Errata>),
    #[error("Propagation error: {0}")]
    Propagation(PropagationError),
    #[error("Issuance cancelled")]
    Cancelled,
    #[error("No provider configured")]
    MissingProvider,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Kid error: {0}")]
    Kid(#[from] KidError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Header error: {0}")]
    Header(#[from] ToStrError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// 是否為有上限的重試耗盡（授權檢查或傳播逾時）。
    ///
    /// 這類錯誤通常可以稍後整個重新申請。
    pub fn is_retry_exhaustion(&self) -> bool {
        matches!(
            self,
            ClientError::AuthorizationTimeout { .. }
                | ClientError::Propagation(PropagationError::Timeout { .. })
        )
    }
}

impl From<Cancelled> for ClientError {
    fn from(_: Cancelled) -> Self {
        ClientError::Cancelled
    }
}

impl From<PropagationError> for ClientError {
    fn from(e: PropagationError) -> Self {
        match e {
            PropagationError::Cancelled(_) => ClientError::Cancelled,
            other => ClientError::Propagation(other),
        }
    }
}

fn join_errata(errata: &[Errata]) -> String {
    errata
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

type Result<T> = std::result::Result<T, ClientError>;

fn truncate(body: &str) -> String {
    body.chars().take(LOG_BODY_LIMIT).collect()
}

/// 簽名請求的回應，body 已讀出。
#[derive(Debug, Clone)]
pub struct AcmeResponse {
    pub status: u16,
    pub location: Option<String>,
    pub body: String,
}

impl AcmeResponse {
    fn require_status(self, step: &'static str, accepted: &[u16]) -> Result<Self> {
        if accepted.contains(&self.status) {
            Ok(self)
        } else {
            Err(ClientError::Protocol {
                step,
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// [`Client`] 的建構器。
pub struct ClientBuilder {
    domain: String,
    alt_names: Vec<String>,
    account: Option<Account>,
    cert_key: Option<KeyPair>,
    provider: Option<Box<dyn Provider>>,
    config: ClientConfig,
    clock: Option<Box<dyn Clock>>,
    cancel: CancelToken,
}

impl ClientBuilder {
    /// 以主域名建立建構器。
    ///
    /// 未指定的項目使用預設值：
    /// - 帳戶金鑰與憑證金鑰：新產生的 `rsa2048`
    /// - 設定：[`ClientConfig::default`]
    /// - 時鐘：跟隨取消權杖的 [`SystemClock`]
    pub fn new(domain: &str) -> Self {
        ClientBuilder {
            domain: domain.to_string(),
            alt_names: Vec::new(),
            account: None,
            cert_key: None,
            provider: None,
            config: ClientConfig::default(),
            clock: None,
            cancel: CancelToken::new(),
        }
    }

    /// 設置 SAN（不含主域名）。
    pub fn alt_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.alt_names = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }

    /// 設置憑證金鑰（簽署 CSR 用，與帳戶金鑰分開）。
    pub fn cert_key(mut self, cert_key: KeyPair) -> Self {
        self.cert_key = Some(cert_key);
        self
    }

    pub fn provider(mut self, provider: Box<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 驗證設定、建立 HTTP 用戶端並取得目錄。
    ///
    /// # Errors
    ///
    /// 目錄取得失敗時直接回傳，不重試。
    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        if self.domain.trim().is_empty() {
            return Err(CsrError::NoPrimaryDomain.into());
        }
        let provider = self.provider.ok_or(ClientError::MissingProvider)?;

        let account = match self.account {
            Some(account) => account,
            None => Account::create(DEFAULT_KEY_TYPE)?,
        };
        let cert_key = match self.cert_key {
            Some(key) => key,
            None => KeyPair::create(DEFAULT_KEY_TYPE)?,
        };

        let mut domains = vec![self.domain.clone()];
        for name in self.alt_names {
            if !domains.contains(&name) {
                domains.push(name);
            }
        }

        let http = http_client(&self.config)?;
        let directory = Directory::fetch(&http, &self.config.directory_url)?;
        let nonce = Nonce::new(http.clone(), directory.new_nonce.clone());
        let clock = self
            .clock
            .unwrap_or_else(|| Box::new(SystemClock::new(self.cancel.clone())));

        info!(
            domain = %self.domain,
            names = domains.len(),
            provider = provider.name(),
            "ACME client ready"
        );

        Ok(Client {
            account,
            cert_key,
            provider,
            http,
            directory,
            nonce,
            clock,
            cancel: self.cancel,
            config: self.config,
            domain: self.domain,
            domains,
        })
    }
}

fn http_client(config: &ClientConfig) -> Result<HttpClient> {
    Ok(HttpClient::builder()
        .timeout(config.request_timeout())
        .user_agent(config.user_agent())
        .danger_accept_invalid_certs(!config.verify_tls)
        .build()?)
}

/// ACME 引擎。一個實例負責一張憑證（主域名加上 SAN）。
pub struct Client {
    account: Account,
    cert_key: KeyPair,
    provider: Box<dyn Provider>,
    http: HttpClient,
    directory: Directory,
    nonce: Nonce,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
    config: ClientConfig,
    domain: String,
    domains: Vec<String>,
}

impl Client {
    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn cert_key(&self) -> &KeyPair {
        &self.cert_key
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    /// 主域名在前，其後為去重的 SAN。
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// 申請憑證。
    ///
    /// 任何步驟失敗都會中止，但提供者的 `clear` 一定會對已取得的挑戰執行一次；
    /// `clear` 的問題只記錄警告，不影響回傳結果。
    pub fn get_certificate(&self) -> Result<Certificate> {
        info!(domain = %self.domain, "get_certificate");
        let mut challenges = Vec::new();
        let result = self.issue(&mut challenges);

        if let Err(e) = &result {
            error!(domain = %self.domain, error = %e, "unable to issue certificate");
        }

        for errata in self.provider.clear(&challenges) {
            warn!(errata = %errata, "challenge cleanup failed");
        }

        result
    }

    fn issue(&self, challenges: &mut Vec<Challenge>) -> Result<Certificate> {
        self.acme_register()?;
        let order = self.apply_for_cert_issuance()?;

        for auth_url in &order.authorizations {
            challenges.push(self.get_identifier_authorization(auth_url)?);
        }

        let failures = self.provider.setup(challenges);
        if !failures.is_empty() {
            return Err(ClientError::ChallengeSetup(failures));
        }

        propagation_delay(challenges, self.provider.as_ref(), self.clock.as_ref())?;

        // 先前驗證過且仍被伺服器快取的授權可能已經是 valid，不必再回應。
        for challenge in challenges.iter() {
            let authorization = self.check_authorization_status(
                &challenge.authorization_url,
                &[AuthorizationStatus::Pending, AuthorizationStatus::Valid],
            )?;
            if authorization.status == AuthorizationStatus::Pending {
                self.respond_to_challenge(challenge)?;
            }
        }

        for challenge in challenges.iter() {
            self.check_authorization_status(
                &challenge.authorization_url,
                &[AuthorizationStatus::Valid],
            )?;
        }

        let certificate_url = self.send_csr(&order)?;
        let pem = self.download_certificate(&certificate_url)?;
        let certificate = Certificate::from_bundle(&pem, self.config.ca_chain_pem.as_deref())?;
        info!(domain = %self.domain, "certificate issued");
        Ok(certificate)
    }

    /// 送出一個簽名請求：`{protected, payload, signature}`，以 `application/jose+json` POST。
    ///
    /// `needs_jwk` 為真時保護頭帶完整 JWK（僅 `newAccount`），否則帶帳戶 kid。
    /// 回應中的 `Replay-Nonce` 會留給下一個請求使用。
    pub fn make_signed_acme_request(
        &self,
        url: &str,
        payload: &Base64,
        needs_jwk: bool,
    ) -> Result<AcmeResponse> {
        self.cancel.check()?;

        let protection = Protection::new(&self.nonce, self.account.alg());
        let protection = if needs_jwk {
            protection.with_jwk(self.account.jwk()?)?
        } else {
            protection.with_kid(self.account.get_kid()?)
        };
        let header = protection.create_header(url)?;
        let jws = Jws::sign(&header, payload, self.account.key_pair())?;

        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
            .body(jws.to_json()?)
            .send()?;
        self.nonce.remember(response.headers())?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .map(|v| v.to_str().map(str::to_string))
            .transpose()?;
        let body = response.text()?;
        debug!(url, status, response = %truncate(&body), "ACME response");

        Ok(AcmeResponse {
            status,
            location,
            body,
        })
    }

    /// 註冊帳戶；帳戶已有 kid 時不發送任何請求。
    pub fn acme_register(&self) -> Result<()> {
        if self.account.has_kid() {
            info!("acme_register: key was already registered");
            return Ok(());
        }
        info!(new_account = self.config.is_new_account, "acme_register");

        let payload = if self.config.is_new_account {
            let payload = NewAccountPayload::new(self.config.contact_email.as_deref());
            payload.validate()?;
            payload.to_base64()?
        } else {
            ExistingAccountPayload::new().to_base64()?
        };

        let response =
            self.make_signed_acme_request(&self.directory.new_account, &payload, true)?;
        if ![200, 201, 409].contains(&response.status) {
            return Err(ClientError::Registration {
                status: response.status,
                body: response.body,
            });
        }

        let kid = response
            .location
            .ok_or(ClientError::MissingLocation { step: "newAccount" })?;
        self.account.set_kid(&kid)?;
        info!(kid = %kid, "acme_register_success");
        Ok(())
    }

    /// 建立訂單（`newOrder`），預期 201。
    pub fn apply_for_cert_issuance(&self) -> Result<Order> {
        info!(names = ?self.domains, "apply_for_cert_issuance (newOrder)");
        let payload = NewOrderPayload::new(&self.domains);
        payload.validate()?;

        let response = self
            .make_signed_acme_request(&self.directory.new_order, &payload.to_base64()?, false)?
            .require_status("newOrder", &[201])?;

        let mut order: Order = serde_json::from_str(&response.body)?;
        order.order_url = response.location;
        info!(
            authorizations = order.authorizations.len(),
            "apply_for_cert_issuance_success"
        );
        Ok(order)
    }

    /// 取得授權物件，選出提供者支援的挑戰並建立 [`Challenge`]。
    pub fn get_identifier_authorization(&self, auth_url: &str) -> Result<Challenge> {
        info!(url = auth_url, "get_identifier_authorization");
        let response = self
            .make_signed_acme_request(auth_url, &Base64::empty(), false)?
            .require_status("authorization", &[200, 201])?;

        let authorization: Authorization = serde_json::from_str(&response.body)?;
        let challenge = Challenge::select(
            auth_url,
            &authorization,
            self.provider.chal_types(),
            &self.account.thumbprint()?,
        )?;
        debug!(
            domain = %challenge.domain,
            challenge_type = %challenge.challenge_type,
            wildcard = challenge.wildcard,
            "challenge selected"
        );
        Ok(challenge)
    }

    /// `token + "." + 帳戶 JWK 縮影`。
    pub fn get_keyauthorization(&self, token: &str) -> Result<String> {
        Ok(key_authorization(token, &self.account.thumbprint()?))
    }

    /// 輪詢授權狀態，直到落在 `desired` 之中。
    ///
    /// 每次檢查前先休眠 `auth_status_wait_period`，最多檢查 `auth_status_max_checks` 次。
    /// 授權進入不可恢復的狀態（例如 invalid）時立即回傳錯誤。
    pub fn check_authorization_status(
        &self,
        auth_url: &str,
        desired: &[AuthorizationStatus],
    ) -> Result<Authorization> {
        debug!(url = auth_url, ?desired, "check_authorization_status");
        let max_checks = self.config.auth_status_max_checks;
        let mut checks = 0;

        loop {
            self.clock.sleep(self.config.auth_status_wait_period())?;
            let response = self
                .make_signed_acme_request(auth_url, &Base64::empty(), false)?
                .require_status("authorization status", &[200, 201])?;
            let authorization: Authorization = serde_json::from_str(&response.body)?;
            checks += 1;
            debug!(url = auth_url, checks, status = %authorization.status, "authorization status");

            if desired.contains(&authorization.status) {
                return Ok(authorization);
            }
            if authorization.status.is_terminal_failure() {
                return Err(ClientError::AuthorizationInvalid {
                    url: auth_url.to_string(),
                    status: authorization.status,
                });
            }
            if checks >= max_checks {
                return Err(ClientError::AuthorizationTimeout {
                    checks,
                    max_checks,
                    wait_period: self.config.auth_status_wait_period,
                    url: auth_url.to_string(),
                });
            }
        }
    }

    /// 把 key authorization 送到挑戰 URL，通知伺服器開始驗證。
    pub fn respond_to_challenge(&self, challenge: &Challenge) -> Result<()> {
        info!(
            domain = %challenge.domain,
            url = %challenge.challenge_url,
            "respond_to_challenge"
        );
        let payload = ChallengeResponsePayload::new(challenge.key_authorization.as_str());
        payload.validate()?;
        self.make_signed_acme_request(&challenge.challenge_url, &payload.to_base64()?, false)?
            .require_status("challenge response", &[200, 201])?;
        info!("respond_to_challenge_success");
        Ok(())
    }

    /// 以憑證金鑰產生 CSR 並送到 finalize URL，回傳憑證下載 URL。
    ///
    /// 回應尚未帶 `certificate` 時（訂單仍在 processing），輪詢訂單 URL。
    pub fn send_csr(&self, order: &Order) -> Result<String> {
        info!(url = %order.finalize, "send_csr");
        let csr = CSR::new(&self.domain)
            .set_sans(&self.domains)
            .to_der(&self.cert_key)?;
        let payload = FinalizeOrderPayload::new(&Base64::new(csr));
        payload.validate()?;

        let response = self
            .make_signed_acme_request(&order.finalize, &payload.to_base64()?, false)?
            .require_status("finalize", &[200, 201])?;
        let update: OrderUpdate = serde_json::from_str(&response.body)?;

        let certificate_url = match update.certificate {
            Some(url) => url,
            None => self.poll_certificate_url(order)?,
        };
        info!(url = %certificate_url, "send_csr_success");
        Ok(certificate_url)
    }

    fn poll_certificate_url(&self, order: &Order) -> Result<String> {
        let order_url = order
            .order_url
            .as_deref()
            .ok_or(ClientError::MissingLocation { step: "newOrder" })?;

        for _ in 0..self.config.auth_status_max_checks {
            self.clock.sleep(self.config.auth_status_wait_period())?;
            let response = self
                .make_signed_acme_request(order_url, &Base64::empty(), false)?
                .require_status("order status", &[200, 201])?;
            let update: OrderUpdate = serde_json::from_str(&response.body)?;
            debug!(url = order_url, status = ?update.status, "order status");

            match (update.status, update.certificate) {
                (_, Some(url)) => return Ok(url),
                (OrderStatus::Invalid, None) => {
                    return Err(ClientError::Protocol {
                        step: "order status",
                        status: response.status,
                        body: response.body,
                    })
                }
                _ => {}
            }
        }
        Err(ClientError::MissingCertificateUrl(order_url.to_string()))
    }

    /// 下載 PEM 憑證（POST-as-GET），預期 200 或 201。
    pub fn download_certificate(&self, certificate_url: &str) -> Result<String> {
        info!(url = certificate_url, "download_certificate");
        let response = self
            .make_signed_acme_request(certificate_url, &Base64::empty(), false)?
            .require_status("certificate download", &[200, 201])?;
        info!("download_certificate_success");
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use mockito::{Matcher, Mock, ServerGuard};

    use super::*;
    use crate::{
        certificate::tests::self_signed_pem,
        challenge::ChallengeType,
        clock::MockClock,
        nonce::REPLAY_NONCE,
        provider::{Errata, PropagationConfig},
    };

    #[derive(Debug, Clone, Default)]
    struct RecordingProvider {
        calls: Arc<Mutex<Vec<(&'static str, usize)>>>,
        fail_setup: bool,
        propagation: PropagationConfig,
    }

    impl RecordingProvider {
        fn new() -> Self {
            let propagation =
                PropagationConfig::new(Duration::ZERO, Duration::ZERO, vec![Duration::from_secs(1)])
                    .unwrap();
            Self {
                propagation,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail_setup: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> Vec<(&'static str, usize)> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, op: &'static str, challenges: &[Challenge]) {
            self.calls.lock().unwrap().push((op, challenges.len()));
        }
    }

    impl Provider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn chal_types(&self) -> &[ChallengeType] {
            &[ChallengeType::Dns01]
        }

        fn propagation(&self) -> &PropagationConfig {
            &self.propagation
        }

        fn setup(&self, challenges: &[Challenge]) -> Vec<Errata> {
            self.record("setup", challenges);
            if self.fail_setup {
                challenges
                    .iter()
                    .map(|c| Errata::failed("api down", c))
                    .collect()
            } else {
                Vec::new()
            }
        }

        fn unpropagated(&self, challenges: &[Challenge]) -> Vec<Errata> {
            self.record("unpropagated", challenges);
            Vec::new()
        }

        fn clear(&self, challenges: &[Challenge]) -> Vec<Errata> {
            self.record("clear", challenges);
            Vec::new()
        }
    }

    struct MockCa {
        server: ServerGuard,
        _directory: Mock,
        _nonce: Mock,
    }

    impl MockCa {
        fn new() -> Self {
            let mut server = mockito::Server::new();
            let url = server.url();
            let directory = server
                .mock("GET", "/directory")
                .with_header("content-type", "application/json")
                .with_body(
                    serde_json::json!({
                        "newNonce": format!("{url}/new-nonce"),
                        "newAccount": format!("{url}/new-acct"),
                        "newOrder": format!("{url}/new-order"),
                        "revokeCert": format!("{url}/revoke-cert"),
                        "keyChange": format!("{url}/key-change"),
                    })
                    .to_string(),
                )
                .create();
            let nonce = server
                .mock("HEAD", "/new-nonce")
                .with_header(REPLAY_NONCE, "nonce-from-head")
                .create();
            Self {
                server,
                _directory: directory,
                _nonce: nonce,
            }
        }

        fn url(&self) -> String {
            self.server.url()
        }

        fn config(&self, is_new_account: bool) -> ClientConfig {
            ClientConfig {
                directory_url: format!("{}/directory", self.url()),
                contact_email: Some("admin@example.com".to_string()),
                is_new_account,
                ..ClientConfig::default()
            }
        }

        fn post(&mut self, path: &str, status: usize, body: String) -> Mock {
            self.server
                .mock("POST", path)
                .match_header("content-type", JOSE_CONTENT_TYPE)
                .with_status(status)
                .with_header(REPLAY_NONCE, "nonce-from-response")
                .with_body(body)
                .create()
        }

        fn mock_account(&mut self) -> Mock {
            let location = format!("{}/acct/1", self.url());
            self.server
                .mock("POST", "/new-acct")
                .with_status(201)
                .with_header("location", &location)
                .with_body("{}")
                .expect(1)
                .create()
        }

        fn mock_order(&mut self) -> Mock {
            let url = self.url();
            let body = serde_json::json!({
                "status": "pending",
                "identifiers": [{"type": "dns", "value": "example.com"}],
                "authorizations": [format!("{url}/authz/1")],
                "finalize": format!("{url}/order/1/finalize"),
            });
            self.server
                .mock("POST", "/new-order")
                .with_status(201)
                .with_header("location", &format!("{url}/order/1"))
                .with_body(body.to_string())
                .create()
        }

        fn authorization_body(&self, status: &str) -> String {
            let url = self.url();
            serde_json::json!({
                "identifier": {"type": "dns", "value": "example.com"},
                "status": status,
                "challenges": [
                    {"type": "http-01", "url": format!("{url}/chall/http"), "token": "tok-http", "status": status},
                    {"type": "dns-01", "url": format!("{url}/chall/1"), "token": "tok-dns", "status": status},
                ],
            })
            .to_string()
        }
    }

    fn build(ca: &MockCa, provider: RecordingProvider, clock: MockClock) -> Client {
        ClientBuilder::new("example.com")
            .account(Account::create("secp256r1").unwrap())
            .cert_key(KeyPair::create("secp256r1").unwrap())
            .provider(Box::new(provider))
            .config(ca.config(true))
            .clock(Box::new(clock))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_sets_kid_once() {
        let mut ca = MockCa::new();
        let account = ca.mock_account();
        let client = build(&ca, RecordingProvider::new(), MockClock::new());

        assert!(!client.account().has_kid());
        client.acme_register().unwrap();
        assert_eq!(
            client.account().get_kid().unwrap(),
            format!("{}/acct/1", ca.url())
        );

        client.acme_register().unwrap();
        account.assert();
    }

    #[test]
    fn test_register_existing_and_rejected() {
        let mut ca = MockCa::new();
        let conflict = ca
            .server
            .mock("POST", "/new-acct")
            .with_status(409)
            .with_header("location", "https://ca.example/acct/7")
            .create();
        let client = ClientBuilder::new("example.com")
            .account(Account::create("secp256r1").unwrap())
            .provider(Box::new(RecordingProvider::new()))
            .config(ca.config(false))
            .build()
            .unwrap();
        client.acme_register().unwrap();
        assert_eq!(
            client.account().get_kid().unwrap(),
            "https://ca.example/acct/7"
        );
        conflict.assert();

        let mut ca = MockCa::new();
        let _rejected = ca.post("/new-acct", 400, r#"{"type":"malformed"}"#.to_string());
        let client = build(&ca, RecordingProvider::new(), MockClock::new());
        let err = client.acme_register().unwrap_err();
        assert!(matches!(err, ClientError::Registration { status: 400, .. }));
        assert!(!err.is_retry_exhaustion());
        assert!(!client.account().has_kid());
    }

    #[test]
    fn test_valid_authorization_is_not_answered() {
        let mut ca = MockCa::new();
        let url = ca.url();
        let leaf = self_signed_pem("example.com");
        let chain = self_signed_pem("Test CA");

        let _account = ca.mock_account();
        let _order = ca.mock_order();
        let authz = ca
            .post("/authz/1", 200, ca.authorization_body("valid"))
            .expect(3);
        let challenge = ca.post("/chall/1", 200, "{}".to_string()).expect(0);
        let finalize = ca
            .post(
                "/order/1/finalize",
                200,
                serde_json::json!({"status": "valid", "certificate": format!("{url}/cert/1")})
                    .to_string(),
            )
            .expect(1);
        let _cert = ca.post("/cert/1", 200, format!("{leaf}{chain}"));

        let provider = RecordingProvider::new();
        let clock = MockClock::new();
        let client = build(&ca, provider.clone(), clock.clone());
        let certificate = client.get_certificate().unwrap();

        assert_eq!(certificate.leaf_pem().trim(), leaf.trim());
        assert_eq!(certificate.chain_pem().trim(), chain.trim());
        assert!(certificate.pem().starts_with(certificate.leaf_pem()));
        assert_eq!(provider.calls(), vec![("setup", 1), ("clear", 1)]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(8); 2]);
        authz.assert();
        challenge.assert();
        finalize.assert();
    }

    #[test]
    fn test_pending_authorization_times_out() {
        let mut ca = MockCa::new();
        let _account = ca.mock_account();
        let _order = ca.mock_order();
        let authz = ca
            .post("/authz/1", 200, ca.authorization_body("pending"))
            .expect(5);
        let challenge = ca
            .server
            .mock("POST", "/chall/1")
            .match_body(Matcher::Regex("\"protected\"".to_string()))
            .with_body("{}")
            .expect(1)
            .create();
        let finalize = ca.post("/order/1/finalize", 200, "{}".to_string()).expect(0);

        let provider = RecordingProvider::new();
        let client = build(&ca, provider.clone(), MockClock::new());
        let err = client.get_certificate().unwrap_err();

        match &err {
            ClientError::AuthorizationTimeout {
                checks, max_checks, ..
            } => {
                assert_eq!(*checks, 3);
                assert_eq!(*max_checks, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retry_exhaustion());
        assert_eq!(provider.calls(), vec![("setup", 1), ("clear", 1)]);
        authz.assert();
        challenge.assert();
        finalize.assert();
    }

    #[test]
    fn test_invalid_authorization_fails_fast() {
        let mut ca = MockCa::new();
        let _account = ca.mock_account();
        let _order = ca.mock_order();
        let authz = ca
            .post("/authz/1", 200, ca.authorization_body("invalid"))
            .expect(2);

        let provider = RecordingProvider::new();
        let client = build(&ca, provider.clone(), MockClock::new());
        let err = client.get_certificate().unwrap_err();

        assert!(matches!(
            err,
            ClientError::AuthorizationInvalid {
                status: AuthorizationStatus::Invalid,
                ..
            }
        ));
        assert!(!err.is_retry_exhaustion());
        assert_eq!(provider.calls(), vec![("setup", 1), ("clear", 1)]);
        authz.assert();
    }

    #[test]
    fn test_setup_failure_aborts_before_validation() {
        let mut ca = MockCa::new();
        let _account = ca.mock_account();
        let _order = ca.mock_order();
        let _authz = ca.post("/authz/1", 200, ca.authorization_body("pending"));
        let challenge = ca.post("/chall/1", 200, "{}".to_string()).expect(0);

        let provider = RecordingProvider::failing();
        let clock = MockClock::new();
        let client = build(&ca, provider.clone(), clock.clone());
        let err = client.get_certificate().unwrap_err();

        match err {
            ClientError::ChallengeSetup(errata) => {
                assert_eq!(errata.len(), 1);
                assert_eq!(errata[0].challenge.token, "tok-dns");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), vec![("setup", 1), ("clear", 1)]);
        assert!(clock.sleeps().is_empty());
        challenge.assert();
    }

    #[test]
    fn test_finalize_polls_order_for_certificate_url() {
        let mut ca = MockCa::new();
        let url = ca.url();
        let leaf = self_signed_pem("example.com");

        let _account = ca.mock_account();
        let _order = ca.mock_order();
        let _authz = ca.post("/authz/1", 200, ca.authorization_body("valid"));
        let _finalize = ca.post(
            "/order/1/finalize",
            200,
            r#"{"status": "processing"}"#.to_string(),
        );
        let order_status = ca
            .post(
                "/order/1",
                200,
                serde_json::json!({"status": "valid", "certificate": format!("{url}/cert/1")})
                    .to_string(),
            )
            .expect(1);
        let _cert = ca.post("/cert/1", 200, leaf.clone());

        let client = build(&ca, RecordingProvider::new(), MockClock::new());
        let certificate = client.get_certificate().unwrap();

        assert_eq!(certificate.leaf_pem().trim(), leaf.trim());
        assert!(certificate.chain_pem().is_empty());
        order_status.assert();
    }

    #[test]
    fn test_cancelled_before_first_request() {
        let mut ca = MockCa::new();
        let account = ca
            .server
            .mock("POST", "/new-acct")
            .expect(0)
            .create();

        let provider = RecordingProvider::new();
        let client = build(&ca, provider.clone(), MockClock::new());
        client.cancel_token().cancel();

        assert!(matches!(
            client.get_certificate(),
            Err(ClientError::Cancelled)
        ));
        assert_eq!(provider.calls(), vec![("clear", 0)]);
        account.assert();
    }

    #[test]
    fn test_build_fails_on_directory_error() {
        let mut server = mockito::Server::new();
        let _directory = server
            .mock("GET", "/directory")
            .with_status(503)
            .with_body("maintenance")
            .create();

        let result = ClientBuilder::new("example.com")
            .account(Account::create("secp256r1").unwrap())
            .cert_key(KeyPair::create("secp256r1").unwrap())
            .provider(Box::new(RecordingProvider::new()))
            .config(ClientConfig {
                directory_url: format!("{}/directory", server.url()),
                ..ClientConfig::default()
            })
            .build();
        assert!(matches!(
            result,
            Err(ClientError::Directory(DirectoryError::Status { status: 503, .. }))
        ));

        assert!(matches!(
            ClientBuilder::new("example.com").build(),
            Err(ClientError::MissingProvider)
        ));
    }

    #[test]
    fn test_domains_and_key_authorization() {
        let ca = MockCa::new();
        let client = ClientBuilder::new("example.com")
            .alt_names(&["www.example.com", "example.com", "api.example.com"])
            .account(Account::create("secp256r1").unwrap())
            .cert_key(KeyPair::create("secp256r1").unwrap())
            .provider(Box::new(RecordingProvider::new()))
            .config(ca.config(true))
            .clock(Box::new(MockClock::new()))
            .build()
            .unwrap();

        assert_eq!(
            client.domains(),
            ["example.com", "www.example.com", "api.example.com"]
        );
        let thumbprint = client.account().thumbprint().unwrap();
        assert_eq!(
            client.get_keyauthorization("tok").unwrap(),
            format!("tok.{thumbprint}")
        );
    }
}
