use std::{collections::HashMap, sync::Mutex, time::Duration};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    DnsAlias, Errata, PropagationConfig, Provider, ProviderBase, ProviderError, ProviderOptions,
};
use crate::challenge::{Challenge, ChallengeType};

type Result<T> = std::result::Result<T, ProviderError>;

pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
pub const GOOGLE_DOH_RESOLVER: &str = "https://dns.google/resolve";

const DEFAULT_TTL: u32 = 60;
const HTTP_TIMEOUT: Duration = Duration::from_secs(65);
const DNS_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DNS_CHECK_TIMEOUT: Duration = Duration::from_secs(120);

/// 透過 Cloudflare API 發佈 `dns-01` TXT 記錄。
///
/// 傳播檢查向 DNS-over-HTTPS 解析器（預設 Google）查詢 TXT 記錄。
#[derive(Debug)]
pub struct CloudflareProvider {
    base: ProviderBase,
    client: Client,
    api_token: String,
    api_base: String,
    resolver_url: String,
    ttl: u32,
    alias: DnsAlias,
    fixed_zone: Option<String>,
    zone_ids: Mutex<HashMap<String, String>>,
}

impl CloudflareProvider {
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base: ProviderBase::dns(Self::default_propagation()),
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            api_token: api_token.into(),
            api_base: CLOUDFLARE_API_BASE.to_string(),
            resolver_url: GOOGLE_DOH_RESOLVER.to_string(),
            ttl: DEFAULT_TTL,
            alias: DnsAlias::default(),
            fixed_zone: None,
            zone_ids: Mutex::new(HashMap::new()),
        })
    }

    /// 每 5 秒檢查一次，最多 120 秒。
    pub fn default_propagation() -> PropagationConfig {
        PropagationConfig::every(DNS_CHECK_TIMEOUT, DNS_CHECK_INTERVAL)
    }

    /// 選項：`api_token`（必填）、`zone_id`、`api_base_url`、`resolver_url`、
    /// `alias`、`ttl`，以及傳播時間設定。
    pub fn from_options(mut options: ProviderOptions) -> Result<Self> {
        let mut provider = Self::new(options.require("api_token")?)?;
        if let Some(zone_id) = options.take("zone_id") {
            provider = provider.with_zone_id(zone_id);
        }
        if let Some(url) = options.take("api_base_url") {
            provider = provider.with_api_base(url);
        }
        if let Some(url) = options.take("resolver_url") {
            provider = provider.with_resolver(url);
        }
        provider.alias = DnsAlias::new(options.take("alias"));
        if let Some(ttl) = options.take_parsed::<u32>("ttl")? {
            provider.ttl = ttl;
        }
        let propagation =
            PropagationConfig::from_options(&mut options, Self::default_propagation())?;
        provider.base = ProviderBase::dns(propagation);
        options.finish()?;
        Ok(provider)
    }

    pub fn with_api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_resolver(mut self, url: impl Into<String>) -> Self {
        self.resolver_url = url.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = DnsAlias::new(Some(alias.into()));
        self
    }

    pub fn with_propagation(mut self, propagation: PropagationConfig) -> Self {
        self.base = ProviderBase::dns(propagation);
        self
    }

    /// 所有記錄都放在同一個 zone 時，可跳過 zone 查詢。
    pub fn with_zone_id(mut self, zone_id: impl Into<String>) -> Self {
        self.fixed_zone = Some(zone_id.into());
        self
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.api_token)
    }

    /// 依序以名稱的各個後綴查詢 zone，直到找到為止。
    fn zone_id(&self, name: &str) -> Result<String> {
        if let Some(id) = &self.fixed_zone {
            return Ok(id.clone());
        }
        if let Some(id) = self.zone_ids.lock().ok().and_then(|ids| ids.get(name).cloned()) {
            return Ok(id);
        }

        let labels: Vec<&str> = name.trim_end_matches('.').split('.').collect();
        for start in 0..labels.len().saturating_sub(1) {
            let candidate = labels[start..].join(".");
            let response: CloudflareZoneResponse = self
                .client
                .get(format!("{}/zones", self.api_base))
                .query(&[("name", candidate.as_str())])
                .header("Authorization", self.auth())
                .send()?
                .json()?;
            if !response.success {
                return Err(ProviderError::Api(format_cloudflare_errors(response.errors)));
            }
            if let Some(zone) = response.result.into_iter().next() {
                debug!(name, zone = %candidate, "cloudflare zone found");
                if let Ok(mut ids) = self.zone_ids.lock() {
                    ids.insert(name.to_string(), zone.id.clone());
                }
                return Ok(zone.id);
            }
        }
        Err(ProviderError::Api(format!("Zone not found for {}", name)))
    }

    fn list_records(
        &self,
        zone_id: &str,
        record_type: &str,
        name: &str,
    ) -> Result<Vec<CloudflareDnsRecordItem>> {
        let list: CloudflareDnsListResponse = self
            .client
            .get(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .query(&[("type", record_type), ("name", name)])
            .header("Authorization", self.auth())
            .send()?
            .json()?;
        if !list.success {
            return Err(ProviderError::Api(format_cloudflare_errors(list.errors)));
        }
        Ok(list.result)
    }

    fn delete_txt_records(&self, zone_id: &str, name: &str) -> Result<()> {
        for record in self.list_records(zone_id, "TXT", name)? {
            let result: CloudflareDnsResponse = self
                .client
                .delete(format!(
                    "{}/zones/{}/dns_records/{}",
                    self.api_base, zone_id, record.id
                ))
                .header("Authorization", self.auth())
                .send()?
                .json()?;
            if !result.success {
                return Err(ProviderError::Api(format_cloudflare_errors(result.errors)));
            }
        }
        Ok(())
    }

    fn create_record(&self, zone_id: &str, record: &CloudflareDnsRecord) -> Result<()> {
        let result: CloudflareDnsResponse = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.api_base, zone_id))
            .header("Authorization", self.auth())
            .json(record)
            .send()?
            .json()?;
        if !result.success {
            return Err(ProviderError::Api(format_cloudflare_errors(result.errors)));
        }
        Ok(())
    }

    fn publish(&self, challenge: &Challenge) -> Result<()> {
        let target = self.alias.target_domain(challenge);
        let zone_id = self.zone_id(&target)?;
        self.delete_txt_records(&zone_id, &target)?;
        self.create_record(
            &zone_id,
            &CloudflareDnsRecord {
                record_type: "TXT".into(),
                name: target.clone(),
                content: format!("\"{}\"", challenge.dns_txt_value()),
                ttl: self.ttl,
            },
        )?;

        if let Some(cname) = self.alias.cname_domain(challenge) {
            let cname_zone = self.zone_id(&cname)?;
            if self.list_records(&cname_zone, "CNAME", &cname)?.is_empty() {
                self.create_record(
                    &cname_zone,
                    &CloudflareDnsRecord {
                        record_type: "CNAME".into(),
                        name: cname,
                        content: target.clone(),
                        ttl: self.ttl,
                    },
                )?;
            }
        }
        info!(record = %target, "cloudflare TXT record created");
        Ok(())
    }

    fn remove(&self, challenge: &Challenge) -> Result<()> {
        let target = self.alias.target_domain(challenge);
        let zone_id = self.zone_id(&target)?;
        self.delete_txt_records(&zone_id, &target)
    }

    /// 透過 DNS-over-HTTPS 檢查 TXT 記錄是否包含預期內容。
    fn check_dns_record(&self, record_name: &str, expected: &str) -> Result<bool> {
        let json: serde_json::Value = self
            .client
            .get(&self.resolver_url)
            .query(&[("name", record_name), ("type", "TXT")])
            .header("Accept", "application/dns-json")
            .send()?
            .json()?;
        let found = json["Answer"]
            .as_array()
            .map(|answers| {
                answers
                    .iter()
                    .filter_map(|entry| entry["data"].as_str())
                    .any(|s| s.trim_matches('"') == expected)
            })
            .unwrap_or(false);
        Ok(found)
    }
}

impl Provider for CloudflareProvider {
    fn name(&self) -> &str {
        "cloudflare"
    }

    fn chal_types(&self) -> &[ChallengeType] {
        self.base.chal_types()
    }

    fn propagation(&self) -> &PropagationConfig {
        self.base.propagation()
    }

    fn setup(&self, challenges: &[Challenge]) -> Vec<Errata> {
        challenges
            .iter()
            .filter_map(|c| self.publish(c).err().map(|e| Errata::failed(e.to_string(), c)))
            .collect()
    }

    fn unpropagated(&self, challenges: &[Challenge]) -> Vec<Errata> {
        challenges
            .iter()
            .filter_map(|c| {
                let target = self.alias.target_domain(c);
                match self.check_dns_record(&target, &c.dns_txt_value()) {
                    Ok(true) => None,
                    Ok(false) => Some(Errata::unready(format!("{} not visible yet", target), c)),
                    Err(e) => Some(Errata::unready(e.to_string(), c)),
                }
            })
            .collect()
    }

    fn clear(&self, challenges: &[Challenge]) -> Vec<Errata> {
        challenges
            .iter()
            .filter_map(|c| self.remove(c).err().map(|e| Errata::failed(e.to_string(), c)))
            .collect()
    }
}

/// 用於格式化 Cloudflare API 回傳的錯誤訊息。
fn format_cloudflare_errors(errors: Vec<CloudflareError>) -> String {
    errors
        .into_iter()
        .map(|e| format!("{}: {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

/// 用於在 Cloudflare 上建立 DNS 記錄的資料結構。
#[derive(Debug, Serialize)]
struct CloudflareDnsRecord {
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CloudflareDnsListResponse {
    success: bool,
    #[serde(default)]
    result: Vec<CloudflareDnsRecordItem>,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

#[derive(Debug, Deserialize)]
struct CloudflareDnsRecordItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareZoneResponse {
    success: bool,
    #[serde(default)]
    result: Vec<CloudflareZone>,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

#[derive(Debug, Deserialize)]
struct CloudflareZone {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CloudflareDnsResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
}

#[derive(Debug, Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;
    use crate::{challenge::tests::sample, provider::ErrataStatus};

    fn provider(server: &mockito::Server) -> CloudflareProvider {
        CloudflareProvider::new("token")
            .unwrap()
            .with_api_base(server.url())
            .with_resolver(format!("{}/resolve", server.url()))
    }

    #[test]
    fn test_setup_walks_zone_suffixes_and_replaces_records() {
        let mut server = mockito::Server::new();
        let miss = server
            .mock("GET", "/zones")
            .match_query(Matcher::UrlEncoded(
                "name".into(),
                "_acme-challenge.www.example.com".into(),
            ))
            .with_body(r#"{"success":true,"result":[],"errors":[]}"#)
            .create();
        let miss2 = server
            .mock("GET", "/zones")
            .match_query(Matcher::UrlEncoded("name".into(), "www.example.com".into()))
            .with_body(r#"{"success":true,"result":[],"errors":[]}"#)
            .create();
        let hit = server
            .mock("GET", "/zones")
            .match_query(Matcher::UrlEncoded("name".into(), "example.com".into()))
            .match_header("authorization", "Bearer token")
            .with_body(r#"{"success":true,"result":[{"id":"z1"}],"errors":[]}"#)
            .expect(1)
            .create();
        let list = server
            .mock("GET", "/zones/z1/dns_records")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "TXT".into()),
                Matcher::UrlEncoded("name".into(), "_acme-challenge.www.example.com".into()),
            ]))
            .with_body(r#"{"success":true,"result":[{"id":"old"}],"errors":[]}"#)
            .create();
        let delete = server
            .mock("DELETE", "/zones/z1/dns_records/old")
            .with_body(r#"{"success":true,"errors":[]}"#)
            .expect(1)
            .create();
        let chal = sample("www.example.com", ChallengeType::Dns01);
        let create = server
            .mock("POST", "/zones/z1/dns_records")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "type": "TXT",
                "name": "_acme-challenge.www.example.com",
                "content": format!("\"{}\"", chal.dns_txt_value()),
            })))
            .with_body(r#"{"success":true,"errors":[]}"#)
            .expect(1)
            .create();

        let provider = provider(&server);
        assert!(provider.setup(&[chal]).is_empty());

        miss.assert();
        miss2.assert();
        hit.assert();
        list.assert();
        delete.assert();
        create.assert();
    }

    #[test]
    fn test_setup_api_failure_is_errata() {
        let mut server = mockito::Server::new();
        let _zone = server
            .mock("GET", "/zones")
            .match_query(Matcher::Any)
            .with_body(r#"{"success":false,"result":[],"errors":[{"code":9109,"message":"Invalid access token"}]}"#)
            .create();

        let chal = sample("example.com", ChallengeType::Dns01);
        let errata = provider(&server).setup(&[chal]);
        assert_eq!(errata.len(), 1);
        assert_eq!(errata[0].status, ErrataStatus::Failed);
        assert!(errata[0].message.contains("9109: Invalid access token"));
    }

    #[test]
    fn test_unpropagated_uses_doh() {
        let mut server = mockito::Server::new();
        let ready = sample("a.example.com", ChallengeType::Dns01);
        let pending = sample("b.example.com", ChallengeType::Dns01);

        let _a = server
            .mock("GET", "/resolve")
            .match_query(Matcher::UrlEncoded(
                "name".into(),
                "_acme-challenge.a.example.com".into(),
            ))
            .with_body(
                serde_json::json!({
                    "Status": 0,
                    "Answer": [{"name": "_acme-challenge.a.example.com.", "type": 16,
                                "data": format!("\"{}\"", ready.dns_txt_value())}]
                })
                .to_string(),
            )
            .create();
        let _b = server
            .mock("GET", "/resolve")
            .match_query(Matcher::UrlEncoded(
                "name".into(),
                "_acme-challenge.b.example.com".into(),
            ))
            .with_body(r#"{"Status":3}"#)
            .create();

        let errata = provider(&server).unpropagated(&[ready, pending.clone()]);
        assert_eq!(errata.len(), 1);
        assert_eq!(errata[0].status, ErrataStatus::Unready);
        assert_eq!(errata[0].challenge, pending);
    }

    #[test]
    fn test_clear_with_configured_zone_and_alias() {
        let mut server = mockito::Server::new();
        let list = server
            .mock("GET", "/zones/fixed/dns_records")
            .match_query(Matcher::UrlEncoded(
                "name".into(),
                "example.com.acme.example.net".into(),
            ))
            .with_body(r#"{"success":true,"result":[{"id":"r1"},{"id":"r2"}],"errors":[]}"#)
            .create();
        let delete = server
            .mock("DELETE", Matcher::Regex(r"^/zones/fixed/dns_records/r[12]$".into()))
            .with_body(r#"{"success":true,"errors":[]}"#)
            .expect(2)
            .create();

        let provider = provider(&server)
            .with_zone_id("fixed")
            .with_alias("acme.example.net");
        let chal = sample("example.com", ChallengeType::Dns01);
        assert!(provider.clear(&[chal]).is_empty());
        list.assert();
        delete.assert();
    }

    #[test]
    fn test_setup_with_alias_creates_cname() {
        let mut server = mockito::Server::new();
        let chal = sample("example.com", ChallengeType::Dns01);
        let list_txt = server
            .mock("GET", "/zones/fixed/dns_records")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "TXT".into()),
                Matcher::UrlEncoded("name".into(), "example.com.acme.example.net".into()),
            ]))
            .with_body(r#"{"success":true,"result":[],"errors":[]}"#)
            .expect(2)
            .create();
        let create_txt = server
            .mock("POST", "/zones/fixed/dns_records")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "type": "TXT",
                "name": "example.com.acme.example.net",
                "content": format!("\"{}\"", chal.dns_txt_value()),
            })))
            .with_body(r#"{"success":true,"errors":[]}"#)
            .expect(2)
            .create();
        let list_cname_missing = server
            .mock("GET", "/zones/fixed/dns_records")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "CNAME".into()),
                Matcher::UrlEncoded("name".into(), "_acme-challenge.example.com".into()),
            ]))
            .with_body(r#"{"success":true,"result":[],"errors":[]}"#)
            .expect(1)
            .create();
        let create_cname = server
            .mock("POST", "/zones/fixed/dns_records")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "type": "CNAME",
                "name": "_acme-challenge.example.com",
                "content": "example.com.acme.example.net",
            })))
            .with_body(r#"{"success":true,"errors":[]}"#)
            .expect(1)
            .create();

        let provider = provider(&server)
            .with_zone_id("fixed")
            .with_alias("acme.example.net");
        assert!(provider.setup(&[chal.clone()]).is_empty());
        list_cname_missing.assert();
        create_cname.assert();

        // CNAME 已存在時不重複建立。
        list_cname_missing.remove();
        let list_cname_present = server
            .mock("GET", "/zones/fixed/dns_records")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "CNAME".into()),
                Matcher::UrlEncoded("name".into(), "_acme-challenge.example.com".into()),
            ]))
            .with_body(r#"{"success":true,"result":[{"id":"c1"}],"errors":[]}"#)
            .expect(1)
            .create();
        assert!(provider.setup(&[chal]).is_empty());

        list_txt.assert();
        create_txt.assert();
        list_cname_present.assert();
        create_cname.assert();
    }

    #[test]
    fn test_from_options() {
        let provider = CloudflareProvider::from_options(
            ProviderOptions::new()
                .with("api_token", "t")
                .with("api_base_url", "http://localhost:1/")
                .with("ttl", "120"),
        )
        .unwrap();
        assert_eq!(provider.api_base, "http://localhost:1");
        assert_eq!(provider.ttl, 120);
        assert_eq!(provider.propagation(), &CloudflareProvider::default_propagation());
    }
}
