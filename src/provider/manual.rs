use tracing::info;

use super::{
    DnsAlias, Errata, PropagationConfig, Provider, ProviderBase, ProviderError, ProviderOptions,
};
use crate::challenge::{Challenge, ChallengeType};

/// 手動操作用的提示語言。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    ZhTw,
    En,
}

impl Lang {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "zh-tw" => Some(Self::ZhTw),
            "en" => Some(Self::En),
            _ => None,
        }
    }
}

/// 不做任何自動化，只把需要人工新增或移除的內容寫進日誌。
///
/// 可處理 `http-01` 或 `dns-01` 其中一種；`unpropagated` 一律回報全部就緒。
#[derive(Debug, Clone)]
pub struct ManualProvider {
    base: ProviderBase,
    lang: Lang,
    alias: DnsAlias,
}

impl ManualProvider {
    pub fn new(chal_type: ChallengeType, lang: Lang, propagation: PropagationConfig) -> Self {
        let base = match chal_type {
            ChallengeType::Http01 => ProviderBase::http(propagation),
            ChallengeType::Dns01 => ProviderBase::dns(propagation),
        };
        Self {
            base,
            lang,
            alias: DnsAlias::default(),
        }
    }

    /// 選項：`chal_type`（預設 `http-01`）、`lang`（`zh-tw` 或 `en`）、`alias`，
    /// 以及傳播時間設定。
    pub fn from_options(mut options: ProviderOptions) -> Result<Self, ProviderError> {
        let chal_type = match options.take("chal_type") {
            Some(raw) => raw.parse::<ChallengeType>()?,
            None => ChallengeType::Http01,
        };
        let lang = match options.take("lang") {
            Some(raw) => Lang::parse(&raw).ok_or(ProviderError::InvalidOption {
                name: "lang".to_string(),
                value: raw,
            })?,
            None => Lang::ZhTw,
        };
        let alias = DnsAlias::new(options.take("alias"));
        let propagation =
            PropagationConfig::from_options(&mut options, PropagationConfig::default())?;
        options.finish()?;

        let mut provider = Self::new(chal_type, lang, propagation);
        provider.alias = alias;
        Ok(provider)
    }

    /// 單一挑戰的操作說明。
    pub fn instructions(&self, adding: bool, challenge: &Challenge) -> String {
        match (challenge.challenge_type, self.lang) {
            (ChallengeType::Http01, Lang::ZhTw) => format!(
                "HTTP-01 驗證步驟：{}文件 http://{}/.well-known/acme-challenge/{}，內容：{}",
                if adding { "建立" } else { "刪除" },
                challenge.domain,
                challenge.token,
                challenge.key_authorization
            ),
            (ChallengeType::Http01, Lang::En) => format!(
                "HTTP-01: {} file http://{}/.well-known/acme-challenge/{} with content {}",
                if adding { "create" } else { "remove" },
                challenge.domain,
                challenge.token,
                challenge.key_authorization
            ),
            (ChallengeType::Dns01, lang) => {
                let target = self.alias.target_domain(challenge);
                let cname = self.alias.cname_domain(challenge);
                let value = challenge.dns_txt_value();
                match (lang, cname) {
                    (Lang::ZhTw, None) => format!(
                        "DNS-01 驗證步驟：{} TXT 記錄 {}，記錄值：{}",
                        if adding { "新增" } else { "刪除" },
                        target,
                        value
                    ),
                    (Lang::ZhTw, Some(cname)) => format!(
                        "DNS-01 驗證步驟：{} TXT 記錄 {}，記錄值：{}（CNAME {} 指向 {}）",
                        if adding { "新增" } else { "刪除" },
                        target,
                        value,
                        cname,
                        target
                    ),
                    (Lang::En, None) => format!(
                        "DNS-01: {} TXT record {} with value {}",
                        if adding { "add" } else { "remove" },
                        target,
                        value
                    ),
                    (Lang::En, Some(cname)) => format!(
                        "DNS-01: {} TXT record {} with value {} (CNAME {} -> {})",
                        if adding { "add" } else { "remove" },
                        target,
                        value,
                        cname,
                        target
                    ),
                }
            }
        }
    }
}

impl Provider for ManualProvider {
    fn name(&self) -> &str {
        "manual"
    }

    fn chal_types(&self) -> &[ChallengeType] {
        self.base.chal_types()
    }

    fn propagation(&self) -> &PropagationConfig {
        self.base.propagation()
    }

    fn setup(&self, challenges: &[Challenge]) -> Vec<Errata> {
        for challenge in challenges {
            info!(domain = %challenge.domain, "{}", self.instructions(true, challenge));
        }
        Vec::new()
    }

    fn unpropagated(&self, _challenges: &[Challenge]) -> Vec<Errata> {
        Vec::new()
    }

    fn clear(&self, challenges: &[Challenge]) -> Vec<Errata> {
        for challenge in challenges {
            info!(domain = %challenge.domain, "{}", self.instructions(false, challenge));
        }
        Vec::new()
    }
}
