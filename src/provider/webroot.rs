use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::{Errata, PropagationConfig, Provider, ProviderBase, ProviderError, ProviderOptions};
use crate::challenge::{Challenge, ChallengeType};

const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// 把 `http-01` 的 key authorization 寫進網站根目錄。
///
/// 檔案位置為 `<webroot>/.well-known/acme-challenge/<token>`。
#[derive(Debug, Clone)]
pub struct WebrootProvider {
    base: ProviderBase,
    webroot: PathBuf,
}

impl WebrootProvider {
    pub fn new(webroot: impl Into<PathBuf>, propagation: PropagationConfig) -> Self {
        Self {
            base: ProviderBase::http(propagation),
            webroot: webroot.into(),
        }
    }

    /// 選項：`webroot`（必填）與傳播時間設定。
    pub fn from_options(mut options: ProviderOptions) -> Result<Self, ProviderError> {
        let webroot = options.require("webroot")?;
        let propagation =
            PropagationConfig::from_options(&mut options, PropagationConfig::default())?;
        options.finish()?;
        Ok(Self::new(webroot, propagation))
    }

    pub fn webroot(&self) -> &Path {
        &self.webroot
    }

    /// 挑戰檔案的完整路徑。
    pub fn challenge_path(&self, challenge: &Challenge) -> PathBuf {
        self.webroot.join(CHALLENGE_DIR).join(&challenge.token)
    }

    fn write(&self, challenge: &Challenge) -> io::Result<()> {
        let path = self.challenge_path(challenge);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, &challenge.key_authorization)?;
        debug!(path = %path.display(), "challenge file written");
        Ok(())
    }
}

impl Provider for WebrootProvider {
    fn name(&self) -> &str {
        "webroot"
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
            .filter_map(|c| {
                self.write(c)
                    .err()
                    .map(|e| Errata::failed(format!("cannot write challenge file: {}", e), c))
            })
            .collect()
    }

    fn unpropagated(&self, challenges: &[Challenge]) -> Vec<Errata> {
        challenges
            .iter()
            .filter_map(|c| match fs::read_to_string(self.challenge_path(c)) {
                Ok(content) if content.trim() == c.key_authorization => None,
                Ok(_) => Some(Errata::unready("challenge file content mismatch", c)),
                Err(e) => Some(Errata::unready(format!("challenge file unreadable: {}", e), c)),
            })
            .collect()
    }

    fn clear(&self, challenges: &[Challenge]) -> Vec<Errata> {
        challenges
            .iter()
            .filter_map(|c| match fs::remove_file(self.challenge_path(c)) {
                Ok(()) => None,
                Err(e) if e.kind() == io::ErrorKind::NotFound => None,
                Err(e) => Some(Errata::failed(
                    format!("cannot remove challenge file: {}", e),
                    c,
                )),
            })
            .collect()
    }
}
