//! 傳播等待：輪詢提供者，直到所有挑戰都可見或逾時。

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    challenge::Challenge,
    clock::{Cancelled, Clock},
    provider::Provider,
};

#[derive(Debug, Error)]
pub enum PropagationError {
    /// 超過 `prop_timeout` 後仍有挑戰未就緒。
    #[error("Challenges still unpropagated after {probes} probes: {}", domains(.unready))]
    Timeout {
        probes: usize,
        unready: Vec<Challenge>,
    },
    #[error("{0}")]
    Cancelled(#[from] Cancelled),
}

fn domains(challenges: &[Challenge]) -> String {
    challenges
        .iter()
        .map(|c| c.domain.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

type Result<T> = std::result::Result<T, PropagationError>;

/// 依序產生 `sleep_times` 中的每個值，之後無限重複最後一個值。
///
/// ```
/// # use std::time::Duration;
/// # use racme_issuer::propagation::sleep_iter;
/// let secs: Vec<u64> = sleep_iter(&[1, 2, 4, 8].map(Duration::from_secs))
///     .take(8)
///     .map(|d| d.as_secs())
///     .collect();
/// assert_eq!(secs, [1, 2, 4, 8, 8, 8, 8, 8]);
/// ```
pub fn sleep_iter(sleep_times: &[Duration]) -> impl Iterator<Item = Duration> + '_ {
    sleep_times
        .iter()
        .copied()
        .chain(sleep_times.last().copied().into_iter().cycle())
}

/// 單次探測的結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// 所有挑戰都已可見。
    Ready,
    /// 尚未就緒，且還在期限內。
    StillWaiting(Vec<Challenge>),
    /// 期限已過，最後一次探測仍有未就緒的挑戰。
    Exhausted {
        probes: usize,
        unready: Vec<Challenge>,
    },
}

/// 詢問提供者一次，並依期限判斷下一步。
///
/// 期限判斷在探測之後進行，因此期限剛過時仍會多探測一次。
pub fn probe(
    provider: &dyn Provider,
    unready: &[Challenge],
    probes: usize,
    deadline: Duration,
    clock: &dyn Clock,
) -> PollOutcome {
    let errata = provider.unpropagated(unready);
    if errata.is_empty() {
        return PollOutcome::Ready;
    }

    let still: Vec<Challenge> = errata.into_iter().map(|e| e.challenge).collect();
    debug!(probes, unready = still.len(), "challenges not yet propagated");
    if clock.now() > deadline {
        PollOutcome::Exhausted {
            probes,
            unready: still,
        }
    } else {
        PollOutcome::StillWaiting(still)
    }
}

/// 等待提供者發佈的挑戰傳播完成。
///
/// 1. `delay` 大於零時先無條件休眠。
/// 2. `timeout` 為零時直接回傳，不呼叫 `unpropagated`。
/// 3. 否則反覆探測，探測之間依退避序列休眠，直到全部就緒或超過期限。
pub fn propagation_delay(
    challenges: &[Challenge],
    provider: &dyn Provider,
    clock: &dyn Clock,
) -> Result<()> {
    let config = provider.propagation();

    if !config.delay().is_zero() {
        info!(delay = ?config.delay(), "waiting before propagation check");
        clock.sleep(config.delay())?;
    }

    if config.timeout().is_zero() {
        return Ok(());
    }

    let deadline = clock.now() + config.timeout();
    let mut backoff = sleep_iter(config.sleep_times());
    let mut unready = challenges.to_vec();
    let mut probes = 0;

    loop {
        probes += 1;
        match probe(provider, &unready, probes, deadline, clock) {
            PollOutcome::Ready => {
                info!(probes, "challenges propagated");
                return Ok(());
            }
            PollOutcome::StillWaiting(still) => {
                unready = still;
                clock.sleep(backoff.next().unwrap_or(Duration::ZERO))?;
            }
            PollOutcome::Exhausted { probes, unready } => {
                warn!(probes, unready = unready.len(), "propagation timed out");
                return Err(PropagationError::Timeout { probes, unready });
            }
        }
    }
}
