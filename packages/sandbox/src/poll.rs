// ABOUTME: Bounded retry polling with a fixed interval and periodic progress reports
// ABOUTME: Used for container startup checks and transaction confirmation

use sorobox_config::NetworkSettings;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Report progress every N attempts; zero disables reports
    pub progress_every: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            progress_every: 0,
        }
    }

    pub fn with_progress_every(mut self, every: u32) -> Self {
        self.progress_every = every;
        self
    }

    pub fn for_transactions(network: &NetworkSettings) -> Self {
        Self {
            interval: network.poll_interval,
            max_attempts: network.poll_max_attempts,
            progress_every: network.poll_progress_every,
        }
    }
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            PollOutcome::Ready { value, .. } => Some(value),
            PollOutcome::Exhausted { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollState {
    Waiting { attempt: u32 },
    Finished,
}

/// Attempt counter for one polling run
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    state: PollState,
}

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            state: PollState::Waiting { attempt: 0 },
        }
    }

    /// Advance to the next attempt, or `None` once the ceiling is reached
    pub fn next_attempt(&mut self) -> Option<u32> {
        match self.state {
            PollState::Waiting { attempt } if attempt < self.policy.max_attempts => {
                self.state = PollState::Waiting {
                    attempt: attempt + 1,
                };
                Some(attempt + 1)
            }
            _ => {
                self.state = PollState::Finished;
                None
            }
        }
    }

    pub fn finish(&mut self) {
        self.state = PollState::Finished;
    }

    pub fn should_report(&self, attempt: u32) -> bool {
        self.policy.progress_every > 0 && attempt % self.policy.progress_every == 0
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.policy.max_attempts
    }
}

/// Probe until ready or the attempt ceiling is reached.
///
/// `on_progress` receives the attempt number every `progress_every` pending attempts.
pub async fn poll_until<T, F, Fut, P>(policy: PollPolicy, mut probe: F, mut on_progress: P) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Probe<T>>,
    P: FnMut(u32),
{
    let mut poller = Poller::new(policy);
    let mut last = 0;
    while let Some(attempt) = poller.next_attempt() {
        last = attempt;
        if let Probe::Ready(value) = probe(attempt).await {
            poller.finish();
            return PollOutcome::Ready {
                value,
                attempts: attempt,
            };
        }
        if poller.should_report(attempt) {
            on_progress(attempt);
        }
        if !poller.is_last(attempt) {
            tokio::time::sleep(policy.interval).await;
        }
    }
    PollOutcome::Exhausted { attempts: last }
}
