use hickory_resolver::proto::rr::RecordType;
use log::{debug, error, info, warn};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    select,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::channel::{Notice, Notifier};
use crate::media::Mood;
use crate::probe::{ProbeFailure, Resolve};
use crate::stats::StatsSource;
use crate::subscriptions::{SubscriberId, SubscriptionStore};

/// Consecutive failures needed before subscribers hear about an outage.
const DOWN_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Suspect,
    Down,
}

/// A state change worth broadcasting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Down(String),
    Up,
}

impl Transition {
    fn notice(&self) -> Notice {
        match self {
            Transition::Down(detail) => Notice::with_mood(
                format!("\u{1f6a8} DoT is unreachable!\n{detail}"),
                Mood::Negative,
            ),
            Transition::Up => Notice::with_mood("\u{2705} DoT is back up", Mood::Positive),
        }
    }
}

/// Periodic DoT health check with failure de-bouncing.
///
/// Owns the consecutive failure counter. Only [`HealthMonitor::tick`]
/// increments it; [`HealthMonitor::reset`] re-baselines it when someone
/// (re)subscribes.
pub struct HealthMonitor {
    resolver: Arc<dyn Resolve>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<dyn StatsSource>,
    store: Arc<SubscriptionStore>,
    domain: String,
    status_chat: Option<SubscriberId>,
    failures: Mutex<u32>,
    last_status: Mutex<Option<String>>,
}

impl HealthMonitor {
    pub fn new(
        resolver: Arc<dyn Resolve>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<dyn StatsSource>,
        store: Arc<SubscriptionStore>,
        domain: impl Into<String>,
        status_chat: Option<SubscriberId>,
    ) -> Self {
        Self {
            resolver,
            notifier,
            stats,
            store,
            domain: domain.into(),
            status_chat,
            failures: Mutex::new(0),
            last_status: Mutex::new(None),
        }
    }

    pub fn failures(&self) -> u32 {
        *self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn health(&self) -> Health {
        match self.failures() {
            0 => Health::Healthy,
            n if n < DOWN_THRESHOLD => Health::Suspect,
            _ => Health::Down,
        }
    }

    pub fn reset(&self) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if *failures > 0 {
            info!("Resetting failure counter (was {})", *failures);
        }
        *failures = 0;
    }

    /// Feeds one probe outcome into the counter and reports the edge it
    /// crossed, if any. Only the tick reaching exactly the threshold reports
    /// `Down`, so a sustained outage alerts once.
    pub fn observe(&self, outcome: Result<(), ProbeFailure>) -> Option<Transition> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(()) => {
                let previous = std::mem::replace(&mut *failures, 0);
                (previous >= DOWN_THRESHOLD).then_some(Transition::Up)
            }
            Err(failure) => {
                *failures = failures.saturating_add(1);
                warn!("DNS error: {failure} (failure no. {})", *failures);
                (*failures == DOWN_THRESHOLD).then(|| Transition::Down(failure.to_string()))
            }
        }
    }

    /// Runs one health check. Never fails; at most one broadcast is sent.
    pub async fn tick(&self) -> Option<Transition> {
        let outcome = match self.resolver.resolve(&self.domain, RecordType::A).await {
            // An NXDOMAIN answer still came from a working resolver
            Ok(_) | Err(ProbeFailure::NotFound(_)) => Ok(()),
            Err(failure) => Err(failure),
        };
        let healthy = outcome.is_ok();

        let transition = self.observe(outcome);
        match &transition {
            Some(t) => {
                info!("DoT state changed: {t:?}");
                self.broadcast(&t.notice()).await;
            }
            None if healthy => debug!("{}: UP", self.domain),
            None => {}
        }

        if healthy {
            self.refresh_status().await;
        }
        transition
    }

    /// Sends `notice` to every current subscriber. Returns how many deliveries
    /// succeeded; a failed recipient does not stop the rest.
    pub async fn broadcast(&self, notice: &Notice) -> usize {
        let recipients = self.store.snapshot();
        let mut delivered = 0;
        for recipient in &recipients {
            match self.notifier.send(recipient, notice).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to notify {recipient}: {e}"),
            }
        }
        info!("Broadcast delivered to {delivered}/{}", recipients.len());
        delivered
    }

    /// Puts the current stats into the status chat's description, skipping
    /// the call when the text has not changed.
    async fn refresh_status(&self) {
        let Some(chat) = &self.status_chat else {
            return;
        };

        let text = self.stats.fetch().await.to_string();
        {
            let last = self.last_status.lock().unwrap_or_else(PoisonError::into_inner);
            if last.as_deref() == Some(text.as_str()) {
                return;
            }
        }

        match self.notifier.set_description(chat, &text).await {
            Ok(()) => {
                *self.last_status.lock().unwrap_or_else(PoisonError::into_inner) = Some(text);
            }
            Err(e) => warn!("Failed to update status of {chat}: {e}"),
        }
    }

    /// Runs [`HealthMonitor::tick`] every `interval` until `token` is cancelled.
    ///
    /// # Behavior
    ///
    /// - The first check runs immediately
    /// - Checks never overlap; a slow check delays the next one
    /// - An in-flight check is allowed to finish on shutdown
    /// - A check that panics is counted as a failed probe and the schedule
    ///   carries on
    pub async fn run(self: &Arc<Self>, interval: Duration, token: CancellationToken) {
        info!("Starting DoT monitoring of {}...", self.domain);
        info!("Check interval: {} seconds", interval.as_secs());

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => {},
                () = token.cancelled() => {
                    info!("Shutdown requested, stopping monitor");
                    break;
                }
            }
            self.guarded_tick().await;
        }

        info!("DoT monitoring stopped gracefully");
    }

    async fn guarded_tick(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        if let Err(e) = tokio::spawn(async move { monitor.tick().await }).await {
            error!("Health check panicked: {e}");
            let failure = ProbeFailure::Protocol("health check panicked".to_string());
            if let Some(transition) = self.observe(Err(failure)) {
                self.broadcast(&transition.notice()).await;
            }
        }
    }
}
