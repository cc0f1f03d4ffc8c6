//! In-memory stand-ins for the network collaborators.

use async_trait::async_trait;
use hickory_resolver::proto::rr::RecordType;
use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use crate::channel::{Notice, Notifier, Origin};
use crate::error::Error;
use crate::probe::{ProbeResult, Resolve};
use crate::stats::{StatsSource, StatsSummary};
use crate::subscriptions::SubscriberId;

/// Answers with queued outcomes, then with an empty success.
#[derive(Default)]
pub struct ScriptedResolver {
    outcomes: Mutex<VecDeque<ProbeResult>>,
    pub queries: Mutex<Vec<(String, RecordType)>>,
    panic_next: AtomicBool,
}

impl ScriptedResolver {
    /// Panics on the first query, then behaves normally.
    pub fn panicking_once() -> Self {
        Self {
            panic_next: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn push(&self, outcome: ProbeResult) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl Resolve for ScriptedResolver {
    async fn resolve(&self, domain: &str, record_type: RecordType) -> ProbeResult {
        self.queries
            .lock()
            .unwrap()
            .push((domain.to_string(), record_type));
        assert!(
            !self.panic_next.swap(false, Ordering::SeqCst),
            "resolver exploded"
        );
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(SubscriberId, Notice)>>,
    pub replies: Mutex<Vec<(Origin, Notice)>>,
    pub descriptions: Mutex<Vec<(SubscriberId, String)>>,
    pub failing: Option<SubscriberId>,
    pub attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn failing_for(id: SubscriberId) -> Self {
        Self {
            failing: Some(id),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(SubscriberId, Notice)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(Origin, Notice)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn descriptions(&self) -> Vec<(SubscriberId, String)> {
        self.descriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &SubscriberId, notice: &Notice) -> Result<(), Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.as_ref() == Some(recipient) {
            return Err(Error::Delivery("chat not found".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), notice.clone()));
        Ok(())
    }

    async fn reply(&self, origin: &Origin, notice: &Notice) -> Result<(), Error> {
        self.replies
            .lock()
            .unwrap()
            .push((origin.clone(), notice.clone()));
        Ok(())
    }

    async fn set_description(&self, chat: &SubscriberId, text: &str) -> Result<(), Error> {
        self.descriptions
            .lock()
            .unwrap()
            .push((chat.clone(), text.to_string()));
        Ok(())
    }
}

pub struct FixedStats(pub StatsSummary);

#[async_trait]
impl StatsSource for FixedStats {
    async fn fetch(&self) -> StatsSummary {
        self.0.clone()
    }
}
