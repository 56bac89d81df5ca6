//! Process-wide agent state shared by the reconciliation loops.

use parking_lot::RwLock;
use pa_types::{NodeConfig, RateLimit, User};
use std::sync::Arc;

#[derive(Default)]
struct AgentState {
    node_config: Option<NodeConfig>,
    users: Vec<User>,
    rate_limits: Vec<RateLimit>,
    user_emails: Vec<String>,
}

/// Facade over the shared mutable record. Every accessor takes the lock
/// for the minimum span and clones out, so no caller ever holds the
/// lock across an await point.
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<AgentState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_config(&self) -> Option<NodeConfig> {
        self.inner.read().node_config.clone()
    }

    pub fn set_node_config(&self, config: NodeConfig) {
        self.inner.write().node_config = Some(config);
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.read().users.clone()
    }

    pub fn rate_limits(&self) -> Vec<RateLimit> {
        self.inner.read().rate_limits.clone()
    }

    /// Install a new user list and rate-limit set, returning the
    /// previous ones for diffing. The tracked email list follows the
    /// new users in the same critical section.
    pub fn swap_users(
        &self,
        users: Vec<User>,
        rate_limits: Vec<RateLimit>,
    ) -> (Vec<User>, Vec<RateLimit>) {
        let mut state = self.inner.write();
        let old_users = std::mem::replace(&mut state.users, users);
        let old_limits = std::mem::replace(&mut state.rate_limits, rate_limits);
        state.user_emails = state.users.iter().map(|u| u.email.clone()).collect();
        (old_users, old_limits)
    }

    /// Emails of the currently tracked users, for alive reporting and
    /// online counting.
    pub fn user_emails(&self) -> Vec<String> {
        self.inner.read().user_emails.clone()
    }

    /// Inbound tags of the current node configuration; the kick path
    /// removes an offending user from every one of them.
    pub fn inbound_tags(&self) -> Vec<String> {
        self.inner
            .read()
            .node_config
            .as_ref()
            .map(|c| c.inbound_tags())
            .unwrap_or_default()
    }
}
