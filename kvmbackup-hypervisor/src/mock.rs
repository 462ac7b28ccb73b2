//! Mock hypervisor backend for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

use crate::error::{HypervisorError, Result};
use crate::traits::Hypervisor;
use crate::types::PowerState;

/// Callback run on every power-state query, with the queried domain name.
pub type QueryHook = Arc<dyn Fn(&str) + Send + Sync>;

/// How a mock domain reacts to `shutdown` and `suspend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuiesceBehavior {
    /// The target state is reached before the next query.
    Immediate,
    /// The next `n` queries still report the old state.
    AfterQueries(u32),
    /// The command is accepted but the domain never changes state.
    Never,
    /// The command itself fails.
    Fail,
}

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    PowerState(String),
    Shutdown(String),
    Suspend(String),
    Resume(String),
    Start(String),
}

/// Mock hypervisor backend.
///
/// Simulates domain power transitions in memory and records every call,
/// so orchestration can be tested without libvirt.
pub struct MockBackend {
    domains: RwLock<HashMap<String, MockDomain>>,
    calls: RwLock<Vec<MockCall>>,
    query_hook: RwLock<Option<QueryHook>>,
}

struct MockDomain {
    state: PowerState,
    behavior: QuiesceBehavior,
    /// Target state and the number of queries left before it is reached
    pending: Option<(PowerState, u32)>,
}

impl MockBackend {
    /// Create a new mock backend with no domains.
    pub fn new() -> Self {
        info!("Creating mock hypervisor backend");
        Self {
            domains: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            query_hook: RwLock::new(None),
        }
    }

    /// Register a domain in the given state with immediate quiescing.
    pub fn with_domain(self, name: &str, state: PowerState) -> Self {
        self.with_domain_behavior(name, state, QuiesceBehavior::Immediate)
    }

    /// Register a domain with a specific quiesce behavior.
    pub fn with_domain_behavior(self, name: &str, state: PowerState, behavior: QuiesceBehavior) -> Self {
        if let Ok(mut domains) = self.domains.write() {
            domains.insert(name.to_string(), MockDomain {
                state,
                behavior,
                pending: None,
            });
        }
        self
    }

    /// Run `hook` on every power-state query.
    pub fn on_power_state(self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        if let Ok(mut slot) = self.query_hook.write() {
            *slot = Some(Arc::new(hook));
        }
        self
    }

    /// Current state of a domain without recording a call.
    pub fn state_of(&self, name: &str) -> Option<PowerState> {
        self.domains.read().ok()?.get(name).map(|d| d.state)
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls made so far that are not power-state queries.
    pub fn commands(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, MockCall::PowerState(_)))
            .collect()
    }

    /// Number of power-state queries made for `name`.
    pub fn query_count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::PowerState(n) if n == name))
            .count()
    }

    fn record(&self, call: MockCall) -> Result<()> {
        self.calls
            .write()
            .map_err(|_| HypervisorError::Internal("Lock poisoned".to_string()))?
            .push(call);
        Ok(())
    }

    /// Apply a state change request to a domain.
    fn transition(
        &self,
        name: &str,
        command: &str,
        allowed_from: &[PowerState],
        target: PowerState,
        quiesce: bool,
    ) -> Result<()> {
        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        let domain = domains.get_mut(name).ok_or_else(|| HypervisorError::ControlCommand {
            command: format!("virsh {} {}", command, name),
            reason: format!("failed to get domain '{}'", name),
        })?;

        if !allowed_from.contains(&domain.state) {
            return Err(HypervisorError::InvalidState(format!(
                "cannot {} domain '{}' while {}",
                command, name, domain.state
            )));
        }

        if !quiesce {
            domain.state = target;
            return Ok(());
        }

        match domain.behavior {
            QuiesceBehavior::Immediate => domain.state = target,
            QuiesceBehavior::AfterQueries(n) => domain.pending = Some((target, n)),
            QuiesceBehavior::Never => {}
            QuiesceBehavior::Fail => {
                return Err(HypervisorError::ControlCommand {
                    command: format!("virsh {} {}", command, name),
                    reason: "exit status: 1: simulated failure".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hypervisor for MockBackend {
    #[instrument(skip(self))]
    async fn power_state(&self, name: &str) -> Result<PowerState> {
        self.record(MockCall::PowerState(name.to_string()))?;

        let hook = self.query_hook.read().ok().and_then(|h| h.clone());
        if let Some(hook) = hook {
            hook(name);
        }

        let mut domains = self.domains.write().map_err(|_| {
            HypervisorError::Internal("Lock poisoned".to_string())
        })?;

        let Some(domain) = domains.get_mut(name) else {
            return Ok(PowerState::Unknown);
        };

        if let Some((target, remaining)) = domain.pending {
            if remaining == 0 {
                domain.state = target;
                domain.pending = None;
            } else {
                domain.pending = Some((target, remaining - 1));
            }
        }

        debug!(state = %domain.state, "Mock power state");
        Ok(domain.state)
    }

    async fn shutdown(&self, name: &str) -> Result<()> {
        self.record(MockCall::Shutdown(name.to_string()))?;
        self.transition(name, "shutdown", &[PowerState::Running, PowerState::Paused], PowerState::ShutOff, true)
    }

    async fn suspend(&self, name: &str) -> Result<()> {
        self.record(MockCall::Suspend(name.to_string()))?;
        self.transition(name, "suspend", &[PowerState::Running], PowerState::Paused, true)
    }

    async fn resume(&self, name: &str) -> Result<()> {
        self.record(MockCall::Resume(name.to_string()))?;
        self.transition(name, "resume", &[PowerState::Paused], PowerState::Running, false)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.record(MockCall::Start(name.to_string()))?;
        self.transition(name, "start", &[PowerState::ShutOff], PowerState::Running, false)
    }
}
