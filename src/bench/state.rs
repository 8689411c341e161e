use thiserror::Error;
use tracing::debug;

/// Lifecycle of one role's endpoint. States only ever move forward, a role
/// may skip states it has no use for (the sender never listens).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoleState {
    Listening,
    Connected,
    Transferring,
    Closing,
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal role transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: RoleState,
    pub to: RoleState,
}

#[derive(Debug, Clone)]
pub struct RoleTracker {
    history: Vec<RoleState>,
}

impl RoleTracker {
    pub fn new(initial: RoleState) -> Self {
        Self {
            history: vec![initial],
        }
    }

    pub fn current(&self) -> RoleState {
        // Never empty, seeded in new().
        self.history[self.history.len() - 1]
    }

    pub fn advance(&mut self, to: RoleState) -> Result<(), IllegalTransition> {
        let from = self.current();
        if to <= from {
            return Err(IllegalTransition { from, to });
        }
        debug!("Role state {:?} -> {:?}", from, to);
        self.history.push(to);
        Ok(())
    }

    pub fn history(&self) -> &[RoleState] {
        &self.history
    }

    pub fn into_history(self) -> Vec<RoleState> {
        self.history
    }
}
