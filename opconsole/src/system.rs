//! Shared logical system state.
//!
//! Test suites track what state they believe the machine under test is in
//! (off, booting, at the OS prompt, ...). Consoles only ever touch this to
//! record the state at the time of a fault and to demote it to
//! [`SystemState::Unknown`], so that the caller knows a fresh IPL is needed.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use serde::{Deserialize, Serialize};

/// What the test framework believes the system is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// Nothing is known; recovery (re-IPL) is required.
    #[default]
    Unknown,
    Off,
    Ipling,
    Petitboot,
    PetitbootShell,
    Booting,
    Os,
    PoweringOff,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SystemState::Unknown => "UNKNOWN",
            SystemState::Off => "OFF",
            SystemState::Ipling => "IPLing",
            SystemState::Petitboot => "PETITBOOT",
            SystemState::PetitbootShell => "PETITBOOT_SHELL",
            SystemState::Booting => "BOOTING",
            SystemState::Os => "OS",
            SystemState::PoweringOff => "POWERING_OFF",
        };
        f.write_str(name)
    }
}

/// Cloneable handle to the shared system state.
///
/// Every clone refers to the same state. Writes are last-writer-wins and are
/// immediately visible to readers on other tasks.
#[derive(Debug, Clone, Default)]
pub struct SystemHandle {
    state: Arc<RwLock<SystemState>>,
}

impl SystemHandle {
    /// Create a handle starting in `state`.
    pub fn new(state: SystemState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Current state.
    pub fn state(&self) -> SystemState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite the state.
    pub fn set_state(&self, state: SystemState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Demote to [`SystemState::Unknown`], returning the state it replaced.
    pub fn mark_unknown(&self) -> SystemState {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, SystemState::Unknown);
        debug!("system state {} -> {}", previous, SystemState::Unknown);
        previous
    }
}
