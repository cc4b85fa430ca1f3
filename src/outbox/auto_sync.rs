//! Connectivity-driven auto-sync trigger.
//!
//! ```text
//!          offline → online
//!   Idle ────────────────────► Armed
//!    ▲                           │ debounce elapsed
//!    │         finish            ▼
//!    └────────────────────── Firing
//! ```
//!
//! The trigger fires at most once per offline → online transition. Going
//! offline while armed disarms it; a manual batch sync also disarms it.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Firing,
}

#[derive(Debug)]
pub struct AutoSyncTrigger {
    phase: Phase,
    online: bool,
}

impl AutoSyncTrigger {
    pub fn new(online: bool) -> Self {
        Self {
            phase: Phase::Idle,
            online,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Records a connectivity report. Returns `true` when this report armed
    /// the trigger, meaning the caller should start the debounce timer.
    pub fn on_connectivity(&mut self, online: bool) -> bool {
        let was_online = std::mem::replace(&mut self.online, online);

        match (was_online, online, self.phase) {
            (false, true, Phase::Idle) => {
                self.phase = Phase::Armed;
                true
            }
            (_, false, Phase::Armed) => {
                self.phase = Phase::Idle;
                false
            }
            _ => false,
        }
    }

    /// Called when the debounce timer elapses. Returns `true` when the
    /// auto-sync pass should run now.
    pub fn begin_fire(&mut self) -> bool {
        if self.phase == Phase::Armed && self.online {
            self.phase = Phase::Firing;
            true
        } else {
            false
        }
    }

    pub fn finish(&mut self) {
        if self.phase == Phase::Firing {
            self.phase = Phase::Idle;
        }
    }

    /// Cancels a pending auto-sync; a running pass is left to finish.
    pub fn disarm(&mut self) {
        if self.phase == Phase::Armed {
            self.phase = Phase::Idle;
        }
    }
}
