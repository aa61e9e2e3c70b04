//! # Device Mode
//!
//! The operating mode decides what a tag scan means.
//!
//! ## Transition Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │        ┌──────────────┐   advance   ┌───────────────┐                   │
//! │   ───► │ Inventory In │ ──────────► │ Inventory Out │                   │
//! │        └──────────────┘             └───────┬───────┘                   │
//! │               ▲                             │ advance                   │
//! │               │ advance      ┌───────────┐  │                           │
//! │               └───────────── │ Tag Write │ ◄┘                           │
//! │                              └───────────┘                              │
//! │                                                                         │
//! │  Inventory In  : scan → product lookup → confirm quantity → stock in    │
//! │  Inventory Out : scan → product lookup → confirm quantity → stock out   │
//! │  Tag Write     : scan → write the pending product id onto the tag       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `transition_to` refuses anything but the fixed successor. The only way
//! around the cycle is [`ModeStateMachine::force`], used when the remote
//! service asks for a tag write.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Device operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    TagWrite,
    InventoryIn,
    InventoryOut,
}

impl Mode {
    /// Mode the device starts in.
    pub const INITIAL: Mode = Mode::InventoryIn;

    /// Returns the fixed successor in the cycle.
    pub const fn successor(self) -> Mode {
        match self {
            Mode::TagWrite => Mode::InventoryIn,
            Mode::InventoryIn => Mode::InventoryOut,
            Mode::InventoryOut => Mode::TagWrite,
        }
    }

    /// Returns true for the two modes where a scan starts a stock movement.
    pub const fn is_inventory(self) -> bool {
        matches!(self, Mode::InventoryIn | Mode::InventoryOut)
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::INITIAL
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::TagWrite => write!(f, "Tag Write"),
            Mode::InventoryIn => write!(f, "Inventory In"),
            Mode::InventoryOut => write!(f, "Inventory Out"),
        }
    }
}

// =============================================================================
// Mode State Machine
// =============================================================================

/// Thread-safe owner of the current mode.
///
/// Reads take a shared lock and writes an exclusive one, so a reader never
/// sees a transition half-applied and two transitions never interleave.
/// Callers are responsible for notifying observers (display, outbound
/// `ModeSwitch` envelope) after a successful change.
#[derive(Debug)]
pub struct ModeStateMachine {
    current: RwLock<Mode>,
}

impl ModeStateMachine {
    /// Creates a state machine in [`Mode::INITIAL`].
    pub fn new() -> Self {
        Self::with_initial(Mode::INITIAL)
    }

    /// Creates a state machine starting in `mode`.
    pub fn with_initial(mode: Mode) -> Self {
        ModeStateMachine {
            current: RwLock::new(mode),
        }
    }

    /// Returns the current mode.
    pub fn current_mode(&self) -> Mode {
        *self.read()
    }

    /// Moves to the fixed successor and returns the new mode.
    pub fn advance(&self) -> Mode {
        let mut current = self.write();
        *current = current.successor();
        *current
    }

    /// Moves to `target` if it is the fixed successor of the current mode.
    ///
    /// ## Errors
    /// [`CoreError::InvalidTransition`] for every other target; the mode is
    /// left unchanged.
    pub fn transition_to(&self, target: Mode) -> CoreResult<Mode> {
        let mut current = self.write();
        if current.successor() != target {
            return Err(CoreError::InvalidTransition {
                from: *current,
                to: target,
            });
        }
        *current = target;
        Ok(target)
    }

    /// Sets the mode unconditionally and returns the previous one.
    ///
    /// Reserved for the remote tag-write request, which must put the device
    /// into [`Mode::TagWrite`] whatever it is doing.
    pub fn force(&self, target: Mode) -> Mode {
        let mut current = self.write();
        std::mem::replace(&mut *current, target)
    }

    // A panic while holding the lock cannot leave a half-written Mode (it is
    // Copy and assigned in one step), so a poisoned lock is still valid.
    fn read(&self) -> RwLockReadGuard<'_, Mode> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Mode> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ModeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const CYCLE: [Mode; 3] = [Mode::InventoryIn, Mode::InventoryOut, Mode::TagWrite];

    #[test]
    fn test_initial_mode() {
        assert_eq!(ModeStateMachine::new().current_mode(), Mode::InventoryIn);
    }

    #[test]
    fn test_advance_follows_cycle() {
        for k in 0..10 {
            let modes = ModeStateMachine::new();
            for _ in 0..k {
                modes.advance();
            }
            assert_eq!(modes.current_mode(), CYCLE[k % 3], "after {k} advances");
        }
    }

    #[test]
    fn test_three_advances_return_to_start() {
        let modes = ModeStateMachine::new();
        assert_eq!(modes.advance(), Mode::InventoryOut);
        assert_eq!(modes.advance(), Mode::TagWrite);
        assert_eq!(modes.advance(), Mode::InventoryIn);
    }

    #[test]
    fn test_transition_to_only_accepts_successor() {
        for start in CYCLE {
            for target in CYCLE {
                let modes = ModeStateMachine::with_initial(start);
                let result = modes.transition_to(target);
                if target == start.successor() {
                    assert_eq!(result.unwrap(), target);
                    assert_eq!(modes.current_mode(), target);
                } else {
                    assert!(matches!(
                        result,
                        Err(CoreError::InvalidTransition { from, to }) if from == start && to == target
                    ));
                    assert_eq!(modes.current_mode(), start);
                }
            }
        }
    }

    #[test]
    fn test_force_skips_cycle() {
        let modes = ModeStateMachine::new();
        let previous = modes.force(Mode::TagWrite);
        assert_eq!(previous, Mode::InventoryIn);
        assert_eq!(modes.current_mode(), Mode::TagWrite);
    }

    #[test]
    fn test_concurrent_advances_are_serialized() {
        let modes = Arc::new(ModeStateMachine::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let modes = modes.clone();
                std::thread::spawn(move || {
                    for _ in 0..300 {
                        modes.advance();
                        let _ = modes.current_mode();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // 2400 advances is a multiple of 3: no advance may be lost.
        assert_eq!(modes.current_mode(), Mode::InventoryIn);
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&Mode::InventoryOut).unwrap(),
            "\"inventory_out\""
        );
        let mode: Mode = serde_json::from_str("\"tag_write\"").unwrap();
        assert_eq!(mode, Mode::TagWrite);
    }
}
