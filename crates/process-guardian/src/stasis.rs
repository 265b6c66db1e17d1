use presence_core::{LockState, StasisState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Shared stasis state. Consuming actions read the atomic flag; only the
/// guardian writes through `update`.
pub struct StasisCell {
    state: Mutex<StasisState>,
    locked: AtomicBool,
}

impl StasisCell {
    pub fn new(initial: StasisState) -> Self {
        let locked = AtomicBool::new(initial.locked);
        Self {
            state: Mutex::new(initial),
            locked,
        }
    }

    pub fn snapshot(&self) -> StasisState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut StasisState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut state);
        self.locked.store(state.locked, Ordering::SeqCst);
        out
    }
}

impl Default for StasisCell {
    fn default() -> Self {
        Self::new(StasisState::default())
    }
}

impl LockState for StasisCell {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}
