use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::info;

/// Shared pause flag checked by the scheduler before every admission.
///
/// Clones observe the same flag, so a toggle from the operator API is seen by a batch that
/// is already running.
#[derive(Debug, Clone, Default)]
pub struct PauseController {
    paused: Arc<AtomicBool>,
}

impl PauseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        let previous = self.paused.swap(paused, Ordering::SeqCst);
        if previous != paused {
            info!(target = "migrator.scheduler", paused, "pause_toggled");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
