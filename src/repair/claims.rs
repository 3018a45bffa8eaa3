// Guards the one-session-per-candidate rule.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Default)]
pub struct CandidateClaims {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

/// Held while a session owns a candidate file; released on drop.
pub struct CandidateClaim {
    path: PathBuf,
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CandidateClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// None when another session already owns `test_path`.
    pub fn claim(&self, test_path: &Path) -> Option<CandidateClaim> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(test_path.to_path_buf()) {
            return None;
        }

        Some(CandidateClaim {
            path: test_path.to_path_buf(),
            active: Arc::clone(&self.active),
        })
    }

    #[cfg(test)]
    pub fn is_claimed(&self, test_path: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(test_path)
    }
}

impl Drop for CandidateClaim {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}
