//! Persisted ranking weights with feedback-driven nudging.
//!
//! Weights live in a small JSON file next to the rest of the data
//! directory. `submit_feedback` nudges them towards (`up`) or away from
//! (`down`) the semantic signal and renormalizes, so a long run of positive
//! feedback gradually trusts the semantic engine more than lexical matches.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::warn;

use crate::model::Weights;

const SEMANTIC_NUDGE: f64 = 0.01;
const LEXICAL_NUDGE: f64 = 0.005;

pub struct WeightManager {
    path: PathBuf,
    state: Mutex<Weights>,
}

impl WeightManager {
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("weights.json")
    }

    /// Load from `path`, falling back to [`Weights::default`] if the file is
    /// missing or malformed.
    pub fn load(path: PathBuf) -> Self {
        let weights = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<Weights>(&s).ok())
            .map(|mut w| {
                w.normalize();
                w
            })
            .unwrap_or_default();
        WeightManager { path, state: Mutex::new(weights) }
    }

    pub fn current(&self) -> Weights {
        *self.state.lock().unwrap()
    }

    fn persist(&self, weights: &Weights) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(error = %e, "failed to create data dir for weights.json");
                return;
            }
        }
        match serde_json::to_string_pretty(weights) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(error = %e, "failed to persist weights.json");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize weights"),
        }
    }

    /// `up`: nudge semantic +0.01, lexical -0.005. `down`: the inverse.
    /// Clamped to `[0,1]` then renormalized to sum to 1 before persisting.
    pub fn feedback(&self, up: bool) -> Weights {
        let mut w = self.state.lock().unwrap();
        let sign = if up { 1.0 } else { -1.0 };
        w.semantic += sign * SEMANTIC_NUDGE;
        w.lexical -= sign * LEXICAL_NUDGE;
        w.normalize();
        self.persist(&w);
        *w
    }
}
