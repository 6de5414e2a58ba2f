//! Cross-exposure update propagation
//!
//! When a master frame is (re)computed, later exposures that share the
//! instrument configuration are told they may take it from the cache. With
//! reuse disabled nothing is propagated and every exposure recomputes.

use crate::calib::cache::UpdateEvent;
use crate::calib::kind::CalibrationType;
use crate::exposure::ExposureState;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Applies the run-level reuse policy to cache updates
#[derive(Debug, Clone)]
pub struct Propagator {
    reuse_master: bool,
    /// Slot type marked for each computed type; identity when absent
    tags: BTreeMap<CalibrationType, CalibrationType>,
}

impl Propagator {
    pub fn new(reuse_master: bool) -> Self {
        Self {
            reuse_master,
            tags: BTreeMap::new(),
        }
    }

    /// Use explicit tags for the slots marked in sibling exposures
    pub fn with_tags(mut self, tags: BTreeMap<CalibrationType, CalibrationType>) -> Self {
        for (from, to) in &tags {
            if from != to {
                warn!(
                    "Updates to {} are propagated as {}; confirm this tagging is intended",
                    from, to
                );
            }
        }
        self.tags = tags;
        self
    }

    pub fn reuse_master(&self) -> bool {
        self.reuse_master
    }

    /// Slot type marked in sibling exposures when `kind` is updated
    pub fn tag(&self, kind: CalibrationType) -> CalibrationType {
        self.tags.get(&kind).copied().unwrap_or(kind)
    }

    /// Mark the matching slot of every not-yet-processed exposure sharing
    /// the event's configuration. `pending` holds the exposures after the
    /// one being reduced, in traversal order. Returns how many were marked.
    pub fn on_update(&self, event: &UpdateEvent, pending: &mut [Option<ExposureState>]) -> usize {
        if !self.reuse_master {
            return 0;
        }

        let key = &event.key;
        let tag = self.tag(key.kind);
        let mut marked = 0;

        for exposure in pending.iter_mut().flatten() {
            if exposure.is_processed() || exposure.is_released() {
                continue;
            }
            if exposure.config(key.detector) != Some(&key.config) {
                continue;
            }
            exposure.mark_satisfied(key.detector, tag);
            marked += 1;
        }

        if marked > 0 {
            debug!(
                "{} from exposure {} satisfies {} pending exposure(s) as {}",
                key.name(),
                event.owner,
                marked,
                tag
            );
        }
        marked
    }
}
