use std::sync::Mutex;

use rustc_hash::FxHashSet;

/// Set of read ids ejected at least once. A read's later basecalled-on-disk
/// counterpart (the tail of a read the pore already expelled) is dropped by
/// consulting this set before it reaches the strata balancer, so an ejected
/// read never biases the estimators.
#[derive(Default)]
pub struct FragmentCollection {
    ejected_ids: Mutex<FxHashSet<String>>,
}

impl FragmentCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ejected(&self, read_id: &str) {
        self.ejected_ids.lock().unwrap().insert(read_id.to_owned());
    }

    pub fn was_ejected(&self, read_id: &str) -> bool {
        self.ejected_ids.lock().unwrap().contains(read_id)
    }
}
