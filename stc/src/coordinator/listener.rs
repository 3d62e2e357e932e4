//! Step listener capability and fan-out.

use std::sync::{Arc, Mutex};

use crate::flow::{Status, Step};

/// Observer of step execution.
///
/// Callbacks arrive from worker threads and, for skip transitions, from
/// inside the coordinator's scheduling pass; deliveries are serialized, and
/// for any single step `on_start` precedes every `on_output`, which precede
/// `on_completion`. Listeners must not call back into the coordinator.
pub trait StepListener: Send + Sync {
    fn on_start(&self, step: &Step, command: &str) {
        let _ = (step, command);
    }

    fn on_output(&self, step: &Step, line: &str) {
        let _ = (step, line);
    }

    fn on_completion(&self, step: &Step, status: Status) {
        let _ = (step, status);
    }
}

/// A serialized fan-out over registered listeners.
#[derive(Default)]
pub struct Listeners {
    inner: Mutex<Vec<Arc<dyn StepListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn StepListener>) {
        self.inner.lock().expect("listener lock").push(listener);
    }

    /// Remove a previously added listener (identity comparison).
    pub fn remove(&self, listener: &Arc<dyn StepListener>) {
        self.inner
            .lock()
            .expect("listener lock")
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn notify_start(&self, step: &Step, command: &str) {
        for l in self.inner.lock().expect("listener lock").iter() {
            l.on_start(step, command);
        }
    }

    pub fn notify_output(&self, step: &Step, line: &str) {
        for l in self.inner.lock().expect("listener lock").iter() {
            l.on_output(step, line);
        }
    }

    pub fn notify_completion(&self, step: &Step, status: Status) {
        for l in self.inner.lock().expect("listener lock").iter() {
            l.on_completion(step, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        completions: AtomicUsize,
    }

    impl StepListener for Counter {
        fn on_completion(&self, _step: &Step, _status: Status) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_add_and_remove() {
        let listeners = Listeners::new();
        let counter = Arc::new(Counter::default());
        let as_listener: Arc<dyn StepListener> = counter.clone();

        listeners.add(as_listener.clone());
        let step = Step::atomic("a", "true");
        listeners.notify_completion(&step, Status::Succeeded);
        assert_eq!(counter.completions.load(Ordering::SeqCst), 1);

        listeners.remove(&as_listener);
        listeners.notify_completion(&step, Status::Succeeded);
        assert_eq!(counter.completions.load(Ordering::SeqCst), 1);
    }
}
