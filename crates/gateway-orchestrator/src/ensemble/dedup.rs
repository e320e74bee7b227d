use gateway_core::Fingerprint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// At-most-one-build invariant (spec.md §4.F step 1, §8 invariant 4): a
/// second caller with the same fingerprint attaches to the in-flight build
/// instead of starting a duplicate fan-out.
#[derive(Clone)]
pub struct InFlightGuard<T: Clone + Send + 'static> {
    inner: Arc<Mutex<HashMap<Fingerprint, broadcast::Sender<T>>>>,
}

impl<T: Clone + Send + 'static> Default for InFlightGuard<T> {
    fn default() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }
}

pub enum Attach<T> {
    /// This caller is the leader; it must compute `T` and call
    /// [`InFlightGuard::complete`] when done.
    Lead,
    /// Another caller is already building this fingerprint; await its result.
    Follow(broadcast::Receiver<T>),
}

impl<T: Clone + Send + 'static> InFlightGuard<T> {
    pub fn attach(&self, fingerprint: Fingerprint) -> Attach<T> {
        let mut inner = self.inner.lock();
        if let Some(sender) = inner.get(&fingerprint) {
            return Attach::Follow(sender.subscribe());
        }
        let (tx, _) = broadcast::channel(1);
        inner.insert(fingerprint, tx);
        Attach::Lead
    }

    /// Called by the leader once the fan-out has a result; wakes every
    /// follower and clears the in-flight marker.
    pub fn complete(&self, fingerprint: Fingerprint, value: T) {
        if let Some(sender) = self.inner.lock().remove(&fingerprint) {
            let _ = sender.send(value);
        }
    }
}
