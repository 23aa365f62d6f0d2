use std::sync::Mutex;

use tokio::sync::watch;

use crate::util::lock::mutex_lock;

type Waiter = Box<dyn FnOnce() + Send + 'static>;

/// One-shot readiness flag.
///
/// Callbacks registered before [`ReadySignal::fire`] run exactly once, in
/// registration order, when it fires; callbacks registered afterwards run
/// synchronously on registration. The flag never resets.
pub struct ReadySignal {
    waiters: Mutex<Option<Vec<Waiter>>>,
    fired: watch::Sender<bool>,
}

impl ReadySignal {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            waiters: Mutex::new(Some(Vec::new())),
            fired,
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.fired.borrow()
    }

    pub fn when_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let mut waiters = mutex_lock(&self.waiters, "render::signal", "when_ready");
        match waiters.as_mut() {
            Some(pending) => pending.push(Box::new(callback)),
            None => {
                drop(waiters);
                callback();
            }
        }
    }

    /// Flip to ready and drain the waiters. Returns `false` when the signal
    /// had already fired.
    pub fn fire(&self) -> bool {
        let pending = {
            let mut waiters = mutex_lock(&self.waiters, "render::signal", "fire");
            match waiters.take() {
                Some(pending) => pending,
                None => return false,
            }
        };

        self.fired.send_replace(true);
        for waiter in pending {
            waiter();
        }
        true
    }

    pub async fn wait(&self) {
        let mut receiver = self.fired.subscribe();
        let _ = receiver.wait_for(|ready| *ready).await;
    }
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}
