//! Graceful-shutdown callback stack.
//!
//! Setup code pushes cleanup callbacks as it creates things worth cleaning
//! up (orphan containers, log flushing). On SIGINT/SIGTERM the callbacks
//! run in reverse push order, then the process exits. Each callback is
//! responsible for its own idempotence so repeated signals do not re-stop
//! already-stopped containers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

type ShutdownFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// LIFO stack of async shutdown callbacks.
#[derive(Default)]
pub struct ShutdownStack {
    callbacks: Mutex<Vec<(String, ShutdownFn)>>,
}

impl ShutdownStack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pushes a callback. The last pushed runs first.
    pub fn push<F, Fut>(&self, label: &str, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock().unwrap();
        callbacks.push((
            label.to_string(),
            Box::new(move || Box::pin(callback()) as Pin<Box<dyn Future<Output = ()> + Send>>),
        ));
    }

    /// Runs all pending callbacks in reverse push order. Draining the
    /// stack makes a second invocation a no-op.
    pub async fn run(&self) {
        loop {
            let entry = {
                let mut callbacks = self.callbacks.lock().unwrap();
                callbacks.pop()
            };
            match entry {
                Some((label, callback)) => {
                    debug!("shutdown callback: {}", label);
                    callback().await;
                }
                None => break,
            }
        }
    }

    /// Spawns a task that waits for a termination signal, runs the stack,
    /// and exits the process.
    pub fn install(self: &Arc<Self>) {
        let stack = Arc::clone(self);
        tokio::spawn(async move {
            wait_for_termination().await;
            info!("termination signal received, cleaning up");
            stack.run().await;
            std::process::exit(130);
        });
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn callbacks_run_in_reverse_push_order() {
        let stack = ShutdownStack::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            stack.push(label, move || async move {
                order.lock().unwrap().push(label);
            });
        }

        stack.run().await;
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let stack = ShutdownStack::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        stack.push("bump", move || async move {
            c.fetch_add(1, Ordering::SeqCst);
        });

        stack.run().await;
        stack.run().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
