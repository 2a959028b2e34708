use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Background thread running `tick` every `period` until dropped
pub struct PeriodicTask {
    name: &'static str,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> anyhow::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name(name.into())
            .stack_size(8192)
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    tick();
                    thread::sleep(period);
                }
            })?;
        log::debug!("Task {} started", name);
        Ok(PeriodicTask {
            name,
            running,
            handle: Some(handle),
        })
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Task {} panicked", self.name);
            }
        }
    }
}
