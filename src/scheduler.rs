use crossbeam::channel::{self, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs a task periodically on one dedicated thread.
///
/// The first run happens immediately, then once per `period`. Runs never
/// overlap, and ticks missed while the task was busy collapse into one.
pub struct FixedRateScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FixedRateScheduler {
    pub fn schedule_at_fixed_rate<F>(name: &str, period: Duration, mut task: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let ticker = channel::tick(period);
                task();
                loop {
                    crossbeam::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => task(),
                    }
                }
            })?;

        log::debug!("scheduled {:?} every {:?}", name, period);
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops future runs and waits for an in-flight run to finish.
    ///
    /// Safe to call repeatedly. Called from inside the task itself it only
    /// signals the thread to exit after the current run.
    pub fn cancel(&mut self) {
        drop(self.stop_tx.take());
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("scheduled task panicked");
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for FixedRateScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
