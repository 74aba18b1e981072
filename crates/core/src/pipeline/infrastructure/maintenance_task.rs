use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{select, tick, Sender};

type TickResult = Result<(), Box<dyn std::error::Error>>;

/// Background thread running a housekeeping closure on a fixed period.
///
/// Errors and panics inside a tick are logged and the loop keeps going.
/// Dropping the task stops and joins the thread.
pub struct MaintenanceTask {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    pub fn spawn<F>(period: Duration, mut tick_fn: F) -> std::io::Result<Self>
    where
        F: FnMut() -> TickResult + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let ticker = tick(period);

        let handle = std::thread::Builder::new()
            .name("maintenance".into())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => {
                        match catch_unwind(AssertUnwindSafe(&mut tick_fn)) {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => log::error!("Maintenance tick failed: {e}"),
                            Err(_) => log::error!("Maintenance tick panicked"),
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        // Disconnecting wakes the select.
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Maintenance thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_keeps_ticking_through_errors_and_panics() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = MaintenanceTask::spawn(Duration::from_millis(5), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            match n {
                0 => Err("memory probe unavailable".into()),
                1 => panic!("boom"),
                _ => Ok(()),
            }
        })
        .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 4 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(task);
        assert!(ticks.load(Ordering::SeqCst) >= 4);
    }

    #[test]
    fn test_drop_stops_promptly() {
        let task = MaintenanceTask::spawn(Duration::from_secs(3600), || Ok(())).unwrap();
        let start = std::time::Instant::now();
        drop(task);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
