//! Clocks and cancellable one-shot timers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task once after a delay unless the returned handle is cancelled.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle>;
}

/// Cancellation handle for a scheduled task. Dropping the handle cancels it.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    wake: Option<mpsc::Sender<()>>,
}

impl TimerHandle {
    pub fn new(cancelled: Arc<AtomicBool>, wake: Option<mpsc::Sender<()>>) -> Self {
        Self { cancelled, wake }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(wake) = &self.wake {
            // Receiver may already be gone once the timer fired.
            let _ = wake.send(());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One sleeping thread per timer. Cancel wakes the thread early.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadScheduler;

impl TimerScheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<()>();
        let flag = cancelled.clone();
        thread::Builder::new()
            .name("lightwatch-timer".to_string())
            .spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = rx.recv_timeout(delay) {
                    if !flag.load(Ordering::SeqCst) {
                        task();
                    }
                }
            })
            .context("spawn timer thread")?;
        Ok(TimerHandle::new(cancelled, Some(tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn thread_timer_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = ThreadScheduler
            .schedule(
                Duration::from_millis(20),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let handle = ThreadScheduler
            .schedule(
                Duration::from_millis(200),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());
        thread::sleep(Duration::from_millis(400));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
