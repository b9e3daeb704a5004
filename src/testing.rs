//! Deterministic collaborators for driving the controller in tests and
//! simulations: a manual clock, a scheduler that only fires when advanced,
//! and recording actuator/notifier/presence doubles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};

use crate::actuator::{Actuator, ActuatorStatus, LightCommand};
use crate::frame::Frame;
use crate::notify::{Notification, NotificationChannel};
use crate::presence::{Detection, Identity, PresenceDetector, PresenceResult};
use crate::timer::{Clock, TimerHandle, TimerScheduler, TimerTask};

/// Fixed starting point so log timestamps are reproducible.
pub const MANUAL_EPOCH_SECS: u64 = 1_700_000_000;

#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(SystemTime::UNIX_EPOCH + Duration::from_secs(MANUAL_EPOCH_SECS))
    }

    pub fn starting_at(start: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: SystemTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

struct ManualTimer {
    due: SystemTime,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: TimerTask,
}

#[derive(Default)]
struct ManualQueue {
    timers: Vec<ManualTimer>,
    next_seq: u64,
}

/// Scheduler whose timers fire only from `advance`, in due order, with the
/// clock set to each timer's due time while it runs.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    queue: Arc<Mutex<ManualQueue>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(ManualQueue::default())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Timers that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .map(|q| {
                q.timers
                    .iter()
                    .filter(|t| !t.cancelled.load(Ordering::SeqCst))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Move time forward by `by`, running every live timer that falls due.
    /// Returns how many tasks ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.now() + by;
        let mut ran = 0;
        while let Some(timer) = self.pop_due(target) {
            self.clock.set(timer.due);
            if !timer.cancelled.load(Ordering::SeqCst) {
                (timer.task)();
                ran += 1;
            }
        }
        self.clock.set(target);
        ran
    }

    fn pop_due(&self, target: SystemTime) -> Option<ManualTimer> {
        let mut queue = self.queue.lock().ok()?;
        let index = queue
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= target)
            .min_by_key(|(_, t)| (t.due, t.seq))
            .map(|(i, _)| i)?;
        Some(queue.timers.swap_remove(index))
    }
}

impl TimerScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Result<TimerHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| anyhow!("manual scheduler lock poisoned"))?;
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.timers.push(ManualTimer {
            due: self.clock.now() + delay,
            seq,
            cancelled: cancelled.clone(),
            task,
        });
        Ok(TimerHandle::new(cancelled, None))
    }
}

/// Records every command; can be switched to fail.
#[derive(Clone, Default)]
pub struct RecordingActuator {
    calls: Arc<Mutex<Vec<(String, LightCommand)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, LightCommand)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, command: LightCommand) -> usize {
        self.calls().iter().filter(|(_, c)| *c == command).count()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Actuator for RecordingActuator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, room: &str, command: LightCommand) -> Result<ActuatorStatus> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("recording actuator lock poisoned"))?
            .push((room.to_string(), command));
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("relay unreachable"));
        }
        Ok(ActuatorStatus {
            lights_on: Some(command == LightCommand::On),
            detail: None,
        })
    }
}

/// Records delivered notifications; can be switched to fail.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    attempts: Arc<Mutex<usize>>,
    failing: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successfully delivered notifications.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.lock().map(|a| *a).unwrap_or(0)
    }

    pub fn last_id(&self) -> Option<String> {
        self.sent().last().map(|n| n.id.clone())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl NotificationChannel for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&self, notification: &Notification) -> Result<()> {
        *self
            .attempts
            .lock()
            .map_err(|_| anyhow!("recording notifier lock poisoned"))? += 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("notification service unavailable"));
        }
        self.sent
            .lock()
            .map_err(|_| anyhow!("recording notifier lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}

/// Presence double whose answer is set from the test.
#[derive(Clone, Default)]
pub struct ScriptedPresence {
    present: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
    identity: Arc<Mutex<Option<Identity>>>,
}

impl ScriptedPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        if let Ok(mut slot) = self.identity.lock() {
            *slot = identity;
        }
    }
}

impl PresenceDetector for ScriptedPresence {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&self, _frame: &Frame) -> Result<PresenceResult> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("detector timed out"));
        }
        if !self.present.load(Ordering::SeqCst) {
            return Ok(PresenceResult::empty());
        }
        let mut detection = Detection::person(0.9);
        detection.identity = self
            .identity
            .lock()
            .map_err(|_| anyhow!("scripted presence lock poisoned"))?
            .clone();
        Ok(PresenceResult {
            detections: vec![detection],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn manual_scheduler_fires_in_due_order_and_skips_cancelled() {
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(clock.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        let _late = scheduler
            .schedule(Duration::from_secs(20), Box::new(move || o.lock().unwrap().push("late")))
            .unwrap();
        let o = order.clone();
        let _early = scheduler
            .schedule(Duration::from_secs(10), Box::new(move || o.lock().unwrap().push("early")))
            .unwrap();
        let o = order.clone();
        let cancelled = scheduler
            .schedule(
                Duration::from_secs(15),
                Box::new(move || o.lock().unwrap().push("cancelled")),
            )
            .unwrap();
        cancelled.cancel();
        assert_eq!(scheduler.pending(), 2);

        assert_eq!(scheduler.advance(Duration::from_secs(5)), 0);
        assert_eq!(scheduler.advance(Duration::from_secs(30)), 2);
        assert_eq!(*order.lock().unwrap(), vec!["early", "late"]);
        assert_eq!(
            clock.now(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(MANUAL_EPOCH_SECS + 35)
        );
    }

    #[test]
    fn tasks_see_their_due_time_and_may_reschedule() {
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(clock.clone());
        let seen = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let (c, s, sched, h) = (clock.clone(), seen.clone(), scheduler.clone(), hits.clone());
        let _handle = scheduler
            .schedule(
                Duration::from_secs(3),
                Box::new(move || {
                    *s.lock().unwrap() = Some(c.now());
                    let h2 = h.clone();
                    // Leaked on purpose so the follow-up stays live.
                    std::mem::forget(
                        sched
                            .schedule(Duration::from_secs(1), Box::new(move || {
                                h2.fetch_add(1, Ordering::SeqCst);
                            }))
                            .unwrap(),
                    );
                }),
            )
            .unwrap();
        scheduler.advance(Duration::from_secs(10));
        assert_eq!(
            *seen.lock().unwrap(),
            Some(SystemTime::UNIX_EPOCH + Duration::from_secs(MANUAL_EPOCH_SECS + 3))
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handle_cancels() {
        let scheduler = ManualScheduler::new(ManualClock::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        drop(
            scheduler
                .schedule(Duration::from_secs(1), Box::new(move || {
                    h.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap(),
        );
        scheduler.advance(Duration::from_secs(2));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn recording_doubles_capture_calls() {
        let actuator = RecordingActuator::new();
        actuator.send("hall", LightCommand::On).unwrap();
        actuator.set_failing(true);
        assert!(actuator.send("hall", LightCommand::Off).is_err());
        assert_eq!(actuator.count(LightCommand::On), 1);
        assert_eq!(actuator.calls().len(), 2);

        let presence = ScriptedPresence::new();
        let frame = Frame::uniform(2, 2, 0).unwrap();
        presence.set_present(true);
        assert!(presence.detect(&frame).unwrap().is_person_present(0.5));
        presence.set_failing(true);
        assert!(presence.detect(&frame).is_err());
    }
}
