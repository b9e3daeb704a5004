//! Per-room lighting automation.
//!
//! The controller combines the committed lighting state of a room's camera
//! with person detection and decides when to switch lights on, when to ask
//! the user whether an empty room may go dark, and when to switch off
//! without an answer.
//!
//! Locking: every decision is taken under the room's mutex, the mutex is
//! released for actuator/notifier I/O, then re-acquired briefly to record
//! the outcome. `command_in_flight` and `notify_in_flight` keep a second
//! caller from issuing the same I/O while the first is outstanding. Audit
//! log rows are written after the room lock is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::actuator::{Actuator, LightCommand};
use crate::classifier::{FrameAnalysis, LightingState};
use crate::config::AutomationConfig;
use crate::frame::Frame;
use crate::notify::{Notification, NotificationChannel, UserAction};
use crate::presence::{Identity, PresenceDetector, PresenceResult};
use crate::registry::ClassifierRegistry;
use crate::storage::{AutomationLog, AutomationLogEntry};
use crate::timer::{Clock, TimerHandle, TimerScheduler};

/// Mutable automation state of one room.
#[derive(Debug, Default)]
pub struct RoomState {
    pub lights_on: bool,
    pub person_present: bool,
    pub last_person_time: Option<SystemTime>,
    /// When the lights were last seen or switched on; cleared when they go off.
    pub lights_first_detected_time: Option<SystemTime>,
    pub last_identity: Option<Identity>,
    pub pending_notification: Option<Notification>,
    /// Last keep_on/dismiss answer; restarts the idle clock.
    pub last_response_time: Option<SystemTime>,
    auto_turn_off_timer: Option<TimerHandle>,
    pub command_in_flight: bool,
    pub notify_in_flight: bool,
}

impl RoomState {
    pub fn has_auto_turn_off(&self) -> bool {
        self.auto_turn_off_timer.is_some()
    }

    /// Start of the current no-person period.
    fn idle_reference(&self) -> Option<SystemTime> {
        let base = self.last_person_time.or(self.lights_first_detected_time)?;
        Some(match self.last_response_time {
            Some(response) if response > base => response,
            _ => base,
        })
    }

    fn clear_notification(&mut self) -> Option<Notification> {
        if let Some(timer) = self.auto_turn_off_timer.take() {
            timer.cancel();
        }
        self.pending_notification.take()
    }

    fn mark_lights_on(&mut self, at: SystemTime) {
        self.lights_on = true;
        self.lights_first_detected_time.get_or_insert(at);
    }

    fn mark_lights_off(&mut self) {
        self.lights_on = false;
        self.lights_first_detected_time = None;
    }
}

/// What the controller did for one frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AutomationAction {
    ObservedOn,
    ObservedOff,
    PresenceResumed { notification_id: String },
    LightsOn,
    LightsOnFailed,
    NotificationSent { notification_id: String },
    /// Delivered, but the lights went off meanwhile so nothing is pending.
    NotificationWithdrawn { notification_id: String },
    NotificationFailed,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessOutcome {
    pub room: String,
    pub lighting: LightingState,
    pub state_changed: bool,
    pub confidence: f64,
    pub person_present: bool,
    pub lights_on: bool,
    pub actions: Vec<AutomationAction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Handled {
        room: String,
        action: UserAction,
        lights_on: bool,
    },
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoomStatus {
    pub room: String,
    pub lighting: LightingState,
    pub lights_on: bool,
    pub person_present: bool,
    pub last_identity: Option<String>,
    pub seconds_since_person: Option<u64>,
    pub seconds_since_lights_on: Option<u64>,
    pub pending_notification: Option<String>,
}

/// Everything the controller talks to.
pub struct Collaborators {
    pub presence: Box<dyn PresenceDetector>,
    pub actuator: Arc<dyn Actuator>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub scheduler: Arc<dyn TimerScheduler>,
    pub clock: Arc<dyn Clock>,
    pub log: Box<dyn AutomationLog>,
}

#[derive(Clone)]
pub struct AutomationController {
    inner: Arc<Shared>,
}

struct Shared {
    config: AutomationConfig,
    classifiers: ClassifierRegistry,
    presence: Box<dyn PresenceDetector>,
    actuator: Arc<dyn Actuator>,
    notifier: Arc<dyn NotificationChannel>,
    scheduler: Arc<dyn TimerScheduler>,
    clock: Arc<dyn Clock>,
    log: Mutex<Box<dyn AutomationLog>>,
    rooms: Mutex<HashMap<String, Arc<Mutex<RoomState>>>>,
}

enum Plan {
    Nothing,
    TurnOn,
    Notify(Notification),
}

impl AutomationController {
    pub fn new(
        config: AutomationConfig,
        classifiers: ClassifierRegistry,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            presence,
            actuator,
            notifier,
            scheduler,
            clock,
            log,
        } = collaborators;
        log::info!(
            "automation controller ready (presence={}, actuator={}, notifier={})",
            presence.name(),
            actuator.name(),
            notifier.name()
        );
        Ok(Self {
            inner: Arc::new(Shared {
                config,
                classifiers,
                presence,
                actuator,
                notifier,
                scheduler,
                clock,
                log: Mutex::new(log),
                rooms: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.inner.config
    }

    pub fn classifiers(&self) -> &ClassifierRegistry {
        &self.inner.classifiers
    }

    /// Classify a frame, run presence detection on it, and act.
    ///
    /// A failing presence detector is logged and treated as "no person".
    pub fn process(&self, room: &str, frame: &Frame) -> Result<ProcessOutcome> {
        crate::validate_room_id(room)?;
        let presence = match self.inner.presence.detect(frame) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("presence detection failed for room '{}': {}", room, e);
                PresenceResult::empty()
            }
        };
        self.process_with_presence(room, frame, &presence)
    }

    /// Same as `process` with presence already known.
    pub fn process_with_presence(
        &self,
        room: &str,
        frame: &Frame,
        presence: &PresenceResult,
    ) -> Result<ProcessOutcome> {
        crate::validate_room_id(room)?;
        let shared = &self.inner;
        let now = shared.clock.now();
        let classifier = shared.classifiers.get_or_create(room)?;
        let analysis = classifier
            .lock()
            .map_err(|_| anyhow!("classifier lock poisoned"))?
            .analyze(frame, now);

        let person = presence.is_person_present(shared.config.person_confidence_threshold);
        let identity = presence.identity().cloned();

        let state = shared.room(room)?;
        let mut actions = Vec::new();
        let mut entries = Vec::new();
        let plan = {
            let mut st = lock_room(&state)?;
            sync_observation(room, &analysis, &mut st, now, &mut actions, &mut entries);

            st.person_present = person;
            if person {
                st.last_person_time = Some(now);
                if let Some(identity) = identity {
                    log::debug!("room '{}': recognised {}", room, identity.name);
                    st.last_identity = Some(identity);
                }
                if let Some(pending) = st.clear_notification() {
                    log::info!(
                        "room '{}': person returned, withdrawing notification {}",
                        room,
                        pending.id
                    );
                    entries.push(AutomationLogEntry::new(
                        room,
                        "presence_resumed",
                        "Person returned before a response; notification withdrawn",
                        now,
                    ));
                    actions.push(AutomationAction::PresenceResumed {
                        notification_id: pending.id,
                    });
                }
            }
            shared.decide(room, &mut st, person, now)
        };
        shared.record(entries);

        match plan {
            Plan::Nothing => {}
            Plan::TurnOn => actions.push(shared.turn_on(room, &state, now)?),
            Plan::Notify(notification) => {
                actions.push(shared.notify(room, &state, notification, now)?)
            }
        }

        let lights_on = lock_room(&state)?.lights_on;
        Ok(ProcessOutcome {
            room: room.to_string(),
            lighting: analysis.state,
            state_changed: analysis.state_changed,
            confidence: analysis.confidence,
            person_present: person,
            lights_on,
            actions,
        })
    }

    /// Apply a user's answer to a pending notification.
    pub fn respond(&self, notification_id: &str, action: UserAction) -> Result<ResponseOutcome> {
        let shared = &self.inner;
        let Some((room, state)) = shared.find_pending(notification_id)? else {
            log::warn!(
                "response '{}' for unknown notification {} ignored",
                action,
                notification_id
            );
            return Ok(ResponseOutcome::Ignored);
        };
        let now = shared.clock.now();

        let turn_off = {
            let mut st = lock_room(&state)?;
            let still_pending = st
                .pending_notification
                .as_ref()
                .is_some_and(|n| n.id == notification_id);
            if !still_pending {
                log::warn!("notification {} was cleared before the response", notification_id);
                return Ok(ResponseOutcome::Ignored);
            }
            st.clear_notification();
            match action {
                UserAction::TurnOff if !st.command_in_flight => {
                    st.command_in_flight = true;
                    true
                }
                UserAction::TurnOff => false,
                UserAction::KeepOn | UserAction::Dismiss => {
                    st.last_response_time = Some(now);
                    false
                }
            }
        };
        log::info!("room '{}': user answered {} to {}", room, action, notification_id);

        match action {
            UserAction::TurnOff => {
                if turn_off {
                    let result = shared.actuator.send(&room, LightCommand::Off);
                    let mut st = lock_room(&state)?;
                    st.command_in_flight = false;
                    match result {
                        Ok(_) => {
                            st.mark_lights_off();
                            drop(st);
                            shared.record(vec![AutomationLogEntry::new(
                                &room,
                                "user_turn_off",
                                "User requested lights off",
                                now,
                            )]);
                        }
                        Err(e) => {
                            log::error!("room '{}': turning lights off failed: {}", room, e);
                        }
                    }
                } else {
                    log::warn!("room '{}': a light command is already in flight", room);
                }
            }
            UserAction::KeepOn => shared.record(vec![AutomationLogEntry::new(
                &room,
                "user_keep_on",
                "User chose to keep lights on",
                now,
            )]),
            UserAction::Dismiss => shared.record(vec![AutomationLogEntry::new(
                &room,
                "user_dismiss",
                "User dismissed the notification",
                now,
            )]),
        }

        let lights_on = lock_room(&state)?.lights_on;
        Ok(ResponseOutcome::Handled {
            room,
            action,
            lights_on,
        })
    }

    pub fn status(&self, room: &str) -> Option<RoomStatus> {
        let state = self.inner.existing_room(room)?;
        let lighting = self
            .inner
            .classifiers
            .get(room)
            .ok()
            .flatten()
            .and_then(|c| {
                let classifier = c.lock().ok()?;
                Some(classifier.current_state())
            })
            .unwrap_or_default();
        let now = self.inner.clock.now();
        let st = state.lock().ok()?;
        let since = |t: Option<SystemTime>| {
            t.map(|t| now.duration_since(t).unwrap_or(Duration::ZERO).as_secs())
        };
        Some(RoomStatus {
            room: room.to_string(),
            lighting,
            lights_on: st.lights_on,
            person_present: st.person_present,
            last_identity: st.last_identity.as_ref().map(|i| i.name.clone()),
            seconds_since_person: since(st.last_person_time),
            seconds_since_lights_on: since(st.lights_first_detected_time),
            pending_notification: st.pending_notification.as_ref().map(|n| n.id.clone()),
        })
    }

    pub fn rooms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .rooms
            .lock()
            .map(|rooms| rooms.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Forget a room: cancels its timer and resets its classifier.
    pub fn reset_room(&self, room: &str) -> Result<bool> {
        let removed = self
            .inner
            .rooms
            .lock()
            .map_err(|_| anyhow!("room map lock poisoned"))?
            .remove(room);
        let classifier_reset = self.inner.classifiers.reset(room)?;
        if let Some(state) = &removed {
            lock_room(state)?.clear_notification();
            log::info!("room '{}' reset", room);
        }
        Ok(removed.is_some() || classifier_reset)
    }

    pub fn recent_log(&self, limit: usize) -> Result<Vec<AutomationLogEntry>> {
        self.inner
            .log
            .lock()
            .map_err(|_| anyhow!("automation log lock poisoned"))?
            .recent(limit)
    }

    /// Run the auto turn-off for a notification as if its timer had fired.
    pub fn fire_auto_turn_off(&self, room: &str, notification_id: &str) -> Result<bool> {
        self.inner.auto_turn_off(room, notification_id)
    }
}

impl Shared {
    fn room(&self, room: &str) -> Result<Arc<Mutex<RoomState>>> {
        let mut rooms = self
            .rooms
            .lock()
            .map_err(|_| anyhow!("room map lock poisoned"))?;
        Ok(rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                log::info!("tracking room '{}'", room);
                Arc::new(Mutex::new(RoomState::default()))
            })
            .clone())
    }

    fn existing_room(&self, room: &str) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.lock().ok()?.get(room).cloned()
    }

    fn find_pending(
        &self,
        notification_id: &str,
    ) -> Result<Option<(String, Arc<Mutex<RoomState>>)>> {
        let rooms: Vec<(String, Arc<Mutex<RoomState>>)> = self
            .rooms
            .lock()
            .map_err(|_| anyhow!("room map lock poisoned"))?
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        for (id, state) in rooms {
            let matches = lock_room(&state)?
                .pending_notification
                .as_ref()
                .is_some_and(|n| n.id == notification_id);
            if matches {
                return Ok(Some((id, state)));
            }
        }
        Ok(None)
    }

    fn decide(&self, room: &str, st: &mut RoomState, person: bool, now: SystemTime) -> Plan {
        if st.command_in_flight {
            return Plan::Nothing;
        }
        if person {
            if !st.lights_on {
                log::info!("room '{}': person detected with lights off", room);
                st.command_in_flight = true;
                return Plan::TurnOn;
            }
            return Plan::Nothing;
        }
        if !st.lights_on || st.pending_notification.is_some() || st.notify_in_flight {
            return Plan::Nothing;
        }
        let Some(reference) = st.idle_reference() else {
            return Plan::Nothing;
        };
        let idle = now.duration_since(reference).unwrap_or(Duration::ZERO);
        if idle < self.config.no_person_timeout {
            return Plan::Nothing;
        }
        log::info!(
            "room '{}': no person for {}s with lights on",
            room,
            idle.as_secs()
        );
        st.notify_in_flight = true;
        Plan::Notify(Notification::no_person(
            room,
            idle,
            now,
            self.config.user_response_timeout,
        ))
    }

    fn turn_on(
        &self,
        room: &str,
        state: &Arc<Mutex<RoomState>>,
        now: SystemTime,
    ) -> Result<AutomationAction> {
        let result = self.actuator.send(room, LightCommand::On);
        let mut st = lock_room(state)?;
        st.command_in_flight = false;
        match result {
            Ok(status) => {
                if status.lights_on == Some(false) {
                    log::warn!("room '{}': relay accepted 'on' but reports lights off", room);
                }
                st.mark_lights_on(now);
                drop(st);
                log::info!("room '{}': lights turned on", room);
                self.record(vec![AutomationLogEntry::new(
                    room,
                    "lights_on",
                    "Lights turned on: person detected",
                    now,
                )]);
                Ok(AutomationAction::LightsOn)
            }
            Err(e) => {
                log::error!("room '{}': turning lights on failed: {}", room, e);
                Ok(AutomationAction::LightsOnFailed)
            }
        }
    }

    fn notify(
        self: &Arc<Self>,
        room: &str,
        state: &Arc<Mutex<RoomState>>,
        notification: Notification,
        now: SystemTime,
    ) -> Result<AutomationAction> {
        let result = self.notifier.send(&notification);
        let mut st = lock_room(state)?;
        st.notify_in_flight = false;
        if let Err(e) = result {
            log::warn!("room '{}': notification not delivered: {}", room, e);
            return Ok(AutomationAction::NotificationFailed);
        }
        if !st.lights_on {
            log::info!(
                "room '{}': lights went off while notifying; dropping {}",
                room,
                notification.id
            );
            return Ok(AutomationAction::NotificationWithdrawn {
                notification_id: notification.id,
            });
        }

        let weak = Arc::downgrade(self);
        let timer_room = room.to_string();
        let timer_id = notification.id.clone();
        let timer = self.scheduler.schedule(
            self.config.user_response_timeout,
            Box::new(move || run_auto_turn_off(weak, &timer_room, &timer_id)),
        );
        match timer {
            Ok(handle) => st.auto_turn_off_timer = Some(handle),
            Err(e) => log::error!(
                "room '{}': could not schedule auto turn-off for {}: {}",
                room,
                notification.id,
                e
            ),
        }
        let id = notification.id.clone();
        let description = format!("Asked user about lights: {}", notification.message);
        st.pending_notification = Some(notification);
        drop(st);

        self.record(vec![AutomationLogEntry::new(
            room,
            "notification_sent",
            description,
            now,
        )]);
        Ok(AutomationAction::NotificationSent {
            notification_id: id,
        })
    }

    /// Timer body. Returns false when the notification is no longer pending.
    fn auto_turn_off(&self, room: &str, notification_id: &str) -> Result<bool> {
        let Some(state) = self.existing_room(room) else {
            return Ok(false);
        };
        {
            let mut st = lock_room(&state)?;
            let pending = st
                .pending_notification
                .as_ref()
                .is_some_and(|n| n.id == notification_id);
            if !pending {
                return Ok(false);
            }
            st.pending_notification = None;
            st.auto_turn_off_timer = None;
            if st.command_in_flight {
                log::warn!("room '{}': auto turn-off skipped, command in flight", room);
                return Ok(false);
            }
            st.command_in_flight = true;
        }

        log::info!("room '{}': no response to {}, turning lights off", room, notification_id);
        let now = self.clock.now();
        let result = self.actuator.send(room, LightCommand::Off);
        let mut st = lock_room(&state)?;
        st.command_in_flight = false;
        match result {
            Ok(_) => {
                st.mark_lights_off();
                drop(st);
                self.record(vec![AutomationLogEntry::new(
                    room,
                    "auto_turn_off",
                    "Automatic turn-off after response timeout",
                    now,
                )]);
                Ok(true)
            }
            Err(e) => {
                log::error!("room '{}': auto turn-off failed: {}", room, e);
                Ok(false)
            }
        }
    }

    fn record(&self, entries: Vec<AutomationLogEntry>) {
        if entries.is_empty() {
            return;
        }
        let mut log = match self.log.lock() {
            Ok(log) => log,
            Err(_) => {
                log::error!("automation log lock poisoned; {} entries lost", entries.len());
                return;
            }
        };
        for entry in &entries {
            if let Err(e) = log.append(entry) {
                log::error!("failed to append automation log entry {}: {}", entry.action, e);
            }
        }
    }
}

fn run_auto_turn_off(shared: Weak<Shared>, room: &str, notification_id: &str) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    if let Err(e) = shared.auto_turn_off(room, notification_id) {
        log::error!("room '{}': auto turn-off error: {}", room, e);
    }
}

/// Follow committed camera observations so manual switching is noticed.
fn sync_observation(
    room: &str,
    analysis: &FrameAnalysis,
    st: &mut RoomState,
    now: SystemTime,
    actions: &mut Vec<AutomationAction>,
    entries: &mut Vec<AutomationLogEntry>,
) {
    if !analysis.state_changed || st.command_in_flight {
        return;
    }
    match analysis.state {
        LightingState::On if !st.lights_on => {
            st.mark_lights_on(now);
            log::info!("room '{}': lights observed on", room);
            entries.push(AutomationLogEntry::new(
                room,
                "light_observed_on",
                format!("Camera observed lights on (confidence {:.2})", analysis.confidence),
                now,
            ));
            actions.push(AutomationAction::ObservedOn);
        }
        LightingState::Off if st.lights_on => {
            st.mark_lights_off();
            if let Some(pending) = st.clear_notification() {
                log::info!("room '{}': lights went off, dropping {}", room, pending.id);
            }
            log::info!("room '{}': lights observed off", room);
            entries.push(AutomationLogEntry::new(
                room,
                "light_observed_off",
                format!("Camera observed lights off (confidence {:.2})", analysis.confidence),
                now,
            ));
            actions.push(AutomationAction::ObservedOff);
        }
        _ => {}
    }
}

fn lock_room(state: &Mutex<RoomState>) -> Result<MutexGuard<'_, RoomState>> {
    state
        .lock()
        .map_err(|_| anyhow!("room state lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LightingConfig;
    use crate::storage::InMemoryAutomationLog;
    use crate::testing::{
        ManualClock, ManualScheduler, RecordingActuator, RecordingNotifier, ScriptedPresence,
    };

    struct Rig {
        controller: AutomationController,
        scheduler: ManualScheduler,
        actuator: RecordingActuator,
        notifier: RecordingNotifier,
        presence: ScriptedPresence,
        log: InMemoryAutomationLog,
    }

    fn rig() -> Rig {
        let clock = ManualClock::new();
        let scheduler = ManualScheduler::new(clock.clone());
        let actuator = RecordingActuator::new();
        let notifier = RecordingNotifier::new();
        let presence = ScriptedPresence::new();
        let log = InMemoryAutomationLog::new();
        let controller = AutomationController::new(
            AutomationConfig::default(),
            ClassifierRegistry::new(LightingConfig::default()).unwrap(),
            Collaborators {
                presence: Box::new(presence.clone()),
                actuator: Arc::new(actuator.clone()),
                notifier: Arc::new(notifier.clone()),
                scheduler: Arc::new(scheduler.clone()),
                clock: Arc::new(clock),
                log: Box::new(log.clone()),
            },
        )
        .unwrap();
        Rig {
            controller,
            scheduler,
            actuator,
            notifier,
            presence,
            log,
        }
    }

    fn bright() -> Frame {
        Frame::uniform(32, 24, 200).unwrap()
    }

    #[test]
    fn idle_reference_prefers_latest_response() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let mut st = RoomState {
            lights_first_detected_time: Some(t0),
            ..RoomState::default()
        };
        assert_eq!(st.idle_reference(), Some(t0));
        st.last_person_time = Some(t0 + Duration::from_secs(10));
        assert_eq!(st.idle_reference(), Some(t0 + Duration::from_secs(10)));
        st.last_response_time = Some(t0 + Duration::from_secs(50));
        assert_eq!(st.idle_reference(), Some(t0 + Duration::from_secs(50)));
    }

    #[test]
    fn keep_on_restarts_idle_clock() {
        let r = rig();
        r.presence.set_present(true);
        r.controller.process("den", &bright()).unwrap();
        r.presence.set_present(false);
        r.scheduler.advance(Duration::from_secs(121));
        r.controller.process("den", &bright()).unwrap();
        let id = r.notifier.last_id().unwrap();

        let outcome = r.controller.respond(&id, UserAction::KeepOn).unwrap();
        assert!(matches!(outcome, ResponseOutcome::Handled { lights_on: true, .. }));
        assert_eq!(r.scheduler.pending(), 0);

        r.scheduler.advance(Duration::from_secs(60));
        r.controller.process("den", &bright()).unwrap();
        assert_eq!(r.notifier.sent().len(), 1);
        r.scheduler.advance(Duration::from_secs(61));
        r.controller.process("den", &bright()).unwrap();
        assert_eq!(r.notifier.sent().len(), 2);
        assert!(r.log.actions().contains(&"user_keep_on".to_string()));
    }

    #[test]
    fn returning_person_withdraws_notification() {
        let r = rig();
        r.presence.set_present(true);
        r.controller.process("den", &bright()).unwrap();
        r.presence.set_present(false);
        r.scheduler.advance(Duration::from_secs(130));
        r.controller.process("den", &bright()).unwrap();
        assert_eq!(r.scheduler.pending(), 1);

        r.presence.set_present(true);
        let outcome = r.controller.process("den", &bright()).unwrap();
        assert!(matches!(
            outcome.actions.as_slice(),
            [AutomationAction::PresenceResumed { .. }]
        ));
        assert_eq!(r.scheduler.pending(), 0);
        r.scheduler.advance(Duration::from_secs(500));
        assert_eq!(r.actuator.count(LightCommand::Off), 0);
        assert!(r.controller.status("den").unwrap().pending_notification.is_none());
    }

    #[test]
    fn camera_observations_update_lights_on() {
        let r = rig();
        for _ in 0..3 {
            r.controller.process("den", &bright()).unwrap();
        }
        let status = r.controller.status("den").unwrap();
        assert!(status.lights_on);
        assert_eq!(status.lighting, LightingState::On);
        assert!(r.actuator.calls().is_empty());

        let dark = Frame::uniform(32, 24, 10).unwrap();
        let outcomes: Vec<_> = (0..3)
            .map(|_| r.controller.process("den", &dark).unwrap())
            .collect();
        assert_eq!(outcomes[2].actions, vec![AutomationAction::ObservedOff]);
        assert!(!r.controller.status("den").unwrap().lights_on);
        assert_eq!(r.log.actions(), vec!["light_observed_on", "light_observed_off"]);
    }

    #[test]
    fn notification_is_withdrawn_when_lights_go_off_during_send() {
        let r = rig();
        let shared = &r.controller.inner;
        let state = shared.room("den").unwrap();
        lock_room(&state).unwrap().notify_in_flight = true;

        let now = shared.clock.now();
        let notification = Notification::no_person(
            "den",
            Duration::from_secs(120),
            now,
            Duration::from_secs(180),
        );
        let id = notification.id.clone();
        let action = shared.notify("den", &state, notification, now).unwrap();

        assert_eq!(
            action,
            AutomationAction::NotificationWithdrawn {
                notification_id: id
            }
        );
        assert_eq!(r.notifier.sent().len(), 1);
        assert_eq!(r.scheduler.pending(), 0);
        let st = lock_room(&state).unwrap();
        assert!(!st.notify_in_flight);
        assert!(st.pending_notification.is_none());
        drop(st);
        assert!(r.log.actions().is_empty());
    }

    #[test]
    fn presence_failure_counts_as_empty_room() {
        let r = rig();
        r.presence.set_failing(true);
        let outcome = r.controller.process("den", &bright()).unwrap();
        assert!(!outcome.person_present);
        assert!(r.actuator.calls().is_empty());
    }

    #[test]
    fn invalid_room_is_rejected_without_state() {
        let r = rig();
        assert!(r.controller.process("Bad Room!", &bright()).is_err());
        assert!(r.controller.rooms().is_empty());
    }

    #[test]
    fn reset_room_cancels_timer() {
        let r = rig();
        r.presence.set_present(true);
        r.controller.process("den", &bright()).unwrap();
        r.presence.set_present(false);
        r.scheduler.advance(Duration::from_secs(120));
        r.controller.process("den", &bright()).unwrap();
        assert_eq!(r.scheduler.pending(), 1);
        assert!(r.controller.reset_room("den").unwrap());
        assert_eq!(r.scheduler.pending(), 0);
        assert!(r.controller.status("den").is_none());
        assert!(!r.controller.reset_room("attic").unwrap());
    }
}
