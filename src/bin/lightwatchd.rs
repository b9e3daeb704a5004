//! lightwatchd - room lighting automation daemon
//!
//! This daemon:
//! 1. Reads frames from each configured room's source
//! 2. Gates frames on motion with an adaptive sampler
//! 3. Classifies lighting and detects presence per room
//! 4. Switches lights, notifies the user, and auto-turns-off on timeout
//! 5. Serves the loopback response API for notification answers

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use lightwatch::api::{ApiConfig, ApiServer};
use lightwatch::calibrate::Section;
use lightwatch::ingest::FrameSource;
use lightwatch::{
    epoch_secs, Actuator, AdaptiveSampler, AutomationController, ClassifierRegistry,
    Collaborators, DaemonConfig, DryRunActuator, HttpActuator, HttpNotificationChannel,
    HttpPresenceDetector, LogNotificationChannel, NotificationChannel, PresenceDetector,
    SqliteAutomationLog, StubPresence, SystemClock, ThreadScheduler,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Offset of local time from UTC, used to pick day/night thresholds.
    #[arg(
        long,
        env = "LIGHTWATCH_UTC_OFFSET_HOURS",
        default_value_t = 0,
        allow_hyphen_values = true
    )]
    utc_offset_hours: i32,
    /// Seconds between health log lines.
    #[arg(long, default_value_t = 30)]
    health_interval_s: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = DaemonConfig::load()?;

    let mut section = Section::for_hour(local_hour(args.utc_offset_hours));
    let registry =
        ClassifierRegistry::new(cfg.lighting_for_hour(local_hour(args.utc_offset_hours)))?;

    let mut presence: Box<dyn PresenceDetector> = match &cfg.presence.url {
        Some(url) => Box::new(HttpPresenceDetector::new(url, cfg.presence.timeout)?),
        None => {
            log::warn!("no presence endpoint configured; rooms will always look empty");
            Box::new(StubPresence::new(false))
        }
    };
    presence.warm_up()?;
    let actuator: Arc<dyn Actuator> = match (&cfg.actuator.url, cfg.dry_run) {
        (Some(url), false) => Arc::new(HttpActuator::new(url, cfg.actuator.timeout)?),
        _ => Arc::new(DryRunActuator),
    };
    let notifier: Arc<dyn NotificationChannel> = match (&cfg.notifications.url, cfg.dry_run) {
        (Some(url), false) => {
            Arc::new(HttpNotificationChannel::new(url, cfg.notifications.timeout)?)
        }
        _ => Arc::new(LogNotificationChannel),
    };

    let controller = AutomationController::new(
        cfg.automation.clone(),
        registry,
        Collaborators {
            presence,
            actuator,
            notifier,
            scheduler: Arc::new(ThreadScheduler),
            clock: Arc::new(SystemClock),
            log: Box::new(SqliteAutomationLog::open(&cfg.db_path)?),
        },
    )?;

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
            token_path: cfg.api_token_path.clone(),
        },
        controller.clone(),
    )
    .spawn()?;
    if let Some(path) = &api_handle.token_path {
        log::info!("response api capability token written to {}", path.display());
    } else {
        log::warn!(
            "response api capability token (handle securely): {}",
            api_handle.token
        );
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "lightwatchd running: {} room(s), audit log {}, dry_run={}, {} thresholds",
        cfg.rooms.len(),
        cfg.db_path,
        cfg.dry_run,
        section
    );

    let frame_interval = Duration::from_millis(1000 / u64::from(cfg.target_fps.max(1)));
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    for room in &cfg.rooms {
        let room_id = room.id.clone();
        let source = FrameSource::open(&room.source, cfg.presence.timeout)?;
        let sampler = AdaptiveSampler::new(cfg.sampler.clone())?;
        let controller = controller.clone();
        let shutdown = shutdown.clone();
        let worker = std::thread::Builder::new()
            .name(format!("room-{room_id}"))
            .spawn(move || {
                run_room(&room_id, source, sampler, &controller, &shutdown, frame_interval)
            })?;
        workers.push(worker);
    }

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));

        let now_section = Section::for_hour(local_hour(args.utc_offset_hours));
        if now_section != section {
            let lighting = cfg.lighting_for_hour(local_hour(args.utc_offset_hours));
            for room in &cfg.rooms {
                if let Err(e) = controller.classifiers().configure(&room.id, lighting.clone()) {
                    log::error!(
                        "room '{}': switching to {} thresholds failed: {}",
                        room.id,
                        now_section,
                        e
                    );
                }
            }
            log::info!("switched to {} thresholds", now_section);
            section = now_section;
        }

        if last_health_log.elapsed() >= Duration::from_secs(args.health_interval_s) {
            for room in controller.rooms() {
                if let Some(status) = controller.status(&room) {
                    log::info!(
                        "room '{}' lighting={} lights_on={} person={} pending={}",
                        status.room,
                        status.lighting,
                        status.lights_on,
                        status.person_present,
                        status.pending_notification.as_deref().unwrap_or("-")
                    );
                }
            }
            last_health_log = Instant::now();
        }

        if workers.iter().all(|w| w.is_finished()) {
            log::info!("all frame sources finished");
            break;
        }
    }

    log::info!("shutting down...");
    shutdown.store(true, Ordering::SeqCst);
    for worker in workers {
        if worker.join().is_err() {
            log::error!("room worker panicked");
        }
    }
    api_handle.stop()?;
    Ok(())
}

fn run_room(
    room: &str,
    mut source: FrameSource,
    mut sampler: AdaptiveSampler,
    controller: &AutomationController,
    shutdown: &AtomicBool,
    frame_interval: Duration,
) {
    let mut last_health_log = Instant::now();
    let mut processed = 0u64;
    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        match source.next_frame() {
            Ok(Some(frame)) => {
                let decision = sampler.observe(&frame);
                if decision.process {
                    processed += 1;
                    match controller.process(room, &frame) {
                        Ok(outcome) => {
                            for action in &outcome.actions {
                                log::info!("room '{}': {:?}", room, action);
                            }
                            if outcome.state_changed {
                                log::info!(
                                    "room '{}': lighting {} (confidence {:.2})",
                                    room,
                                    outcome.lighting,
                                    outcome.confidence
                                );
                            }
                        }
                        Err(e) => log::warn!("room '{}': frame rejected: {}", room, e),
                    }
                }
            }
            Ok(None) => {
                log::info!("room '{}': frame source exhausted", room);
                break;
            }
            Err(e) => log::warn!("room '{}': frame source error: {}", room, e),
        }

        if last_health_log.elapsed() >= Duration::from_secs(60) {
            let stats = source.stats();
            log::info!(
                "room '{}' source={} frames={} processed={}",
                room,
                stats.source,
                stats.frames_captured,
                processed
            );
            last_health_log = Instant::now();
        }

        if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

fn local_hour(utc_offset_hours: i32) -> u32 {
    let secs = epoch_secs(SystemTime::now()) as i64 + i64::from(utc_offset_hours) * 3600;
    (secs.rem_euclid(86_400) / 3600) as u32
}
