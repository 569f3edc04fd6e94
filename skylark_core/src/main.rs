//! # Skylark Flight Core
//!
//! Host entry point: loads the configuration, builds the object bus,
//! registers every flight task on the cooperative scheduler and runs the
//! full chain against the simulated IMU.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use skylark_common::alarms::{AlarmLevel, AlarmSlot};
use skylark_common::config::CoreConfig;
use skylark_common::consts::DEFAULT_CONFIG_PATH;
use skylark_common::watchdog::{WatchdogFlags, WatchdogRegistry, WatchdogVerdict};

use skylark_core::actuator::ActuatorMixer;
use skylark_core::alarms::Alarms;
use skylark_core::estimator::AttitudeEstimator;
use skylark_core::manual::ManualControl;
use skylark_core::objects::FlightObjects;
use skylark_core::path::PathFollower;
use skylark_core::sched::{CallbackPriority, Scheduler, TaskPriority, UpdateMode};
use skylark_core::sensors::{
    ImuQueue, SensorIngest, SensorKind, SensorOrientation, SensorRegistry, SimImu,
};
use skylark_core::stab::Stabilization;

/// Sensor ingest period [ms] for the host build.
const SENSOR_TICK_MS: u32 = 2;

/// Manual control / arming evaluation period [ms].
const MANUAL_TICK_MS: u32 = 20;

/// Watchdog sweep period [ms].
const WATCHDOG_TICK_MS: u32 = 1000;

/// Consecutive failed boots that latch the boot fault.
const BOOT_FAULT_LIMIT: u32 = 3;

#[derive(Parser)]
#[command(name = "skylark", about = "Skylark flight control core")]
struct Args {
    /// Configuration directory containing core.toml
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config_dir: PathBuf,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,

    /// Run for this many seconds, then shut down (0 = until killed)
    #[arg(long, default_value_t = 0)]
    duration: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let (config, boot_faulted) = load_config_with_boot_guard(&args.config_dir);
    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let objects = FlightObjects::from_config(&config);
    let alarms = Alarms::new(objects.system_alarms.clone());
    if boot_faulted {
        alarms.set_extended(
            AlarmSlot::BootFault,
            AlarmLevel::Critical,
            skylark_common::alarms::ExtendedAlarmStatus::RebootRequired,
            0,
        );
    }

    let watchdog = Arc::new(WatchdogRegistry::new());
    let sched = Arc::new(Scheduler::new());

    register_sensor_chain(&sched, &objects, &watchdog);
    register_stabilization(&sched, &objects, &watchdog);
    register_manual_control(&sched, &objects, &watchdog);
    register_path_follower(&sched, &objects, &watchdog);
    register_actuators(&sched, &objects, &watchdog);
    register_watchdog_sweep(&sched, &watchdog);

    sched.start()?;
    info!("flight core running");
    mark_boot_successful(&args.config_dir);

    if args.duration > 0 {
        std::thread::sleep(Duration::from_secs(args.duration));
    } else {
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }

    info!("shutting down");
    sched.shutdown();
    Ok(())
}

/// Load the configuration, latching `BootFault` after three consecutive
/// failed boots (and forcing defaults in that case).
fn load_config_with_boot_guard(config_dir: &PathBuf) -> (CoreConfig, bool) {
    let counter = config_dir.join("boot_count");
    let boots: u32 = std::fs::read_to_string(&counter)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let _ = std::fs::write(&counter, format!("{}", boots + 1));

    if boots >= BOOT_FAULT_LIMIT {
        error!(boots, "repeated boot failures, forcing default settings");
        return (CoreConfig::default(), true);
    }

    match CoreConfig::load_dir(config_dir) {
        Ok(config) => (config, false),
        Err(e) => {
            warn!(error = %e, "configuration rejected, using defaults");
            (CoreConfig::default(), false)
        }
    }
}

fn mark_boot_successful(config_dir: &PathBuf) {
    let _ = std::fs::write(config_dir.join("boot_count"), "0");
}

/// Self-rescheduling periodic callback helper: the handle lands in the
/// cell after registration so the closure can re-arm itself.
fn register_periodic(
    sched: &Arc<Scheduler>,
    name: &'static str,
    band: CallbackPriority,
    task: TaskPriority,
    period_ms: u32,
    mut body: impl FnMut() + Send + 'static,
) {
    let cell: Arc<OnceLock<skylark_core::sched::CallbackHandle>> = Arc::new(OnceLock::new());
    let handle = {
        let sched = Arc::clone(sched);
        let cell = Arc::clone(&cell);
        sched.clone().create(name, band, task, move || {
            body();
            if let Some(h) = cell.get() {
                sched.schedule(h, period_ms, UpdateMode::Sooner);
            }
        })
    };
    let _ = cell.set(handle.clone());
    sched.dispatch(&handle);
}

fn register_sensor_chain(
    sched: &Arc<Scheduler>,
    objects: &Arc<FlightObjects>,
    watchdog: &Arc<WatchdogRegistry>,
) {
    // Board init registers whatever chips it finds; the host build finds
    // the simulated pair.
    let mut registry = SensorRegistry::new();
    let (gyro, accel) = SimImu::level_pair();
    registry.register(Box::new(gyro));
    registry.register(Box::new(accel));
    let (Some(gyro), Some(accel)) = (
        registry.take(SensorKind::Gyro),
        registry.take(SensorKind::Accel),
    ) else {
        error!("IMU drivers missing from the registry");
        std::process::exit(1);
    };

    let queue = ImuQueue::new();
    let mut ingest = SensorIngest::new(gyro, accel, SensorOrientation::default(), queue.clone());
    let mut estimator = AttitudeEstimator::new(Arc::clone(objects), queue);

    watchdog.register(WatchdogFlags::SENSORS);
    watchdog.register(WatchdogFlags::ATTITUDE);

    {
        let watchdog = Arc::clone(watchdog);
        register_periodic(
            sched,
            "sensors",
            CallbackPriority::Critical,
            TaskPriority::Critical,
            SENSOR_TICK_MS,
            move || {
                ingest.tick();
                watchdog.update(WatchdogFlags::SENSORS);
            },
        );
    }
    {
        let watchdog = Arc::clone(watchdog);
        register_periodic(
            sched,
            "attitude",
            CallbackPriority::Critical,
            TaskPriority::Critical,
            SENSOR_TICK_MS,
            move || {
                estimator.tick();
                watchdog.update(WatchdogFlags::ATTITUDE);
            },
        );
    }
}

fn register_stabilization(
    sched: &Arc<Scheduler>,
    objects: &Arc<FlightObjects>,
    watchdog: &Arc<WatchdogRegistry>,
) {
    let mut stab = Stabilization::new(Arc::clone(objects));
    watchdog.register(WatchdogFlags::STABILIZATION);

    let handle = {
        let watchdog = Arc::clone(watchdog);
        let mut last = Instant::now();
        sched.create(
            "stabilization",
            CallbackPriority::Critical,
            TaskPriority::Critical,
            move || {
                let now = Instant::now();
                let dt = (now - last).as_secs_f32().clamp(1e-6, 1.0);
                last = now;
                stab.gyro_tick(dt);
                watchdog.update(WatchdogFlags::STABILIZATION);
            },
        )
    };

    // The cascade runs on every gyro sample: the publish dispatches it.
    let sched = Arc::clone(sched);
    objects
        .gyro_state
        .connect_callback(move |_| sched.dispatch(&handle));
}

fn register_manual_control(
    sched: &Arc<Scheduler>,
    objects: &Arc<FlightObjects>,
    watchdog: &Arc<WatchdogRegistry>,
) {
    let mut manual = ManualControl::new(Arc::clone(objects));
    watchdog.register(WatchdogFlags::MANUALCONTROL);

    let watchdog = Arc::clone(watchdog);
    let now_source = Arc::clone(sched);
    register_periodic(
        sched,
        "manualcontrol",
        CallbackPriority::Regular,
        TaskPriority::High,
        MANUAL_TICK_MS,
        move || {
            manual.tick(now_source.now_ms());
            watchdog.update(WatchdogFlags::MANUALCONTROL);
        },
    );
}

fn register_path_follower(
    sched: &Arc<Scheduler>,
    objects: &Arc<FlightObjects>,
    watchdog: &Arc<WatchdogRegistry>,
) {
    let mut follower = PathFollower::new(Arc::clone(objects));
    watchdog.register(WatchdogFlags::PATHFOLLOWER);

    let cell: Arc<OnceLock<skylark_core::sched::CallbackHandle>> = Arc::new(OnceLock::new());
    let handle = {
        let sched = Arc::clone(sched);
        let cell = Arc::clone(&cell);
        let watchdog = Arc::clone(watchdog);
        let last_ms = AtomicU64::new(0);
        sched.clone().create(
            "pathfollower",
            CallbackPriority::Low,
            TaskPriority::Regular,
            move || {
                let now = sched.now_ms();
                let prev = last_ms.swap(now, Ordering::Relaxed);
                let dt = ((now.saturating_sub(prev)) as f32 / 1000.0).clamp(1e-3, 1.0);
                let period = follower.tick(dt);
                watchdog.update(WatchdogFlags::PATHFOLLOWER);
                if let Some(h) = cell.get() {
                    sched.schedule(h, period, UpdateMode::Sooner);
                }
            },
        )
    };
    let _ = cell.set(handle.clone());
    sched.dispatch(&handle);
}

fn register_actuators(
    sched: &Arc<Scheduler>,
    objects: &Arc<FlightObjects>,
    watchdog: &Arc<WatchdogRegistry>,
) {
    let mut mixer = ActuatorMixer::new(Arc::clone(objects));
    watchdog.register(WatchdogFlags::ACTUATOR);

    let handle = {
        let watchdog = Arc::clone(watchdog);
        sched.create(
            "actuator",
            CallbackPriority::Critical,
            TaskPriority::High,
            move || {
                mixer.tick();
                watchdog.update(WatchdogFlags::ACTUATOR);
            },
        )
    };
    let sched = Arc::clone(sched);
    objects
        .actuator_desired
        .connect_callback(move |_| sched.dispatch(&handle));
}

fn register_watchdog_sweep(sched: &Arc<Scheduler>, watchdog: &Arc<WatchdogRegistry>) {
    let watchdog = Arc::clone(watchdog);
    register_periodic(
        sched,
        "watchdog",
        CallbackPriority::Low,
        TaskPriority::Low,
        WATCHDOG_TICK_MS,
        move || match watchdog.sweep() {
            WatchdogVerdict::Healthy => {}
            WatchdogVerdict::Stalled(flags) => {
                // Flight hardware resets here; the host build screams.
                error!(?flags, "watchdog: task stalled");
            }
        },
    );
}
