use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use viewfinder::platform::sim::SimBackend;
use viewfinder::platform::CameraBackend;
use viewfinder::{
    CameraController, CameraFrame, DiskWriter, FrameSink, Notice, SessionState, StaticAuthorizer,
    StreamTarget, SystemAuthorizer, ViewfinderConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    viewfinder::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: viewfinder-cli <command> [args]");
        eprintln!("Commands: list-devices [--json], preview [--duration-ms <n>], capture [--count <n>] [--out <dir>]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-devices" => cmd_list_devices(&args),
        "preview" => cmd_preview(&args),
        "capture" => cmd_capture(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn backend(args: &[String]) -> Arc<dyn CameraBackend> {
    #[cfg(feature = "native")]
    if args.contains(&"--native".to_string()) {
        return Arc::new(viewfinder::platform::native::NativeBackend);
    }
    let _ = args;
    Arc::new(SimBackend::new())
}

fn make_controller(
    args: &[String],
    config: ViewfinderConfig,
) -> Result<CameraController, Box<dyn std::error::Error>> {
    let controller = if args.contains(&"--native".to_string()) {
        CameraController::new(
            backend(args),
            Arc::new(SystemAuthorizer),
            Arc::new(DiskWriter),
            config,
        )?
    } else {
        CameraController::new(
            backend(args),
            Arc::new(StaticAuthorizer::granted()),
            Arc::new(DiskWriter),
            config,
        )?
    };
    Ok(controller)
}

fn cmd_list_devices(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let devices = backend(args).list_devices()?;
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for d in devices {
            println!("{}: {} ({}, {} deg)", d.id, d.name, d.facing, d.sensor_orientation);
        }
    }
    Ok(())
}

struct CountingSurface {
    frames: AtomicU64,
}

impl FrameSink for CountingSurface {
    fn deliver(&self, frame: CameraFrame) {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if count % 30 == 0 {
            println!(
                "{} frames ({}x{} from device {})",
                count, frame.width, frame.height, frame.device_id
            );
        }
    }
}

fn cmd_preview(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let duration_ms = parse_flag(args, "--duration-ms")?.unwrap_or(3000);

    let config = ViewfinderConfig::default();
    let controller = make_controller(args, config)?;

    let surface = Arc::new(CountingSurface {
        frames: AtomicU64::new(0),
    });
    let [width, height] = [1280, 720];
    controller.surface_ready(StreamTarget::surface(width, height, surface.clone()))?;

    if !controller.wait_for_state(
        |s| s == SessionState::PreviewRunning || s == SessionState::Failed,
        Duration::from_secs(5),
    ) {
        return Err("preview did not start in time".into());
    }
    if controller.state() == SessionState::Failed {
        return Err("session failed while starting preview".into());
    }
    println!("preview running ({} camera)", controller.facing());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let started = std::time::Instant::now();
    while started.elapsed() < Duration::from_millis(duration_ms)
        && !interrupted.load(Ordering::SeqCst)
    {
        std::thread::sleep(Duration::from_millis(20));
    }

    controller.surface_destroyed();
    controller.wait_for_state(|s| s == SessionState::Idle, Duration::from_secs(2));
    println!(
        "stopped after {} frames",
        surface.frames.load(Ordering::Relaxed)
    );
    Ok(())
}

fn cmd_capture(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let count = parse_flag(args, "--count")?.unwrap_or(1);
    let out = args
        .iter()
        .position(|a| a == "--out")
        .and_then(|i| args.get(i + 1))
        .cloned();

    let mut config = ViewfinderConfig::default();
    if let Some(dir) = out {
        config.storage.output_directory = dir;
    }
    let controller = make_controller(args, config)?;

    struct Quiet;
    impl FrameSink for Quiet {
        fn deliver(&self, _frame: CameraFrame) {}
    }
    controller.surface_ready(StreamTarget::surface(1280, 720, Arc::new(Quiet)))?;
    if !controller.wait_for_state(|s| s == SessionState::PreviewRunning, Duration::from_secs(5)) {
        return Err("preview did not start in time".into());
    }

    let notices = controller.notices();
    for n in 0..count {
        controller.capture_still();
        // Wait for this capture's persistence outcome before the next one.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match notices.recv_timeout(deadline.saturating_duration_since(std::time::Instant::now())) {
                Ok(Notice::StillSaved { path }) => {
                    println!("capture {} saved to {}", n + 1, path.display());
                    break;
                }
                Ok(Notice::PersistenceFailed { reason }) => {
                    eprintln!("capture {} failed to persist: {}", n + 1, reason);
                    break;
                }
                Ok(_) => continue,
                Err(_) => return Err("timed out waiting for capture".into()),
            }
        }
        controller.wait_for_state(|s| s == SessionState::PreviewRunning, Duration::from_secs(2));
    }

    controller.close()?;
    controller.wait_for_state(|s| s == SessionState::Idle, Duration::from_secs(2));
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => {
            let value = args
                .get(i + 1)
                .ok_or_else(|| format!("{} requires a value", flag))?;
            Ok(Some(value.parse()?))
        }
        None => Ok(None),
    }
}
