use anyhow::{anyhow, bail, Context};
use crabcapture::testing::{EventRecorder, RecordedEvent, SyntheticBackend};
use crabcapture::{CameraCapturer, CameraEnumerator, CapturerConfig};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    crabcapture::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabcapture-cli <list-devices|run|show-config> [args]");
        std::process::exit(1);
    }

    let config = load_config(&args)?;
    match args[1].as_str() {
        "list-devices" => cmd_list_devices(&args),
        "run" => cmd_run(&args, config),
        "show-config" => cmd_show_config(&config),
        command => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn load_config(args: &[String]) -> anyhow::Result<CapturerConfig> {
    match flag_value(args, "--config") {
        Some(path) => CapturerConfig::load_from_file(path).context("loading config"),
        None => Ok(CapturerConfig::load_or_default()),
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn cmd_list_devices(args: &[String]) -> anyhow::Result<()> {
    let device = SyntheticBackend::back_and_front();
    let names = device.device_names();
    if args.contains(&"--json".to_string()) {
        let devices: Vec<serde_json::Value> = names
            .iter()
            .map(|n| serde_json::json!({ "name": n, "front_facing": device.is_front_facing(n) }))
            .collect();
        println!("{}", serde_json::to_string(&devices)?);
    } else {
        for name in names {
            let facing = if device.is_front_facing(&name) { "front" } else { "back" };
            println!("{}: {}", name, facing);
        }
    }
    Ok(())
}

fn cmd_show_config(config: &CapturerConfig) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

fn cmd_run(args: &[String], config: CapturerConfig) -> anyhow::Result<()> {
    let frames: usize = match flag_value(args, "--frames") {
        Some(n) => n.parse().with_context(|| format!("invalid --frames value {}", n))?,
        None => 30,
    };
    let switch = args.contains(&"--switch".to_string());
    let json = args.contains(&"--json".to_string());

    let device = SyntheticBackend::back_and_front();
    let recorder = EventRecorder::new();
    let capturer = CameraCapturer::builder()
        .device(Arc::clone(&device))
        .events(recorder.clone())
        .observer(recorder.clone())
        .config(config)
        .build()?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    capturer.start_capture_with_defaults();
    let started = recorder.wait_for_count(Duration::from_secs(5), 1, |e| {
        matches!(e, RecordedEvent::Started(true) | RecordedEvent::Error(_))
    });
    if !started || !capturer.is_running() {
        bail!("camera {} did not start", capturer.camera_name());
    }

    let mut delivered = 0;
    while delivered < frames && !interrupted.load(Ordering::SeqCst) {
        if switch && delivered == frames / 2 && capturer.camera_name() == "back" {
            capturer.switch_camera(recorder.switch_handler());
            let switched = recorder.wait_for_count(Duration::from_secs(5), 1, |e| {
                matches!(e, RecordedEvent::SwitchDone(_) | RecordedEvent::SwitchError(_))
            });
            if !switched {
                return Err(anyhow!("camera switch timed out"));
            }
        }
        if device.emit_frame() > 0 {
            delivered += 1;
        }
        std::thread::sleep(Duration::from_millis(33));
    }
    let expected = delivered;
    recorder.wait_for_count(Duration::from_secs(2), expected, |e| matches!(e, RecordedEvent::Frame { .. }));

    let stats = capturer.capture_stats();
    capturer.stop_capture();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else if let Some(stats) = stats {
        println!(
            "{} ({}): {} frames, {:.1} fps, up {} ms",
            stats.camera_name, stats.session, stats.frames_captured, stats.current_fps, stats.uptime_ms
        );
    } else {
        println!("No session statistics");
    }
    for event in recorder.events() {
        if !matches!(event, RecordedEvent::Frame { .. }) {
            log::info!("{:?}", event);
        }
    }
    Ok(())
}
