//! Replays a directory of recorded frames through pose estimation and fall
//! classification, printing and logging every event.
//!
//! Usage: fall_monitor <frames_dir> [config.toml]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};

use fall_sentinel::action::OnnxActionClassifier;
use fall_sentinel::config::Config;
use fall_sentinel::monitor::{FallMonitor, MonitorEvent};
use fall_sentinel::pose::{load_frame, preprocess_for_movenet, MoveNetDetector};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const FRAME_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

// ===========================================================================
// Logging
// ===========================================================================

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<(LogFile, String)> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/fall_monitor_{}.log", ts);
    let file = std::fs::File::create(&path)?;
    eprintln!("Log: {}", path);
    Ok((Arc::new(Mutex::new(std::io::BufWriter::new(file))), path))
}

macro_rules! log {
    ($logfile:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        eprintln!("{}", msg);
        if let Ok(mut f) = $logfile.lock() {
            let _ = writeln!(f, "{}", msg);
        }
    }};
}

// ===========================================================================
// Frames
// ===========================================================================

/// Image files in `dir`, sorted by name so they replay in capture order.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    frames.sort();
    Ok(frames)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let frames_dir = PathBuf::from(args.next().context("Usage: fall_monitor <frames_dir> [config.toml]")?);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path);

    let (logfile, _log_path) = open_log_file()?;
    log!(logfile, "Fall Monitor ({})", env!("GIT_VERSION"));
    log!(logfile, "Frames: {}", frames_dir.display());
    log!(logfile, "Pose model: {}", config.pose.model_path);
    log!(logfile, "Classifier: {} {:?}", config.classifier.model_path, config.classifier.labels);
    log!(logfile, "Fill policy: {:?}", config.window.fill_policy);

    let frames = list_frames(&frames_dir)?;
    if frames.is_empty() {
        anyhow::bail!("No frames found in {}", frames_dir.display());
    }
    log!(logfile, "{} frames", frames.len());

    let detector = MoveNetDetector::new(&config.pose.model_path, config.pose.min_pose_confidence)?;
    log!(logfile, "Pose model loaded");

    let classifier = match OnnxActionClassifier::from_config(&config.classifier) {
        Ok(c) => {
            log!(logfile, "Classifier loaded");
            Some(c)
        }
        Err(e) => {
            log!(logfile, "Classifier unavailable, poses only: {:#}", e);
            None
        }
    };

    let (event_tx, event_rx) = mpsc::channel();
    let monitor = FallMonitor::new(detector, classifier, &config, event_tx);
    let handle = monitor.spawn(config.app.queue_depth)?;

    let logfile_events = logfile.clone();
    let printer = std::thread::spawn(move || {
        for event in event_rx {
            match event {
                MonitorEvent::Points { .. } => {}
                MonitorEvent::Classification { frame, result } => {
                    log!(logfile_events, "[frame {:05}] {} ({:.1}%)", frame, result.label, result.confidence * 100.0);
                }
                MonitorEvent::FallAlert { frame, confidence } => {
                    log!(logfile_events, "[frame {:05}] FALL DETECTED ({:.1}%)", frame, confidence * 100.0);
                }
            }
        }
    });

    let start = Instant::now();
    let mut load_errors = 0u32;
    for path in &frames {
        let input = match load_frame(path).and_then(|mat| preprocess_for_movenet(&mat)) {
            Ok(input) => input,
            Err(e) => {
                log!(logfile, "preprocess error: {:#}", e);
                load_errors += 1;
                continue;
            }
        };
        handle.send(input)?;
    }

    let stats = handle.shutdown()?;
    // the monitor's event sender is gone once the worker exits, which ends the printer loop
    let _ = printer.join();

    let elapsed = start.elapsed().as_secs_f64();
    log!(
        logfile,
        "Done: {} frames in {:.1}s ({:.1} FPS), load errors {}",
        stats.frames,
        elapsed,
        stats.frames as f64 / elapsed.max(1e-6),
        load_errors
    );
    log!(logfile, "{:?}", stats);

    if let Ok(mut f) = logfile.lock() {
        f.flush()?;
    }
    Ok(())
}
