//! Drowsiness Monitor - Main Entry Point
//!
//! Usage: `drowsiness-monitor [settings-file]`

use anyhow::{anyhow, Context};
use camera_capture::{ImageDirSource, VideoFrame};
use event_log::EventLogger;
use pipeline::{
    init_logging, DrowsinessMonitor, FrameObserver, FrameReport, LoopControl, ReplayDetector, Settings,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Traces each processed frame
struct TraceObserver;

impl FrameObserver for TraceObserver {
    fn on_frame(&mut self, _frame: &VideoFrame, report: &FrameReport) -> LoopControl {
        match report.features {
            Some(features) => debug!(
                "Frame {}: {} (EAR {:.3}, MAR {:.3}, eyes closed {:.1}s)",
                report.frame_index, report.state, features.ear, features.mar, report.eyes_closed_secs
            ),
            None => debug!("Frame {}: {}", report.frame_index, report.state),
        }
        LoopControl::Continue
    }
}

fn main() -> anyhow::Result<()> {
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let mut settings = Settings::load(settings_path.as_deref()).context("Failed to load settings")?;

    init_logging(settings.level()?, settings.log_json)?;

    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    // Recorded landmarks are in source-frame pixels; detection must see the source frame
    if settings.performance.resize_width.is_some() || settings.performance.use_roi {
        warn!("resize_width and use_roi do not apply to replayed landmarks, disabling");
        settings.performance.resize_width = None;
        settings.performance.use_roi = false;
    }

    let detector = ReplayDetector::open(&settings.source.landmarks_path)
        .context("Failed to open landmark recording")?;
    let mut source = ImageDirSource::open(&settings.source.camera_config())
        .context("Failed to open frame source")?;

    let logger = Arc::new(EventLogger::new());
    logger
        .setup(settings.logging.clone())
        .context("Failed to set up event logger")?;

    let mut monitor = DrowsinessMonitor::new(&settings, detector, Arc::clone(&logger))?;
    let stop = monitor.stop_handle();

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let frame_loop = std::thread::Builder::new()
        .name("frame-loop".to_string())
        .spawn(move || {
            let result = monitor.run(&mut source, &mut TraceObserver);
            let _ = done_tx.send(());
            result
        })
        .context("Failed to start frame loop")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    runtime.block_on(async {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Interrupt received, stopping");
                    stop.store(true, Ordering::Release);
                }
                // The join below still waits for the end of stream
                Err(e) => warn!("Cannot listen for interrupts, running to end of stream: {}", e),
            },
            _ = done_rx => {}
        }
    });

    let result = frame_loop
        .join()
        .map_err(|_| anyhow!("Frame loop panicked"));
    logger.shutdown();

    let summary = result??;
    let stats = logger.stats();
    info!(
        "Done. Frames: {} read, {} processed. Events: {} logged, {} written, {} dropped",
        summary.frames_read, summary.frames_processed, summary.events_logged, stats.written, stats.dropped
    );

    Ok(())
}
