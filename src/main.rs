//! av-passthru binary: runs the audio, video and OSD workers until Ctrl-C.

use std::sync::Arc;

use av_passthru::{
    AlsaDuplex, AudioWorker, BmpDecoder, Coordinator, FramebufferDisplay, OsdWorker,
    PipelineConfig, V4L2Capture, V4L2Display, VideoWorker,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> av_passthru::Result<i32> {
    let config = PipelineConfig::from_env()?;

    let mut coordinator = Coordinator::new();
    coordinator.register(
        AudioWorker::<AlsaDuplex>::new(config.audio.clone(), config.audio.sample_rate)
            .with_activation(config.audio.activation.clone()),
    );
    coordinator.register(VideoWorker::<V4L2Capture, V4L2Display>::new(
        config.video.capture.clone(),
        config.video.display.clone(),
    ));
    coordinator.register(OsdWorker::<FramebufferDisplay>::new(
        config.osd.framebuffer.clone(),
        config.osd.clone(),
        Arc::new(BmpDecoder),
    ));

    coordinator.register_shutdown_hook(|| info!("exiting"));
    let interrupt = coordinator.interrupt_handle();
    ctrlc::set_handler(move || interrupt.interrupt())
        .map_err(|err| {
            av_passthru::PipelineError::configuration("signal handler", err.to_string())
        })?;

    match coordinator.start() {
        Ok(()) => {
            println!("All application threads started");
            println!("Press Ctrl-C to exit");
        }
        Err(err) => error!(error = %err, "pipeline did not start completely"),
    }

    let report = coordinator.join();
    for (worker, outcome) in report.outcomes() {
        info!(worker, ?outcome, "worker finished");
    }
    Ok(report.exit_code())
}
