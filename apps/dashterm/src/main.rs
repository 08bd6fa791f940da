use anyhow::{Context, Result};
use clap::Parser;
use dashterm::config::{AppConfig, Cli, HostConfig};
use dashterm::surface::{FrameBufferHandle, FrameBufferSurface, Rect, SurfaceCallback};
use dashterm::telemetry::logging;
use dashterm::{Display, SurfaceContainer};
use std::path::Path;
use tokio::signal;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::try_from(cli)?;
    logging::init(&config.log).context("failed to initialise logging")?;
    info!(
        bind_host = %config.display.bind_host,
        port = config.display.port,
        capacity = config.display.capacity,
        refresh_ms = config.display.refresh_interval.as_millis() as u64,
        "starting dashterm"
    );

    run(config).await
}

async fn run(config: AppConfig) -> Result<()> {
    let display = Display::spawn(config.display.clone());
    if let Err(err) = display.start().await {
        // The display still renders the banner; the operator sees the log.
        error!(error = %err, "continuing without a listener");
    }

    let HostConfig {
        surface_width,
        surface_height,
        ref snapshot,
        snapshot_interval,
    } = config.host;
    let (surface, frames) = FrameBufferSurface::new(surface_width, surface_height);
    let callback = display.surface_callback();
    callback.on_surface_available(SurfaceContainer::new(
        Box::new(surface),
        surface_width,
        surface_height,
    ));
    callback.on_visible_area_changed(Rect::new(
        0,
        0,
        i32::try_from(surface_width).unwrap_or(i32::MAX),
        i32::try_from(surface_height).unwrap_or(i32::MAX),
    ));

    let mut snapshots = snapshot.as_ref().map(|_| {
        let mut timer = tokio::time::interval(snapshot_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = next_snapshot(&mut snapshots) => {
                if let Some(path) = snapshot {
                    write_snapshot(&frames, path);
                }
            }
        }
    }
    info!("shutdown signal received");

    if let Some(path) = snapshot {
        write_snapshot(&frames, path);
    }
    callback.on_surface_destroyed();
    let stats = display
        .shutdown()
        .await
        .context("render loop did not shut down cleanly")?;
    info!(
        frames = stats.frames,
        ticks = stats.ticks,
        abandoned = stats.abandoned,
        "dashterm stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}

async fn next_snapshot(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn write_snapshot(frames: &FrameBufferHandle, path: &Path) {
    match frames.save_png(path) {
        Ok(()) => info!(
            path = %path.display(),
            frames = frames.frames_published(),
            "snapshot written"
        ),
        Err(err) => warn!(path = %path.display(), error = %err, "failed to write snapshot"),
    }
}
