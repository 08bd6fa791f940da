//! The render loop task and the handles that feed it.
//!
//! Everything that touches the surface happens on one task: host callbacks, periodic ticks and
//! new-data triggers are all turned into [`RenderCommand`]s and applied in arrival order.

use super::{RenderReason, RenderStats, Renderer};
use crate::surface::{LifecycleEffect, Rect, SurfaceCallback, SurfaceContainer};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

const MIN_REFRESH: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub enum RenderCommand {
    SurfaceAvailable(SurfaceContainer),
    SurfaceDestroyed,
    VisibleAreaChanged(Rect),
    Render(RenderReason),
    Shutdown,
}

/// Creates the command channel between hosts/connections and a [`RenderLoop`].
pub fn render_channel() -> (DisplayHandle, RenderCommands) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicBool::new(false));
    (
        DisplayHandle {
            commands: tx,
            pending: Arc::clone(&pending),
        },
        RenderCommands { rx, pending },
    )
}

/// Receiving end of [`render_channel`].
pub struct RenderCommands {
    rx: UnboundedReceiver<RenderCommand>,
    pending: Arc<AtomicBool>,
}

impl RenderCommands {
    pub async fn recv(&mut self) -> Option<RenderCommand> {
        let command = self.rx.recv().await;
        self.dequeued(command.as_ref());
        command
    }

    pub fn try_recv(&mut self) -> Option<RenderCommand> {
        let command = self.rx.try_recv().ok();
        self.dequeued(command.as_ref());
        command
    }

    // Lines appended after this point need a fresh request.
    fn dequeued(&self, command: Option<&RenderCommand>) {
        if let Some(RenderCommand::Render(RenderReason::NewData)) = command {
            self.pending.store(false, Ordering::Release);
        }
    }
}

/// Cheap, cloneable "please redraw soon" used by connection tasks.
///
/// At most one new-data request is queued at a time; firing while one is outstanding is a
/// no-op because the queued pass will read the buffer after the new line was appended.
#[derive(Clone)]
pub struct RenderTrigger {
    commands: UnboundedSender<RenderCommand>,
    pending: Arc<AtomicBool>,
}

impl RenderTrigger {
    /// Returns `true` when a new request was queued.
    pub fn fire(&self) -> bool {
        if self.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self
            .commands
            .send(RenderCommand::Render(RenderReason::NewData))
            .is_err()
        {
            self.pending.store(false, Ordering::Release);
            trace!(target = "render::loop", "render loop gone; trigger dropped");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for RenderTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTrigger")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

/// Host-facing handle of a running display. Implements [`SurfaceCallback`].
#[derive(Clone)]
pub struct DisplayHandle {
    commands: UnboundedSender<RenderCommand>,
    pending: Arc<AtomicBool>,
}

impl DisplayHandle {
    pub fn trigger(&self) -> RenderTrigger {
        RenderTrigger {
            commands: self.commands.clone(),
            pending: Arc::clone(&self.pending),
        }
    }

    /// Queue an immediate, uncoalesced render pass.
    pub fn request_render(&self) -> bool {
        self.send(RenderCommand::Render(RenderReason::Manual))
    }

    /// Ask the render loop to exit. Its task resolves to the final [`RenderStats`].
    pub fn shutdown(&self) -> bool {
        self.send(RenderCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn send(&self, command: RenderCommand) -> bool {
        match self.commands.send(command) {
            Ok(()) => true,
            Err(mpsc::error::SendError(command)) => {
                warn!(target = "render::loop", ?command, "render loop has stopped; command dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl SurfaceCallback for DisplayHandle {
    fn on_surface_available(&self, container: SurfaceContainer) {
        self.send(RenderCommand::SurfaceAvailable(container));
    }

    fn on_surface_destroyed(&self) {
        self.send(RenderCommand::SurfaceDestroyed);
    }

    fn on_visible_area_changed(&self, visible_area: Rect) {
        self.send(RenderCommand::VisibleAreaChanged(visible_area));
    }
}

/// Owns the [`Renderer`] and the periodic ticker. The ticker only exists while a surface is
/// attached; its first tick fires immediately so an attach paints right away.
pub struct RenderLoop {
    renderer: Renderer,
    commands: RenderCommands,
    period: Duration,
    ticker: Option<Interval>,
}

impl RenderLoop {
    pub fn new(renderer: Renderer, period: Duration, commands: RenderCommands) -> Self {
        Self {
            renderer,
            commands,
            period: period.max(MIN_REFRESH),
            ticker: None,
        }
    }

    pub fn spawn(self) -> JoinHandle<RenderStats> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> RenderStats {
        debug!(target = "render::loop", period_ms = self.period.as_millis() as u64, "render loop started");
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if self.apply(command).is_break() {
                        break;
                    }
                }
                _ = next_tick(&mut self.ticker) => {
                    self.renderer.render_once(RenderReason::Tick);
                }
            }
        }
        self.ticker = None;
        let stats = self.renderer.stats();
        debug!(
            target = "render::loop",
            frames = stats.frames,
            ticks = stats.ticks,
            abandoned = stats.abandoned,
            "render loop stopped"
        );
        stats
    }

    fn apply(&mut self, command: RenderCommand) -> ControlFlow<()> {
        trace!(target = "render::loop", ?command, "command");
        let effect = match command {
            RenderCommand::SurfaceAvailable(container) => {
                self.renderer.lifecycle_mut().on_available(container)
            }
            RenderCommand::SurfaceDestroyed => self.renderer.lifecycle_mut().on_destroyed(),
            RenderCommand::VisibleAreaChanged(area) => {
                self.renderer.lifecycle_mut().on_area_changed(area)
            }
            RenderCommand::Render(reason) => {
                self.renderer.render_once(reason);
                LifecycleEffect::None
            }
            RenderCommand::Shutdown => return ControlFlow::Break(()),
        };
        self.apply_effect(effect);
        ControlFlow::Continue(())
    }

    fn apply_effect(&mut self, effect: LifecycleEffect) {
        match effect {
            LifecycleEffect::StartTicker => {
                if self.ticker.is_none() {
                    let mut ticker = tokio::time::interval(self.period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.ticker = Some(ticker);
                    debug!(target = "render::loop", "ticker started");
                }
            }
            LifecycleEffect::StopTicker => {
                if self.ticker.take().is_some() {
                    debug!(target = "render::loop", "ticker stopped");
                }
            }
            LifecycleEffect::RenderNow => {
                self.renderer.render_once(RenderReason::AreaChanged);
            }
            LifecycleEffect::None => {}
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LineBuffer;
    use crate::render::font::TextLayout;
    use crate::surface::{RecordingSurface, SurfaceRecord};

    const PERIOD: Duration = Duration::from_millis(1000);

    fn spawn_loop(buffer: Arc<LineBuffer>) -> (DisplayHandle, JoinHandle<RenderStats>) {
        let renderer = Renderer::new(buffer, TextLayout::default());
        let (handle, commands) = render_channel();
        let task = RenderLoop::new(renderer, PERIOD, commands).spawn();
        (handle, task)
    }

    fn attach(handle: &DisplayHandle) -> SurfaceRecord {
        let (surface, record) = RecordingSurface::new();
        handle.on_surface_available(SurfaceContainer::new(Box::new(surface), 640, 480));
        record
    }

    // Let the render task drain its queue without moving the paused clock.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn attach_paints_immediately_then_once_per_period() {
        let buffer = Arc::new(LineBuffer::with_lines(200, ["a", "b"]));
        let (handle, task) = spawn_loop(buffer);
        let record = attach(&handle);

        settle().await;
        assert_eq!(record.frames_posted(), 1);

        for period in 1..=3 {
            tokio::time::advance(PERIOD).await;
            settle().await;
            assert_eq!(record.frames_posted(), 1 + period);
        }

        handle.shutdown();
        let stats = task.await.expect("render task");
        assert_eq!(stats.ticks, 4);
        assert_eq!(stats.frames, 4);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn reattaching_keeps_a_single_ticker() {
        let buffer = Arc::new(LineBuffer::new(200));
        let (handle, task) = spawn_loop(buffer);
        let first = attach(&handle);
        settle().await;
        let second = attach(&handle);
        settle().await;

        tokio::time::advance(PERIOD).await;
        settle().await;
        tokio::time::advance(PERIOD).await;
        settle().await;

        assert_eq!(first.frames_posted(), 1);
        assert_eq!(second.frames_posted(), 2);
        handle.shutdown();
        let stats = task.await.expect("render task");
        assert_eq!(stats.ticks, 3);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn detach_stops_the_ticker() {
        let buffer = Arc::new(LineBuffer::new(200));
        let (handle, task) = spawn_loop(buffer);
        let record = attach(&handle);
        settle().await;
        assert_eq!(record.frames_posted(), 1);

        handle.on_surface_destroyed();
        settle().await;
        tokio::time::advance(PERIOD * 5).await;
        settle().await;
        assert_eq!(record.frames_posted(), 1);

        handle.shutdown();
        let stats = task.await.expect("render task");
        assert_eq!(stats.ticks, 1);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn area_change_repaints_without_waiting_for_a_tick() {
        let buffer = Arc::new(LineBuffer::new(200));
        let (handle, task) = spawn_loop(buffer);
        let record = attach(&handle);
        settle().await;

        handle.on_visible_area_changed(Rect::new(0, 0, 640, 400));
        settle().await;
        assert_eq!(record.frames_posted(), 2);

        handle.shutdown();
        task.await.expect("render task");
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn new_data_renders_out_of_band() {
        let buffer = Arc::new(LineBuffer::new(200));
        let (handle, task) = spawn_loop(Arc::clone(&buffer));
        let record = attach(&handle);
        settle().await;

        buffer.append("fresh");
        assert!(handle.trigger().fire());
        settle().await;

        assert_eq!(record.frames_posted(), 2);
        assert_eq!(
            record.last_frame().expect("frame").lines(),
            vec!["fresh".to_string()]
        );

        handle.shutdown();
        task.await.expect("render task");
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn ticks_while_detached_are_not_scheduled() {
        let buffer = Arc::new(LineBuffer::new(200));
        let (handle, task) = spawn_loop(buffer);
        tokio::time::advance(PERIOD * 3).await;
        settle().await;
        handle.shutdown();
        let stats = task.await.expect("render task");
        assert_eq!(stats.ticks, 0);
        assert_eq!(stats.passes, 0);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn shutdown_drops_commands_queued_behind_it() {
        let renderer = Renderer::new(Arc::new(LineBuffer::new(200)), TextLayout::default());
        let (handle, commands) = render_channel();
        assert!(handle.request_render());
        assert!(handle.shutdown());
        assert!(handle.request_render());

        let stats = RenderLoop::new(renderer, PERIOD, commands).run().await;
        assert_eq!(stats.passes, 1);
        assert!(handle.is_closed());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn triggers_coalesce_until_dequeued() {
        let (handle, mut commands) = render_channel();
        let trigger = handle.trigger();

        assert!(trigger.fire());
        assert!(!trigger.fire());
        assert!(!trigger.clone().fire());

        assert!(matches!(
            commands.try_recv(),
            Some(RenderCommand::Render(RenderReason::NewData))
        ));
        assert!(commands.try_recv().is_none());

        assert!(trigger.fire());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn trigger_reports_a_closed_loop() {
        let (handle, commands) = render_channel();
        drop(commands);
        assert!(!handle.trigger().fire());
        assert!(!handle.request_render());
        assert!(handle.is_closed());
    }
}
