//! Host-owned render surfaces and the attach/detach state machine.
//!
//! The host never hands out a surface permanently: it announces one with
//! [`SurfaceCallback::on_surface_available`] and may take it back at any time with
//! [`SurfaceCallback::on_surface_destroyed`]. [`SurfaceLifecycle`] tracks which surface (if
//! any) is current and tells the render loop what each transition implies for the ticker.

pub mod framebuffer;
pub mod recording;

use crate::error::RenderError;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::Point;
use std::fmt;
use tracing::{debug, info, trace};

pub use framebuffer::{FrameBufferHandle, FrameBufferSurface};
pub use recording::{DrawOp, RecordedFrame, RecordingSurface, SurfaceRecord};

/// Drawing capability of a host surface.
///
/// A frame is `clear`, any number of `draw_text`, then `post`. If any step fails the renderer
/// calls `discard` instead of `post`. Implementations must report `is_valid() == false` once the
/// host has released the underlying target; draws after that should fail with
/// [`RenderError::SurfaceLost`].
pub trait Surface: Send {
    fn is_valid(&self) -> bool;

    fn clear(&mut self, color: Rgb888) -> Result<(), RenderError>;

    /// Draw `text` with its alphabetic baseline starting at `baseline`.
    fn draw_text(
        &mut self,
        text: &str,
        baseline: Point,
        style: &MonoTextStyle<'static, Rgb888>,
    ) -> Result<(), RenderError>;

    /// Publish the frame drawn since the last `clear`.
    fn post(&mut self) -> Result<(), RenderError>;

    /// Drop a partially drawn frame.
    fn discard(&mut self) {}
}

/// A surface together with its size in device pixels, as announced by the host.
pub struct SurfaceContainer {
    pub surface: Box<dyn Surface>,
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl SurfaceContainer {
    pub fn new(surface: Box<dyn Surface>, width: u32, height: u32) -> Self {
        Self {
            surface,
            width,
            height,
            dpi: 0,
        }
    }

    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = dpi;
        self
    }
}

impl fmt::Debug for SurfaceContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceContainer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("dpi", &self.dpi)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

/// Host-to-display surface events. Only the first three matter to the display; the gesture
/// and stable-area callbacks exist so hosts can forward everything they receive.
pub trait SurfaceCallback: Send + Sync {
    fn on_surface_available(&self, container: SurfaceContainer);

    fn on_surface_destroyed(&self);

    fn on_visible_area_changed(&self, visible_area: Rect);

    fn on_stable_area_changed(&self, _stable_area: Rect) {}

    fn on_scroll(&self, _distance_x: f32, _distance_y: f32) {}

    fn on_scale(&self, _focus_x: f32, _focus_y: f32, _scale_factor: f32) {}

    fn on_fling(&self, _velocity_x: f32, _velocity_y: f32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceState {
    #[default]
    Detached,
    Attached {
        width: u32,
        height: u32,
    },
}

/// What the render loop should do after a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    None,
    StartTicker,
    StopTicker,
    RenderNow,
}

#[derive(Default)]
pub struct SurfaceLifecycle {
    state: SurfaceState,
    surface: Option<Box<dyn Surface>>,
}

impl SurfaceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.state, SurfaceState::Attached { .. })
    }

    /// Attach (or re-attach with new dimensions). A previously attached surface is dropped.
    pub fn on_available(&mut self, container: SurfaceContainer) -> LifecycleEffect {
        let SurfaceContainer {
            surface,
            width,
            height,
            dpi,
        } = container;
        if let SurfaceState::Attached {
            width: old_width,
            height: old_height,
        } = self.state
        {
            debug!(
                target = "surface",
                old_width, old_height, width, height, "replacing attached surface"
            );
        }
        info!(target = "surface", width, height, dpi, "surface available");
        self.state = SurfaceState::Attached { width, height };
        self.surface = Some(surface);
        LifecycleEffect::StartTicker
    }

    pub fn on_destroyed(&mut self) -> LifecycleEffect {
        match self.state {
            SurfaceState::Attached { .. } => {
                info!(target = "surface", "surface destroyed");
                self.state = SurfaceState::Detached;
                self.surface = None;
                LifecycleEffect::StopTicker
            }
            SurfaceState::Detached => {
                trace!(target = "surface", "destroy while detached ignored");
                LifecycleEffect::None
            }
        }
    }

    pub fn on_area_changed(&mut self, visible_area: Rect) -> LifecycleEffect {
        match self.state {
            SurfaceState::Attached { .. } => {
                trace!(target = "surface", ?visible_area, "visible area changed");
                LifecycleEffect::RenderNow
            }
            SurfaceState::Detached => LifecycleEffect::None,
        }
    }

    /// The attached surface and its dimensions, if any.
    pub(crate) fn current(&mut self) -> Option<(&mut (dyn Surface + 'static), u32, u32)> {
        match (self.state, self.surface.as_deref_mut()) {
            (SurfaceState::Attached { width, height }, Some(surface)) => {
                Some((surface, width, height))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for SurfaceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceLifecycle")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
