pub mod font;
pub mod scheduler;

use crate::buffer::{Line, LineBuffer};
use crate::error::RenderError;
use crate::surface::{Surface, SurfaceLifecycle};
use embedded_graphics::prelude::Point;
use font::{fit_to_columns, TextLayout};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{trace, warn};

pub use scheduler::{
    render_channel, DisplayHandle, RenderCommand, RenderCommands, RenderLoop, RenderTrigger,
};

/// Why a render pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderReason {
    Tick,
    NewData,
    AreaChanged,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Detached,
    InvalidSurface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Skipped(SkipReason),
    /// Frame published with `lines` rows drawn.
    Drawn { lines: usize },
    /// The surface failed mid-frame; nothing was published.
    Abandoned,
}

/// Render-side counters. Diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub ticks: u64,
    pub passes: u64,
    pub frames: u64,
    pub skipped: u64,
    pub abandoned: u64,
    pub last_rendered_at: Option<Instant>,
}

/// Paints the buffer onto whichever surface the lifecycle currently holds.
///
/// Owned by the render loop; every pass runs to completion (or abandonment) before the next
/// command is looked at, so passes never overlap on a surface.
pub struct Renderer {
    buffer: Arc<LineBuffer>,
    lifecycle: SurfaceLifecycle,
    layout: TextLayout,
    stats: RenderStats,
}

impl Renderer {
    pub fn new(buffer: Arc<LineBuffer>, layout: TextLayout) -> Self {
        Self {
            buffer,
            lifecycle: SurfaceLifecycle::new(),
            layout,
            stats: RenderStats::default(),
        }
    }

    pub fn layout(&self) -> &TextLayout {
        &self.layout
    }

    pub fn lifecycle(&self) -> &SurfaceLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut SurfaceLifecycle {
        &mut self.lifecycle
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn render_once(&mut self, reason: RenderReason) -> RenderOutcome {
        if reason == RenderReason::Tick {
            self.stats.ticks += 1;
        }
        self.stats.passes += 1;

        let Some((surface, width, height)) = self.lifecycle.current() else {
            self.stats.skipped += 1;
            trace!(target = "render", ?reason, "no surface attached");
            return RenderOutcome::Skipped(SkipReason::Detached);
        };
        if !surface.is_valid() {
            self.stats.skipped += 1;
            trace!(target = "render", ?reason, "surface no longer valid");
            return RenderOutcome::Skipped(SkipReason::InvalidSurface);
        }

        let lines = self.buffer.snapshot();
        match paint(surface, &self.layout, &lines, width, height) {
            Ok(drawn) => {
                self.stats.frames += 1;
                self.stats.last_rendered_at = Some(Instant::now());
                trace!(
                    target = "render",
                    ?reason,
                    drawn,
                    buffered = lines.len(),
                    "frame published"
                );
                RenderOutcome::Drawn { lines: drawn }
            }
            Err(err) => {
                surface.discard();
                self.stats.abandoned += 1;
                warn!(target = "render", ?reason, error = %err, "render pass abandoned");
                RenderOutcome::Abandoned
            }
        }
    }
}

/// Clear, draw newest-to-oldest from the bottom margin upward, publish.
fn paint(
    surface: &mut dyn Surface,
    layout: &TextLayout,
    lines: &[Line],
    width: u32,
    height: u32,
) -> Result<usize, RenderError> {
    let metrics = layout.metrics();
    let style = layout.text_style();
    let columns = layout.columns(width);

    surface.clear(layout.background)?;

    let mut baseline = layout.first_baseline(height);
    let mut drawn = 0;
    for line in lines.iter().rev() {
        if !layout.row_fits(baseline) {
            break;
        }
        let text = fit_to_columns(line, columns);
        if !text.is_empty() {
            surface.draw_text(&text, Point::new(layout.left_margin, baseline), &style)?;
        }
        drawn += 1;
        baseline -= metrics.line_height;
    }

    surface.post()?;
    Ok(drawn)
}
