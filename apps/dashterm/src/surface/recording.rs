//! A surface that records draw calls instead of rasterising them. Used to assert layout
//! (which lines were drawn, at which baseline) without decoding pixels.

use super::Surface;
use crate::error::RenderError;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::Point;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    Clear(Rgb888),
    Text { text: String, baseline: Point },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedFrame {
    pub ops: Vec<DrawOp>,
}

impl RecordedFrame {
    /// Text draws in call order (newest line first).
    pub fn texts(&self) -> Vec<(String, Point)> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, baseline } => Some((text.clone(), *baseline)),
                DrawOp::Clear(_) => None,
            })
            .collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.texts().into_iter().map(|(text, _)| text).collect()
    }
}

#[derive(Debug)]
struct Recording {
    valid: bool,
    posted: Vec<RecordedFrame>,
    discarded: usize,
    /// Invalidate the surface once this many more text draws have succeeded.
    lose_after_draws: Option<usize>,
}

pub struct RecordingSurface {
    pending: RecordedFrame,
    shared: Arc<Mutex<Recording>>,
}

/// Test-side view of a [`RecordingSurface`].
#[derive(Clone)]
pub struct SurfaceRecord {
    shared: Arc<Mutex<Recording>>,
}

impl RecordingSurface {
    pub fn new() -> (Self, SurfaceRecord) {
        let shared = Arc::new(Mutex::new(Recording {
            valid: true,
            posted: Vec::new(),
            discarded: 0,
            lose_after_draws: None,
        }));
        (
            Self {
                pending: RecordedFrame::default(),
                shared: Arc::clone(&shared),
            },
            SurfaceRecord { shared },
        )
    }
}

impl Surface for RecordingSurface {
    fn is_valid(&self) -> bool {
        self.shared.lock().valid
    }

    fn clear(&mut self, color: Rgb888) -> Result<(), RenderError> {
        if !self.shared.lock().valid {
            return Err(RenderError::SurfaceLost);
        }
        self.pending = RecordedFrame::default();
        self.pending.ops.push(DrawOp::Clear(color));
        Ok(())
    }

    fn draw_text(
        &mut self,
        text: &str,
        baseline: Point,
        _style: &MonoTextStyle<'static, Rgb888>,
    ) -> Result<(), RenderError> {
        let mut shared = self.shared.lock();
        if let Some(remaining) = shared.lose_after_draws {
            if remaining == 0 {
                shared.valid = false;
                shared.lose_after_draws = None;
            } else {
                shared.lose_after_draws = Some(remaining - 1);
            }
        }
        if !shared.valid {
            return Err(RenderError::SurfaceLost);
        }
        self.pending.ops.push(DrawOp::Text {
            text: text.to_string(),
            baseline,
        });
        Ok(())
    }

    fn post(&mut self) -> Result<(), RenderError> {
        let mut shared = self.shared.lock();
        if !shared.valid {
            return Err(RenderError::SurfaceLost);
        }
        shared.posted.push(std::mem::take(&mut self.pending));
        Ok(())
    }

    fn discard(&mut self) {
        self.pending = RecordedFrame::default();
        self.shared.lock().discarded += 1;
    }
}

impl SurfaceRecord {
    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.shared.lock().posted.clone()
    }

    pub fn frames_posted(&self) -> usize {
        self.shared.lock().posted.len()
    }

    pub fn last_frame(&self) -> Option<RecordedFrame> {
        self.shared.lock().posted.last().cloned()
    }

    pub fn discarded(&self) -> usize {
        self.shared.lock().discarded
    }

    pub fn invalidate(&self) {
        self.shared.lock().valid = false;
    }

    /// Let `draws` more text draws succeed, then release the surface mid-frame.
    pub fn lose_after(&self, draws: usize) {
        self.shared.lock().lose_after_draws = Some(draws);
    }
}
