//! In-memory RGBA surface. Frames are rasterised with embedded-graphics into a back buffer and
//! copied to a shared front buffer on `post`, where hosts (and tests) can read them.

use super::Surface;
use crate::error::RenderError;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::Rgb888;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use image::{ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct Canvas {
    image: RgbaImage,
}

fn to_rgba(color: Rgb888) -> Rgba<u8> {
    Rgba([color.r(), color.g(), color.b(), u8::MAX])
}

impl OriginDimensions for Canvas {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }
}

impl DrawTarget for Canvas {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = self.image.dimensions();
        for Pixel(point, color) in pixels {
            if point.x < 0 || point.y < 0 {
                continue;
            }
            let (x, y) = (point.x as u32, point.y as u32);
            if x < width && y < height {
                self.image.put_pixel(x, y, to_rgba(color));
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let fill = to_rgba(color);
        for pixel in self.image.pixels_mut() {
            *pixel = fill;
        }
        Ok(())
    }
}

struct Shared {
    front: Mutex<RgbaImage>,
    valid: AtomicBool,
    frames: AtomicU64,
}

pub struct FrameBufferSurface {
    back: Canvas,
    shared: Arc<Shared>,
}

/// Host-side view of a [`FrameBufferSurface`]: reads published frames and can release the
/// surface out from under the renderer.
#[derive(Clone)]
pub struct FrameBufferHandle {
    shared: Arc<Shared>,
}

impl FrameBufferSurface {
    pub fn new(width: u32, height: u32) -> (Self, FrameBufferHandle) {
        let shared = Arc::new(Shared {
            front: Mutex::new(RgbaImage::new(width, height)),
            valid: AtomicBool::new(true),
            frames: AtomicU64::new(0),
        });
        let surface = Self {
            back: Canvas {
                image: RgbaImage::new(width, height),
            },
            shared: Arc::clone(&shared),
        };
        (surface, FrameBufferHandle { shared })
    }

    fn ensure_valid(&self) -> Result<(), RenderError> {
        if self.shared.valid.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RenderError::SurfaceLost)
        }
    }
}

impl Surface for FrameBufferSurface {
    fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Acquire)
    }

    fn clear(&mut self, color: Rgb888) -> Result<(), RenderError> {
        self.ensure_valid()?;
        self.back
            .clear(color)
            .map_err(|err| RenderError::Draw(err.to_string()))
    }

    fn draw_text(
        &mut self,
        text: &str,
        baseline: Point,
        style: &MonoTextStyle<'static, Rgb888>,
    ) -> Result<(), RenderError> {
        self.ensure_valid()?;
        Text::new(text, baseline, *style)
            .draw(&mut self.back)
            .map(|_| ())
            .map_err(|err| RenderError::Draw(err.to_string()))
    }

    fn post(&mut self) -> Result<(), RenderError> {
        self.ensure_valid()?;
        self.shared.front.lock().clone_from(&self.back.image);
        self.shared.frames.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl FrameBufferHandle {
    /// Copy of the last published frame (transparent black before the first post).
    pub fn snapshot(&self) -> RgbaImage {
        self.shared.front.lock().clone()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let front = self.shared.front.lock();
        if x < front.width() && y < front.height() {
            Some(front.get_pixel(x, y).0)
        } else {
            None
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.shared.front.lock().dimensions()
    }

    pub fn frames_published(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        self.shared.valid.load(Ordering::Acquire)
    }

    /// Release the surface; subsequent draws fail with [`RenderError::SurfaceLost`].
    pub fn invalidate(&self) {
        self.shared.valid.store(false, Ordering::Release);
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.snapshot()
            .save_with_format(path.as_ref(), ImageFormat::Png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::mono_font::ascii::FONT_9X15;

    const WHITE: [u8; 4] = [255, 255, 255, 255];
    const BLACK: [u8; 4] = [0, 0, 0, 255];

    fn lit_pixels_in(handle: &FrameBufferHandle, x0: u32, y0: u32, x1: u32, y1: u32) -> usize {
        let frame = handle.snapshot();
        let mut count = 0;
        for y in y0..y1.min(frame.height()) {
            for x in x0..x1.min(frame.width()) {
                if frame.get_pixel(x, y).0 == WHITE {
                    count += 1;
                }
            }
        }
        count
    }

    #[test_timeout::timeout]
    fn nothing_published_until_post() {
        let (mut surface, handle) = FrameBufferSurface::new(32, 16);
        surface.clear(Rgb888::BLACK).expect("clear");
        assert_eq!(handle.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(handle.frames_published(), 0);

        surface.post().expect("post");
        assert_eq!(handle.pixel(0, 0), Some(BLACK));
        assert_eq!(handle.frames_published(), 1);
    }

    #[test_timeout::timeout]
    fn text_lands_inside_its_cell() {
        let (mut surface, handle) = FrameBufferSurface::new(64, 32);
        let style = MonoTextStyle::new(&FONT_9X15, Rgb888::WHITE);
        surface.clear(Rgb888::BLACK).expect("clear");
        // Baseline 20 with a 9x15 font (baseline 11): cell spans y 9..24, x 4..13.
        surface
            .draw_text("W", Point::new(4, 20), &style)
            .expect("draw");
        surface.post().expect("post");

        assert!(lit_pixels_in(&handle, 4, 9, 13, 24) > 0);
        assert_eq!(lit_pixels_in(&handle, 0, 0, 64, 9), 0);
        assert_eq!(lit_pixels_in(&handle, 13, 0, 64, 32), 0);
        assert_eq!(lit_pixels_in(&handle, 0, 24, 64, 32), 0);
    }

    #[test_timeout::timeout]
    fn text_past_the_edges_is_clipped_silently() {
        let (mut surface, handle) = FrameBufferSurface::new(10, 10);
        let style = MonoTextStyle::new(&FONT_9X15, Rgb888::WHITE);
        surface.clear(Rgb888::BLACK).expect("clear");
        surface
            .draw_text("overflowing text", Point::new(-4, 5), &style)
            .expect("draw clipped");
        surface.post().expect("post");
        assert_eq!(handle.dimensions(), (10, 10));
    }

    #[test_timeout::timeout]
    fn invalidated_surface_rejects_drawing() {
        let (mut surface, handle) = FrameBufferSurface::new(16, 16);
        let style = MonoTextStyle::new(&FONT_9X15, Rgb888::WHITE);
        handle.invalidate();
        assert!(!surface.is_valid());
        assert!(matches!(
            surface.clear(Rgb888::BLACK),
            Err(RenderError::SurfaceLost)
        ));
        assert!(matches!(
            surface.draw_text("x", Point::new(0, 11), &style),
            Err(RenderError::SurfaceLost)
        ));
        assert!(matches!(surface.post(), Err(RenderError::SurfaceLost)));
        assert_eq!(handle.frames_published(), 0);
    }
}
