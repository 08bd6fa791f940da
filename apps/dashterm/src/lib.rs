//! Rolling text display: newline-delimited text arrives over TCP, the most recent lines are
//! kept in a bounded buffer, and a render loop paints them bottom-up onto whatever pixel
//! surface the host currently provides.

pub mod buffer;
pub mod config;
pub mod display;
pub mod error;
pub mod net;
pub mod render;
pub mod surface;
pub mod telemetry;

pub use buffer::{Line, LineBuffer};
pub use config::DisplayConfig;
pub use display::Display;
pub use render::{DisplayHandle, RenderOutcome, RenderStats};
pub use surface::{Surface, SurfaceCallback, SurfaceContainer};
