//! The display component graph: one line buffer, one render loop, one listener.

use crate::buffer::LineBuffer;
use crate::config::DisplayConfig;
use crate::error::DisplayError;
use crate::net::Listener;
use crate::render::font::TextLayout;
use crate::render::{render_channel, DisplayHandle, RenderLoop, RenderStats, Renderer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Lines shown before any client has sent anything.
pub fn banner_lines(port: u16) -> [String; 3] {
    [
        format!("DASHTERM - LISTENING ON PORT {port}"),
        format!("Type 'nc localhost {port}' to send lines"),
        "-".repeat(55),
    ]
}

/// Owns the buffer, the listener and the render loop task. Built once per process with
/// [`Display::spawn`]; the host talks to it through [`Display::surface_callback`].
pub struct Display {
    config: DisplayConfig,
    buffer: Arc<LineBuffer>,
    listener: Listener,
    handle: DisplayHandle,
    render_task: JoinHandle<RenderStats>,
}

impl Display {
    /// Build the graph and start the render loop. Must be called inside a tokio runtime.
    /// The listener is not started until [`Display::start`].
    pub fn spawn(config: DisplayConfig) -> Self {
        let buffer = Arc::new(if config.banner {
            LineBuffer::with_lines(config.capacity, banner_lines(config.port))
        } else {
            LineBuffer::new(config.capacity)
        });

        let renderer = Renderer::new(
            Arc::clone(&buffer),
            TextLayout::for_font_size(config.font_size),
        );
        let (handle, commands) = render_channel();
        let render_task = RenderLoop::new(renderer, config.refresh_interval, commands).spawn();

        let listener = Listener::new(
            config.listener_config(),
            Arc::clone(&buffer),
            handle.trigger(),
        );

        Self {
            config,
            buffer,
            listener,
            handle,
            render_task,
        }
    }

    /// Start accepting clients on the configured port. A bind failure leaves the display
    /// running without a listener.
    pub async fn start(&self) -> Result<SocketAddr, DisplayError> {
        match self.listener.start(self.config.port).await {
            Ok(addr) => {
                info!(target = "net::listener", %addr, "display accepting clients");
                Ok(addr)
            }
            Err(err) => {
                error!(target = "net::listener", error = %err, "listener failed to start");
                Err(err.into())
            }
        }
    }

    /// Stop accepting new clients. Connected clients keep streaming.
    pub async fn stop_listening(&self) {
        self.listener.stop().await;
    }

    pub fn surface_callback(&self) -> DisplayHandle {
        self.handle.clone()
    }

    pub fn buffer(&self) -> &Arc<LineBuffer> {
        &self.buffer
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Stop the listener and the render loop; returns the loop's final counters.
    pub async fn shutdown(self) -> Result<RenderStats, DisplayError> {
        self.listener.stop().await;
        self.handle.shutdown();
        let stats = self
            .render_task
            .await
            .map_err(|_| DisplayError::RenderLoopClosed)?;
        info!(
            target = "render::loop",
            frames = stats.frames,
            abandoned = stats.abandoned,
            lines = self.buffer.total_appended(),
            "display shut down"
        );
        Ok(stats)
    }
}
