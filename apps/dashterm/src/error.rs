use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("read from {peer} failed: {source}")]
    Read {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Failures while painting a frame. The current frame is abandoned and the next pass starts
/// from scratch; these never leave the render loop.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("surface was released mid-frame")]
    SurfaceLost,
    #[error("drawing failed: {0}")]
    Draw(String),
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("render loop is no longer running")]
    RenderLoopClosed,
}
