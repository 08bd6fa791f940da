//! TCP ingestion: an accept loop that hands every client to its own reader task.

pub mod connection;

use crate::buffer::LineBuffer;
use crate::error::ListenerError;
use crate::render::RenderTrigger;
use connection::ConnectionContext;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use connection::handle_connection;

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub bind_host: IpAddr,
    /// Clients served concurrently; further clients wait in the accept backlog.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

struct ActiveListener {
    local_addr: SocketAddr,
    running: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// Accepts TCP clients and feeds their lines into the shared [`LineBuffer`].
///
/// `start`/`stop` are serialised; `stop` returns once the listening socket is closed, so the
/// same port can be bound again straight away. Client tasks already running are not cut off
/// by `stop` and finish when their peer disconnects.
pub struct Listener {
    config: ListenerConfig,
    context: ConnectionContext,
    permits: Arc<Semaphore>,
    active: Mutex<Option<ActiveListener>>,
}

impl Listener {
    pub fn new(config: ListenerConfig, buffer: Arc<LineBuffer>, trigger: RenderTrigger) -> Self {
        let max_connections = config.max_connections.max(1);
        Self {
            config,
            context: ConnectionContext { buffer, trigger },
            permits: Arc::new(Semaphore::new(max_connections)),
            active: Mutex::new(None),
        }
    }

    /// Bind `port` on the configured host and start accepting. Port 0 picks an ephemeral port.
    /// Calling `start` while already running returns the existing address.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, ListenerError> {
        let mut active = self.active.lock().await;
        if let Some(existing) = active.as_ref() {
            debug!(target = "net::listener", addr = %existing.local_addr, "listener already running");
            return Ok(existing.local_addr);
        }

        let addr = SocketAddr::new(self.config.bind_host, port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let (running, stop_rx) = watch::channel(true);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            stop_rx,
            self.context.clone(),
            Arc::clone(&self.permits),
        ));

        info!(target = "net::listener", addr = %local_addr, "listening");
        *active = Some(ActiveListener {
            local_addr,
            running,
            accept_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting and close the listening socket. A no-op when not running.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(listener) = active.take() else {
            return;
        };
        let _ = listener.running.send(false);
        if let Err(err) = listener.accept_task.await {
            warn!(target = "net::listener", error = %err, "accept task ended abnormally");
        }
        info!(target = "net::listener", addr = %listener.local_addr, "listener stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|listener| listener.local_addr)
    }

    pub fn active_connections(&self) -> usize {
        self.config
            .max_connections
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }
}

/// Source of incoming client streams for [`accept_loop`].
pub(crate) trait Accept: Send + 'static {
    type Stream: AsyncRead + Unpin + Send + 'static;

    fn accept(
        &mut self,
    ) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send + '_;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    fn accept(
        &mut self,
    ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send + '_ {
        TcpListener::accept(self)
    }
}

async fn accept_loop<A: Accept>(
    mut listener: A,
    mut running: watch::Receiver<bool>,
    context: ConnectionContext,
    permits: Arc<Semaphore>,
) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = stopped(&mut running) => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            biased;
            _ = stopped(&mut running) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                info!(target = "net::connection", %peer, "client connected");
                let context = context.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    connection::serve(stream, peer, context).await;
                });
            }
            Err(err) => {
                let err = ListenerError::Accept(err);
                warn!(target = "net::listener", error = %err, "accept failed; retrying");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!(target = "net::listener", "accept loop exited");
}

// Resolves once the running flag drops to false or the listener handle is gone.
async fn stopped(running: &mut watch::Receiver<bool>) {
    let _ = running.wait_for(|running| !*running).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::render_channel;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    fn loopback() -> ListenerConfig {
        ListenerConfig {
            bind_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    fn listener_with(config: ListenerConfig) -> (Listener, Arc<LineBuffer>) {
        let buffer = Arc::new(LineBuffer::new(64));
        let (handle, _commands) = render_channel();
        (
            Listener::new(config, Arc::clone(&buffer), handle.trigger()),
            buffer,
        )
    }

    async fn wait_for_lines(buffer: &LineBuffer, count: usize) {
        while buffer.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn start_is_idempotent() {
        let (listener, _) = listener_with(loopback());
        let first = listener.start(0).await.expect("start");
        let second = listener.start(0).await.expect("second start");
        assert_eq!(first, second);
        assert!(listener.is_running().await);
        listener.stop().await;
        assert!(!listener.is_running().await);
        assert_eq!(listener.local_addr().await, None);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn stop_then_start_rebinds_the_same_port() {
        let (listener, _) = listener_with(loopback());
        let addr = listener.start(0).await.expect("start");
        listener.stop().await;
        let again = listener.start(addr.port()).await.expect("restart on same port");
        assert_eq!(again.port(), addr.port());
        listener.stop().await;
        listener.stop().await;
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind");
        let port = taken.local_addr().expect("addr").port();

        let (listener, _) = listener_with(loopback());
        let err = listener.start(port).await.expect_err("port is taken");
        assert!(matches!(err, ListenerError::Bind { addr, .. } if addr.port() == port));
        assert!(!listener.is_running().await);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn clients_are_served_concurrently() {
        let (listener, buffer) = listener_with(loopback());
        let addr = listener.start(0).await.expect("start");

        let mut first = TcpStream::connect(addr).await.expect("connect");
        let mut second = TcpStream::connect(addr).await.expect("connect");
        second.write_all(b"from second\n").await.expect("write");
        wait_for_lines(&buffer, 1).await;
        first.write_all(b"from first\n").await.expect("write");
        wait_for_lines(&buffer, 2).await;

        assert_eq!(buffer.snapshot(), vec!["from second", "from first"]);
        listener.stop().await;
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn connections_beyond_the_limit_wait_for_a_slot() {
        let (listener, buffer) = listener_with(ListenerConfig {
            max_connections: 1,
            ..loopback()
        });
        let addr = listener.start(0).await.expect("start");

        let mut holder = TcpStream::connect(addr).await.expect("connect");
        holder.write_all(b"holder\n").await.expect("write");
        wait_for_lines(&buffer, 1).await;
        assert_eq!(listener.active_connections(), 1);

        let mut waiting = TcpStream::connect(addr).await.expect("connect");
        waiting.write_all(b"waiting\n").await.expect("write");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(buffer.snapshot(), vec!["holder"]);

        drop(holder);
        wait_for_lines(&buffer, 2).await;
        assert_eq!(buffer.snapshot(), vec!["holder", "waiting"]);
        listener.stop().await;
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn stop_leaves_existing_clients_connected() {
        let (listener, buffer) = listener_with(loopback());
        let addr = listener.start(0).await.expect("start");

        let mut client = TcpStream::connect(addr).await.expect("connect");
        client.write_all(b"before\n").await.expect("write");
        wait_for_lines(&buffer, 1).await;

        listener.stop().await;
        client.write_all(b"after\n").await.expect("write");
        wait_for_lines(&buffer, 2).await;
        assert_eq!(buffer.snapshot(), vec!["before", "after"]);
        assert!(TcpStream::connect(addr).await.is_err());
    }

    /// Hands out whatever the test queues, then waits forever.
    struct QueuedAccept(mpsc::UnboundedReceiver<io::Result<(DuplexStream, SocketAddr)>>);

    impl Accept for QueuedAccept {
        type Stream = DuplexStream;

        fn accept(
            &mut self,
        ) -> impl Future<Output = io::Result<(DuplexStream, SocketAddr)>> + Send + '_ {
            async move {
                match self.0.recv().await {
                    Some(accepted) => accepted,
                    None => std::future::pending().await,
                }
            }
        }
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn accept_errors_back_off_and_keep_accepting() {
        let buffer = Arc::new(LineBuffer::new(16));
        let (handle, _commands) = render_channel();
        let context = ConnectionContext {
            buffer: Arc::clone(&buffer),
            trigger: handle.trigger(),
        };
        let (queue, incoming) = mpsc::unbounded_channel();
        let (running, stop_rx) = watch::channel(true);
        // A single slot: the stream is only served if the failed accept gave its permit back.
        let permits = Arc::new(Semaphore::new(1));
        let task = tokio::spawn(accept_loop(
            QueuedAccept(incoming),
            stop_rx,
            context,
            Arc::clone(&permits),
        ));

        queue
            .send(Err(io::Error::from(io::ErrorKind::ConnectionAborted)))
            .expect("queue error");
        let (mut client, server) = tokio::io::duplex(64);
        queue
            .send(Ok((server, SocketAddr::from(([127, 0, 0, 1], 40001)))))
            .expect("queue stream");
        client.write_all(b"still accepting\n").await.expect("write");
        drop(client);

        wait_for_lines(&buffer, 1).await;
        assert_eq!(buffer.snapshot(), vec!["still accepting"]);

        running.send(false).expect("stop");
        task.await.expect("accept loop");
    }
}
