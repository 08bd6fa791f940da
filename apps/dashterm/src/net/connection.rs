use crate::buffer::LineBuffer;
use crate::error::ConnectionError;
use crate::render::RenderTrigger;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

const READ_BUFFER: usize = 8 * 1024;

/// Longest line kept in one piece. Longer input is split into consecutive lines of at most
/// this many bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// What a connection task needs from the display.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    pub buffer: Arc<LineBuffer>,
    pub trigger: RenderTrigger,
}

/// Read line-delimited text from `stream` until EOF or a read error, appending each line
/// to `buffer` and firing `trigger` after every append.
///
/// A line ends at `\n`, `\r\n` or a lone `\r`; terminators are stripped and invalid UTF-8 is
/// replaced with U+FFFD. Lines longer than [`MAX_LINE_BYTES`] are split. An unterminated
/// fragment before EOF is kept as a final line. Returns the number of lines appended. The
/// stream is dropped (closed) on return either way.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    buffer: &LineBuffer,
    trigger: &RenderTrigger,
) -> Result<usize, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(stream, MAX_LINE_BYTES);
    let mut raw = Vec::with_capacity(256);
    let mut appended = 0;
    loop {
        let more = lines
            .next_line(&mut raw)
            .await
            .map_err(|source| ConnectionError::Read { peer, source })?;
        if !more {
            return Ok(appended);
        }
        buffer.append(String::from_utf8_lossy(&raw).into_owned());
        trigger.fire();
        appended += 1;
    }
}

pub(crate) async fn serve<S>(stream: S, peer: SocketAddr, context: ConnectionContext)
where
    S: AsyncRead + Unpin,
{
    match handle_connection(stream, peer, &context.buffer, &context.trigger).await {
        Ok(lines) => debug!(target = "net::connection", %peer, lines, "client disconnected"),
        Err(err) => debug!(target = "net::connection", %peer, error = %err, "client dropped"),
    }
}

/// Splits a byte stream into lines without ever buffering more than `max_line` bytes of one.
struct LineReader<R> {
    inner: BufReader<R>,
    max_line: usize,
    /// The previous line ended at `\r`; a `\n` right after it belongs to that terminator.
    skip_lf: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(stream: R, max_line: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER, stream),
            max_line: max_line.max(1),
            skip_lf: false,
        }
    }

    /// Fill `line` with the next line, terminator stripped. `Ok(false)` means EOF with nothing
    /// left to return.
    async fn next_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        line.clear();
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(!line.is_empty());
            }

            let mut start = 0;
            if std::mem::take(&mut self.skip_lf) && available[0] == b'\n' {
                start = 1;
            }
            let window = &available[start..];
            let room = self.max_line - line.len();
            let terminator = window
                .iter()
                .take(room + 1)
                .position(|&byte| byte == b'\n' || byte == b'\r');

            match terminator {
                Some(at) => {
                    self.skip_lf = window[at] == b'\r';
                    line.extend_from_slice(&window[..at]);
                    self.inner.consume(start + at + 1);
                    return Ok(true);
                }
                None => {
                    let taken = window.len().min(room);
                    line.extend_from_slice(&window[..taken]);
                    self.inner.consume(start + taken);
                    if line.len() >= self.max_line {
                        return Ok(true);
                    }
                }
            }
        }
    }
}
