//! Socket plumbing for one accepted client.
//!
//! The reader half feeds lines to the [`Dispatcher`]; a separate writer
//! task drains the connection's bounded line queue with a per-write
//! timeout. A write timeout or a closed socket ends both halves, and the
//! session is unregistered on the way out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_types::{ErrorCode, ServerMessage};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatcher::{Connection, Dispatcher};

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Capacity of the outbound line queue.
    pub queue_capacity: usize,
    /// Longest time one socket write may take.
    pub write_timeout: Duration,
    /// Longest accepted inbound line, in bytes.
    pub max_line_bytes: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_timeout: Duration::from_secs(5),
            max_line_bytes: 65_536,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(String),
    TooLong,
    Eof,
}

/// Serve one client until it disconnects.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    settings: ConnectionSettings,
) {
    info!(%peer, "Client connected");
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);

    let (tx, rx) = mpsc::channel::<String>(settings.queue_capacity.max(1));
    let writer_task = tokio::spawn(writer_loop(peer, writer_half, rx, settings.write_timeout));

    let mut conn = Connection::new(tx);
    if conn.send(&dispatcher.welcome(None, None)).await {
        loop {
            let read = tokio::select! {
                read = read_line(&mut reader, settings.max_line_bytes) => read,
                () = conn.sender().closed() => {
                    debug!(%peer, "Writer gone, closing connection");
                    break;
                }
            };
            let open = match read {
                Ok(LineRead::Line(line)) => dispatcher.handle_line(&mut conn, &line).await,
                Ok(LineRead::TooLong) => {
                    warn!(%peer, limit = settings.max_line_bytes, "Line too long");
                    let reply = ServerMessage::error(
                        None,
                        ErrorCode::LineTooLong,
                        format!("line exceeds {} bytes", settings.max_line_bytes),
                    );
                    conn.send(&reply).await
                }
                Ok(LineRead::Eof) => break,
                Err(err) => {
                    debug!(%peer, error = %err, "Read failed");
                    break;
                }
            };
            if !open {
                break;
            }
        }
    }

    dispatcher.disconnect(&mut conn).await;
    drop(conn);
    if let Err(err) = writer_task.await {
        debug!(%peer, error = %err, "Writer task ended abnormally");
    }
    info!(%peer, "Client disconnected");
}

async fn writer_loop(
    peer: SocketAddr,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
    write_timeout: Duration,
) {
    while let Some(line) = rx.recv().await {
        let send = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(%peer, error = %err, "Write failed");
                break;
            }
            Err(_) => {
                warn!(%peer, "Write timed out, dropping client");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Read one newline-terminated line of at most `max_bytes` bytes
/// (newline excluded). An over-long line is consumed up to its newline
/// and reported as [`LineRead::TooLong`].
async fn read_line<R>(reader: &mut BufReader<R>, max_bytes: usize) -> std::io::Result<LineRead>
where
    R: AsyncRead + Unpin,
{
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut buf = Vec::new();
    let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max_bytes {
        discard_until_newline(reader).await?;
        return Ok(LineRead::TooLong);
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(LineRead::Line(String::from_utf8_lossy(&buf).into_owned()))
}

async fn discard_until_newline<R>(reader: &mut BufReader<R>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut scratch = Vec::with_capacity(4_096);
    loop {
        scratch.clear();
        let n = (&mut *reader).take(4_096).read_until(b'\n', &mut scratch).await?;
        if n == 0 || scratch.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    async fn lines(input: &'static [u8], max: usize) -> Vec<LineRead> {
        let mut reader = BufReader::new(input);
        let mut out = Vec::new();
        loop {
            let read = read_line(&mut reader, max).await.unwrap();
            let done = read == LineRead::Eof;
            out.push(read);
            if done {
                return out;
            }
        }
    }

    #[tokio::test]
    async fn splits_on_newlines_and_strips_cr() {
        let out = lines(b"{\"a\":1}\r\n\n{\"b\":2}", 64).await;
        assert_eq!(
            out,
            vec![
                LineRead::Line(String::from("{\"a\":1}")),
                LineRead::Line(String::new()),
                LineRead::Line(String::from("{\"b\":2}")),
                LineRead::Eof,
            ]
        );
    }

    #[tokio::test]
    async fn over_long_line_is_skipped_whole() {
        let out = lines(b"0123456789abcdef\nok\n", 8).await;
        assert_eq!(
            out,
            vec![
                LineRead::TooLong,
                LineRead::Line(String::from("ok")),
                LineRead::Eof
            ]
        );
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let out = lines(b"12345678\n", 8).await;
        assert_eq!(out[0], LineRead::Line(String::from("12345678")));
    }
}
