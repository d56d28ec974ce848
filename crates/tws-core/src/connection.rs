//! Duplex transport adapter for byte streams.
//!
//! Each envelope travels as one length-prefixed frame:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! [`Connection::attach`] binds a stream to a [`ProtocolEngine`]: a writer task
//! drains the engine's outbound channel into frames, and a reader loop hands
//! every inbound frame to `process_inbound` in its own task. When the stream
//! ends the engine's channel is closed, which fails outstanding calls at once.

use crate::config::TransportConfig;
use crate::engine::ProtocolEngine;
use crate::error::{Result, TwsError};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

fn check_frame_len(len: usize) -> Result<u32> {
    match u32::try_from(len) {
        Ok(n) if len <= TransportConfig::MAX_FRAME_SIZE => Ok(n),
        _ => Err(TwsError::transport(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len,
            TransportConfig::MAX_FRAME_SIZE
        ))),
    }
}

/// Read one envelope frame. `None` means the peer closed the stream between
/// frames; EOF inside a frame is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    check_frame_len(len)?;

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one envelope frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> Result<()> {
    let len = check_frame_len(frame.len())?;
    writer.write_u32(len).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Handle to an attached stream. Dropping it closes the connection.
pub struct ConnectionHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Stop reading and close the engine's channel.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait until the peer disconnects or `shutdown` takes effect.
    pub async fn closed(&mut self) {
        if let Some(task) = self.reader_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.writer_task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.reader_task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds byte streams to protocol engines.
pub struct Connection;

impl Connection {
    /// Open a TCP connection to `addr` and attach it to `engine`.
    pub async fn connect(engine: ProtocolEngine, addr: SocketAddr) -> Result<ConnectionHandle> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TwsError::transport(format!("timed out connecting to {}", addr)))??;
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);
        Ok(Self::attach(engine, stream))
    }

    /// Attach `stream` to `engine` and start moving frames.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<S>(engine: ProtocolEngine, stream: S) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        engine.set_channel(outbound_tx);

        let writer_task = tokio::spawn(Self::write_loop(engine.clone(), writer, outbound_rx));
        let reader_task = tokio::spawn(Self::read_loop(engine, reader, shutdown_rx));

        ConnectionHandle {
            shutdown_tx: Some(shutdown_tx),
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }
    }

    async fn write_loop<S: AsyncWrite>(
        engine: ProtocolEngine,
        mut writer: WriteHalf<S>,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
    ) {
        while let Some(raw) = outbound_rx.recv().await {
            debug!("Sending frame: {}", raw);
            if let Err(e) = write_frame(&mut writer, raw.as_bytes()).await {
                warn!("Failed to write frame: {}", e);
                engine.close_channel();
                break;
            }
        }

        let _ = writer.shutdown().await;
        debug!("Writer stopped");
    }

    async fn read_loop<S: AsyncRead>(
        engine: ProtocolEngine,
        mut reader: ReadHalf<S>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => match result {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        debug!("Peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read frame: {}", e);
                        break;
                    }
                },
                _ = &mut shutdown_rx => {
                    debug!("Connection shutting down");
                    break;
                }
            };

            let engine = engine.clone();
            tokio::spawn(async move {
                engine.process_inbound(frame).await;
            });
        }

        engine.close_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{self, Envelope};

    fn authenticate_call() -> String {
        envelope::serialize(&Envelope::call(
            "authenticate",
            "evt-1",
            r#"{"token":"12345"}"#,
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_envelope_frames_back_to_back() {
        let call = authenticate_call();
        let response = envelope::serialize(&Envelope::response(
            "authenticate",
            "evt-1",
            r#"{"code":200,"message":"Token is valid!"}"#,
        ))
        .unwrap();

        let mut wire = Vec::new();
        write_frame(&mut wire, call.as_bytes()).await.unwrap();
        write_frame(&mut wire, response.as_bytes()).await.unwrap();
        assert_eq!(
            wire.len(),
            2 * TransportConfig::FRAME_HEADER_LEN + call.len() + response.len()
        );
        assert_eq!(&wire[..4], &(call.len() as u32).to_be_bytes());

        let mut reader = std::io::Cursor::new(wire);
        let first = read_frame(&mut reader).await.unwrap().unwrap();
        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert!(read_frame(&mut reader).await.unwrap().is_none());

        assert_eq!(envelope::parse(&first).unwrap().operation, "authenticate");
        assert_eq!(
            envelope::parse(&second).unwrap().kind,
            crate::EnvelopeKind::Response
        );
    }

    #[tokio::test]
    async fn test_large_payload_within_limit() {
        let blob = "x".repeat(512 * 1024);
        let call = envelope::serialize(&Envelope::call(
            "upload",
            "evt-9",
            envelope::encode_payload(&blob).unwrap(),
        ))
        .unwrap();
        assert!(call.len() < TransportConfig::MAX_FRAME_SIZE);

        let mut wire = Vec::new();
        write_frame(&mut wire, call.as_bytes()).await.unwrap();
        let frame = read_frame(&mut std::io::Cursor::new(wire)).await.unwrap().unwrap();

        let parsed = envelope::parse(&frame).unwrap();
        assert_eq!(envelope::decode_payload(&parsed.payload).unwrap(), blob);
    }

    #[tokio::test]
    async fn test_oversized_frames_rejected_both_ways() {
        let too_big = vec![b' '; TransportConfig::MAX_FRAME_SIZE + 1];
        let mut wire = Vec::new();
        assert!(matches!(
            write_frame(&mut wire, &too_big).await,
            Err(TwsError::Transport { .. })
        ));
        assert!(wire.is_empty());

        let mut header = ((TransportConfig::MAX_FRAME_SIZE + 1) as u32).to_be_bytes().to_vec();
        header.extend_from_slice(authenticate_call().as_bytes());
        assert!(matches!(
            read_frame(&mut std::io::Cursor::new(header)).await,
            Err(TwsError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_error() {
        let call = authenticate_call();
        let mut wire = Vec::new();
        write_frame(&mut wire, call.as_bytes()).await.unwrap();
        wire.truncate(wire.len() - 10);

        assert!(matches!(
            read_frame(&mut std::io::Cursor::new(wire)).await,
            Err(TwsError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn test_eof_between_frames_is_clean() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }
}
