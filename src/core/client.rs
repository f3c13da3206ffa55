//! Persistent-connection MC-protocol client
//!
//! Owns a single TCP session to the controller and serializes every request
//! over it: an mpsc channel feeds a dedicated dispatch task that keeps at
//! most one frame in flight, so FIFO ordering is structural rather than
//! manually enforced. A separate reader task reassembles response frames
//! from the socket byte stream.
//!
//! Callers suspend on their own request's completion only. Disconnecting
//! fails the in-flight and all queued requests with a uniform
//! [`McSrvError::ConnectionLost`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::core::device::DeviceCode;
use crate::core::frame::{
    build_read_request, build_write_request, FrameAccumulator, ResponseFrame,
};
use crate::core::traits::{Communication, StringEncoding};
use crate::utils::error::{McSrvError, Result};
use crate::utils::hex::format_hex_pretty;

/// Connection parameters for one controller target
#[derive(Debug, Clone)]
pub struct McClientConfig {
    /// Controller host or IP
    pub host: String,
    /// Controller MC-protocol port
    pub port: u16,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-in-flight-request timeout
    pub request_timeout: Duration,
}

impl Default for McClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5007,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// A request waiting in the queue or in flight
struct PendingRequest {
    frame: Vec<u8>,
    respond: oneshot::Sender<Result<Vec<u8>>>,
}

/// Live connection handles, replaced wholesale on reconnect
struct ConnHandles {
    generation: u64,
    request_tx: mpsc::UnboundedSender<PendingRequest>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

enum ConnState {
    Disconnected,
    /// An attempt is in progress; waiters are completed together
    Connecting(Vec<oneshot::Sender<Result<()>>>),
    Connected(ConnHandles),
}

struct ClientInner {
    config: McClientConfig,
    state: Mutex<ConnState>,
    generation: AtomicU64,
}

/// MC-protocol client handle; cheap to clone, all clones share one session
#[derive(Clone)]
pub struct McClient {
    inner: Arc<ClientInner>,
}

impl McClient {
    pub fn new(config: McClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                state: Mutex::new(ConnState::Disconnected),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a frame and await its response
    async fn send_recv(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        if !self.is_connection_active().await {
            self.connect().await.map_err(|e| {
                McSrvError::ConnectionError(format!("Failed to connect to PLC: {}", e))
            })?;
        }

        let (tx, rx) = oneshot::channel();
        {
            let state = self.inner.state.lock().await;
            match &*state {
                ConnState::Connected(handles) => handles
                    .request_tx
                    .send(PendingRequest { frame, respond: tx })
                    .map_err(|_| McSrvError::NotConnected)?,
                _ => return Err(McSrvError::NotConnected),
            }
        }
        rx.await.map_err(|_| McSrvError::ConnectionLost)?
    }
}

impl ClientInner {
    async fn establish(self: &Arc<Self>) -> Result<ConnHandles> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        debug!("Connecting to PLC at {}", addr);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| McSrvError::TimeoutError(format!("Connection to {} timed out", addr)))?
            .map_err(|e| McSrvError::ConnectionError(format!("Failed to connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reader = tokio::spawn(read_loop(read_half, frame_tx));
        let dispatcher = tokio::spawn(dispatch_loop(
            write_half,
            request_rx,
            frame_rx,
            self.config.request_timeout,
            Arc::downgrade(self),
            generation,
        ));

        info!("Connected to PLC at {}", addr);
        Ok(ConnHandles {
            generation,
            request_tx,
            reader,
            dispatcher,
        })
    }

    /// Run one connect attempt and complete every waiter with its outcome
    async fn establish_and_finish(self: Arc<Self>) {
        let result = self.establish().await;
        let mut state = self.state.lock().await;
        let waiters = match std::mem::replace(&mut *state, ConnState::Disconnected) {
            ConnState::Connecting(waiters) => waiters,
            other => {
                // disconnected concurrently; waiters were already failed
                *state = other;
                if let Ok(handles) = result {
                    handles.reader.abort();
                    handles.dispatcher.abort();
                }
                return;
            }
        };
        match result {
            Ok(handles) => {
                *state = ConnState::Connected(handles);
                drop(state);
                for w in waiters {
                    let _ = w.send(Ok(()));
                }
            }
            Err(e) => {
                drop(state);
                error!("PLC connect attempt failed: {}", e);
                for w in waiters {
                    let _ = w.send(Err(e.clone()));
                }
            }
        }
    }

    /// Transition to Disconnected if the given connection is still current
    async fn mark_disconnected(&self, generation: u64) {
        let mut state = self.state.lock().await;
        let current = matches!(&*state, ConnState::Connected(h) if h.generation == generation);
        if current {
            if let ConnState::Connected(handles) =
                std::mem::replace(&mut *state, ConnState::Disconnected)
            {
                handles.reader.abort();
                handles.dispatcher.abort();
            }
        }
    }
}

/// Reassemble response frames from the socket byte stream
async fn read_loop(mut read_half: OwnedReadHalf, frame_tx: mpsc::UnboundedSender<Vec<u8>>) {
    use tokio::io::AsyncReadExt;

    let mut acc = FrameAccumulator::new();
    let mut chunk = [0u8; 4096];
    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                warn!("PLC socket closed by peer");
                break;
            }
            Ok(n) => {
                for frame in acc.push(&chunk[..n]) {
                    if frame_tx.send(frame).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("PLC socket read error: {}", e);
                break;
            }
        }
    }
    // dropping frame_tx tells the dispatcher the connection is gone
}

/// Pull requests off the queue one at a time and match each with the next
/// response frame, applying the per-request timeout
async fn dispatch_loop(
    mut write_half: OwnedWriteHalf,
    mut request_rx: mpsc::UnboundedReceiver<PendingRequest>,
    mut frame_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    request_timeout: Duration,
    inner: Weak<ClientInner>,
    generation: u64,
) {
    loop {
        // While idle, also watch for reader death and discard stale frames
        // left over from timed-out requests.
        let request = tokio::select! {
            maybe_request = request_rx.recv() => match maybe_request {
                Some(request) => request,
                None => return, // client handle dropped or disconnected
            },
            maybe_frame = frame_rx.recv() => match maybe_frame {
                Some(frame) => {
                    debug!(
                        hex_data = %format_hex_pretty(&frame),
                        "Discarding unsolicited response frame"
                    );
                    continue;
                }
                None => break,
            },
        };

        debug!(
            hex_data = %format_hex_pretty(&request.frame),
            length = request.frame.len(),
            direction = "send",
            "Raw frame"
        );
        if let Err(e) = write_half.write_all(&request.frame).await {
            warn!("PLC socket write error: {}", e);
            let _ = request.respond.send(Err(McSrvError::ConnectionLost));
            break;
        }

        tokio::select! {
            maybe_frame = frame_rx.recv() => match maybe_frame {
                Some(frame) => {
                    debug!(
                        hex_data = %format_hex_pretty(&frame),
                        length = frame.len(),
                        direction = "recv",
                        "Raw frame"
                    );
                    let _ = request.respond.send(Ok(frame));
                }
                None => {
                    let _ = request.respond.send(Err(McSrvError::ConnectionLost));
                    break;
                }
            },
            _ = tokio::time::sleep(request_timeout) => {
                warn!("PLC request timed out after {:?}", request_timeout);
                let _ = request.respond.send(Err(McSrvError::TimeoutError(format!(
                    "Request timed out after {:?}",
                    request_timeout
                ))));
                // next queued request is dispatched immediately; a late
                // response for this one is discarded in the idle select
            }
        }
    }

    // Connection is gone: fail everything still queued with one uniform error
    request_rx.close();
    while let Ok(request) = request_rx.try_recv() {
        let _ = request.respond.send(Err(McSrvError::ConnectionLost));
    }
    if let Some(inner) = inner.upgrade() {
        inner.mark_disconnected(generation).await;
    }
}

#[async_trait]
impl Communication for McClient {
    async fn connect(&self) -> Result<()> {
        let rx = {
            let mut state = self.inner.state.lock().await;
            match &mut *state {
                ConnState::Connected(_) => return Ok(()),
                ConnState::Connecting(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                ConnState::Disconnected => {
                    let (tx, rx) = oneshot::channel();
                    *state = ConnState::Connecting(vec![tx]);
                    // run the attempt detached so caller cancellation cannot
                    // strand the other waiters
                    tokio::spawn(self.inner.clone().establish_and_finish());
                    rx
                }
            }
        };
        rx.await
            .map_err(|_| McSrvError::ConnectionError("Connect attempt aborted".to_string()))?
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        match std::mem::replace(&mut *state, ConnState::Disconnected) {
            ConnState::Connected(handles) => {
                handles.reader.abort();
                handles.dispatcher.abort();
                info!("Disconnected from PLC");
            }
            ConnState::Connecting(waiters) => {
                for w in waiters {
                    let _ = w.send(Err(McSrvError::ConnectionError(
                        "Disconnected while connecting".to_string(),
                    )));
                }
            }
            ConnState::Disconnected => {}
        }
        Ok(())
    }

    async fn is_connection_active(&self) -> bool {
        matches!(*self.inner.state.lock().await, ConnState::Connected(_))
    }

    async fn read_words(&self, dev: DeviceCode, start: u32, count: u16) -> Result<Vec<u16>> {
        let frame = build_read_request(dev, start, count)?;
        let response = self.send_recv(frame).await.map_err(|e| {
            error!("Failed to read words from {}{}: {}", dev, start, e);
            e
        })?;
        let response = ResponseFrame::parse(&response)?;
        response.check_end_code().map_err(|e| {
            error!("Failed to read words from {}{}: {}", dev, start, e);
            e
        })?;
        response.words()
    }

    async fn write_words(&self, dev: DeviceCode, start: u32, words: &[u16]) -> Result<()> {
        let frame = build_write_request(dev, start, words)?;
        let response = self.send_recv(frame).await.map_err(|e| {
            error!("Failed to write words to {}{}: {}", dev, start, e);
            e
        })?;
        let response = ResponseFrame::parse(&response)?;
        response.check_end_code().map_err(|e| {
            error!("Failed to write words to {}{}: {}", dev, start, e);
            e
        })
    }

    async fn read_bit(&self, dev: DeviceCode, address: u32, bit: u8) -> Result<bool> {
        check_bit(bit)?;
        let words = self.read_words(dev, address, 1).await?;
        let word = words.first().copied().ok_or_else(|| {
            McSrvError::ProtocolError("Empty response to single-word read".to_string())
        })?;
        Ok((word >> bit) & 1 == 1)
    }

    async fn write_bit(&self, dev: DeviceCode, address: u32, bit: u8, value: bool) -> Result<()> {
        check_bit(bit)?;
        let words = self.read_words(dev, address, 1).await?;
        let mut word = words.first().copied().ok_or_else(|| {
            McSrvError::ProtocolError("Empty response to single-word read".to_string())
        })?;
        if value {
            word |= 1 << bit;
        } else {
            word &= !(1 << bit);
        }
        self.write_words(dev, address, &[word]).await
    }

    async fn read_string(
        &self,
        dev: DeviceCode,
        start: u32,
        encoding: StringEncoding,
        max_chars: u16,
    ) -> Result<String> {
        check_string_area(dev)?;
        let words_to_read = match encoding {
            // string plus terminator, two chars per word
            StringEncoding::Ascii => (max_chars as u32 + 2) / 2,
            StringEncoding::Utf16le => max_chars as u32 + 1,
        }
        .min(u16::MAX as u32) as u16;
        let words = self.read_words(dev, start, words_to_read).await?;
        Ok(match encoding {
            StringEncoding::Ascii => unpack_ascii(&words),
            StringEncoding::Utf16le => unpack_u16(&words),
        })
    }

    async fn write_string(
        &self,
        dev: DeviceCode,
        start: u32,
        text: &str,
        encoding: StringEncoding,
    ) -> Result<()> {
        check_string_area(dev)?;
        let words = match encoding {
            StringEncoding::Ascii => pack_ascii(text),
            StringEncoding::Utf16le => pack_u16(text),
        };
        self.write_words(dev, start, &words).await
    }
}

fn check_bit(bit: u8) -> Result<()> {
    if bit > 15 {
        return Err(McSrvError::InvalidParameter(
            "Bit position must be between 0 and 15".to_string(),
        ));
    }
    Ok(())
}

fn check_string_area(dev: DeviceCode) -> Result<()> {
    if !dev.supports_strings() {
        return Err(McSrvError::InvalidParameter(format!(
            "Strings are only supported on D or R registers, not {}",
            dev
        )));
    }
    Ok(())
}

/// Pack an ASCII string two characters per word, null-terminated and padded
/// to a whole word
fn pack_ascii(text: &str) -> Vec<u16> {
    let mut padded = text.as_bytes().to_vec();
    padded.push(0);
    if padded.len() % 2 == 1 {
        padded.push(0);
    }
    padded
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// Unpack an ASCII string, stopping at the first NUL byte
fn unpack_ascii(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for w in words {
        let lo = (w & 0xFF) as u8;
        let hi = (w >> 8) as u8;
        if lo == 0 {
            break;
        }
        bytes.push(lo);
        if hi == 0 {
            break;
        }
        bytes.push(hi);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Pack a string one UTF-16LE code unit per word, null-terminated
fn pack_u16(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Unpack a UTF-16LE string, stopping at the first zero word
fn unpack_u16(words: &[u16]) -> String {
    let units: Vec<u16> = words.iter().copied().take_while(|&w| w != 0).collect();
    String::from_utf16_lossy(&units)
}
