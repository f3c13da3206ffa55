//! In-process fake controller for integration tests
//!
//! Listens on a loopback port, parses 3E binary request frames, and serves
//! a word-addressable memory map. Behavior knobs (end code, response delay,
//! truncated reads, silence, forced close) let tests exercise the client's
//! failure paths.

// not every test binary uses every knob
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

pub const CMD_READ_WORDS: u16 = 0x0401;
pub const CMD_WRITE_WORDS: u16 = 0x1401;

/// One parsed request as it arrived on the wire
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub raw: Vec<u8>,
    pub command: u16,
    pub device: u8,
    pub start: u32,
    pub count: u16,
    pub payload: Vec<u16>,
}

#[derive(Default)]
struct PlcState {
    memory: Mutex<HashMap<(u8, u32), u16>>,
    requests: Mutex<Vec<ReceivedRequest>>,
    accepted: AtomicUsize,
    end_code: AtomicU16,
    silent: AtomicBool,
    split_responses: AtomicBool,
    response_delay_ms: AtomicUsize,
    truncate_read_words: Mutex<Option<u16>>,
    close_after_responses: Mutex<Option<usize>>,
}

/// Handle to the fake controller
pub struct FakePlc {
    pub addr: SocketAddr,
    state: Arc<PlcState>,
}

impl FakePlc {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(PlcState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_state.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(stream, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Preload controller memory
    pub async fn set_words(&self, device: u8, start: u32, words: &[u16]) {
        let mut memory = self.state.memory.lock().await;
        for (i, w) in words.iter().enumerate() {
            memory.insert((device, start + i as u32), *w);
        }
    }

    pub async fn word(&self, device: u8, address: u32) -> u16 {
        *self
            .state
            .memory
            .lock()
            .await
            .get(&(device, address))
            .unwrap_or(&0)
    }

    pub async fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().await.clone()
    }

    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Non-zero makes every response a protocol failure
    pub fn set_end_code(&self, end_code: u16) {
        self.state.end_code.store(end_code, Ordering::SeqCst);
    }

    /// Record requests but never answer them
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Deliver every response in two separate socket writes
    pub fn set_split_responses(&self, split: bool) {
        self.state.split_responses.store(split, Ordering::SeqCst);
    }

    /// Delay every response by this long
    pub fn set_response_delay(&self, delay: Duration) {
        self.state
            .response_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Answer read requests with at most this many words
    pub async fn set_truncate_read_words(&self, words: Option<u16>) {
        *self.state.truncate_read_words.lock().await = words;
    }

    /// Close the connection after this many further responses
    pub async fn set_close_after_responses(&self, count: usize) {
        *self.state.close_after_responses.lock().await = Some(count);
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<PlcState>) {
    let mut acc: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        acc.extend_from_slice(&chunk[..n]);

        while acc.len() >= 9 {
            let body = u16::from_le_bytes([acc[7], acc[8]]) as usize;
            let total = 9 + body;
            if acc.len() < total {
                break;
            }
            let frame: Vec<u8> = acc.drain(..total).collect();
            if !handle_frame(&frame, &mut stream, &state).await {
                return;
            }
        }
    }
}

/// Serve one request; returns false when the connection should close
async fn handle_frame(frame: &[u8], stream: &mut TcpStream, state: &Arc<PlcState>) -> bool {
    let command = u16::from_le_bytes([frame[11], frame[12]]);
    let start = u32::from_le_bytes([frame[15], frame[16], frame[17], 0]);
    let device = frame[18];
    let count = u16::from_le_bytes([frame[19], frame[20]]);
    let payload: Vec<u16> = frame[21..]
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    state.requests.lock().await.push(ReceivedRequest {
        raw: frame.to_vec(),
        command,
        device,
        start,
        count,
        payload: payload.clone(),
    });

    if state.silent.load(Ordering::SeqCst) {
        return true;
    }

    let delay_ms = state.response_delay_ms.load(Ordering::SeqCst);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
    }

    let end_code = state.end_code.load(Ordering::SeqCst);
    let response_payload = if command == CMD_READ_WORDS && end_code == 0 {
        let served = match *state.truncate_read_words.lock().await {
            Some(max) => count.min(max),
            None => count,
        };
        let memory = state.memory.lock().await;
        let mut bytes = Vec::with_capacity(served as usize * 2);
        for i in 0..served as u32 {
            let word = *memory.get(&(device, start + i)).unwrap_or(&0);
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    } else {
        if command == CMD_WRITE_WORDS && end_code == 0 {
            let mut memory = state.memory.lock().await;
            for (i, w) in payload.iter().enumerate() {
                memory.insert((device, start + i as u32), *w);
            }
        }
        Vec::new()
    };

    let mut response = vec![0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00];
    response.extend_from_slice(&((response_payload.len() + 2) as u16).to_le_bytes());
    response.extend_from_slice(&end_code.to_le_bytes());
    response.extend_from_slice(&response_payload);

    if state.split_responses.load(Ordering::SeqCst) && response.len() > 5 {
        if stream.write_all(&response[..5]).await.is_err() {
            return false;
        }
        let _ = stream.flush().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        if stream.write_all(&response[5..]).await.is_err() {
            return false;
        }
    } else if stream.write_all(&response).await.is_err() {
        return false;
    }

    let mut close_after = state.close_after_responses.lock().await;
    if let Some(remaining) = close_after.as_mut() {
        if *remaining <= 1 {
            *close_after = None;
            return false;
        }
        *remaining -= 1;
    }
    true
}
