//! Common test utilities and shared imports

// Shared across test files; not every item is used in each one
#![allow(dead_code)]

use bytes::Bytes;
use std::collections::VecDeque;
use std::future::{Ready, ready};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tcm_lib::bus::Bus;
use tcm_lib::config::TcmConfig;
use tcm_lib::constants::{MESSAGE_MARKER, MESSAGE_PADDING};
use tcm_lib::error::TcmError;
use tcm_lib::packet::{Command, MessageCode};

pub type Responder = Box<dyn FnMut(u8, &[u8]) -> Vec<Vec<u8>> + Send>;

/// Wire frame: marker, code, little-endian length, payload, padding
pub fn frame(code: MessageCode, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![MESSAGE_MARKER, code.into()];
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.push(MESSAGE_PADDING);
    buf
}

pub fn ok(payload: &[u8]) -> Vec<Vec<u8>> {
    vec![frame(MessageCode::Ok, payload)]
}

/// 24-byte identify record
pub fn identify_record(mode: u8, build_id: u32, max_write_size: u16) -> Vec<u8> {
    let mut buf = vec![0x02, mode];
    let mut part = [0u8; 16];
    part[..7].copy_from_slice(b"S3908P1");
    buf.extend_from_slice(&part);
    buf.extend_from_slice(&build_id.to_le_bytes());
    buf.extend_from_slice(&max_write_size.to_le_bytes());
    buf
}

/// 46-byte application info record
pub fn app_info_record(status: u16, max_x: u16, max_y: u16, config_size: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 46];
    buf[2..4].copy_from_slice(&status.to_le_bytes());
    buf[12..14].copy_from_slice(&config_size.to_le_bytes());
    buf[32..34].copy_from_slice(&max_x.to_le_bytes());
    buf[34..36].copy_from_slice(&max_y.to_le_bytes());
    buf
}

/// 32-byte boot info record
pub fn boot_info_record(block_words: u8, page_words: u16, max_payload: u16) -> Vec<u8> {
    let mut buf = vec![0u8; 32];
    buf[4] = block_words;
    buf[5..7].copy_from_slice(&page_words.to_le_bytes());
    buf[7..9].copy_from_slice(&max_payload.to_le_bytes());
    buf
}

#[derive(Default)]
pub struct MockState {
    outbox: VecDeque<Vec<u8>>,
    in_flight: Vec<u8>,
    assembling: Option<(u8, Vec<u8>)>,
    responder: Option<Responder>,
    pub fail_reads: usize,
    pub fail_writes: usize,
    /// Every bus write, chunk by chunk
    pub writes: Vec<Vec<u8>>,
    /// Every bus read length
    pub reads: Vec<usize>,
    /// Reassembled commands with their payload
    pub commands: Vec<(u8, Vec<u8>)>,
    /// A new command started before the previous one was complete
    pub interleaved: bool,
}

impl MockState {
    fn read(&mut self, len: usize) -> Result<Bytes, TcmError> {
        self.reads.push(len);
        if self.fail_reads > 0 {
            self.fail_reads -= 1;
            return Err(TcmError::Bus("injected read failure".to_string()));
        }

        let mut out = Vec::with_capacity(len);
        if !self.in_flight.is_empty() {
            out.extend_from_slice(&[MESSAGE_MARKER, MessageCode::ContinuedRead.into()]);
            let take = len.saturating_sub(2).min(self.in_flight.len());
            out.extend(self.in_flight.drain(..take));
            // a lone padding byte is filled in by the host
            if self.in_flight.len() <= 1 {
                self.in_flight.clear();
            }
        } else if let Some(message) = self.outbox.pop_front() {
            let take = len.min(message.len());
            out.extend_from_slice(&message[..take]);
            let rest = &message[take..];
            if rest.len() > 1 {
                self.in_flight = rest.to_vec();
            }
        } else {
            out.extend_from_slice(&[MESSAGE_MARKER, MessageCode::Idle.into(), 0, 0]);
        }
        out.resize(len, 0);
        Ok(Bytes::from(out))
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TcmError> {
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(TcmError::Bus("injected write failure".to_string()));
        }
        self.writes.push(data.to_vec());
        let Some((&first, rest)) = data.split_first() else {
            return Ok(());
        };

        if first == u8::from(Command::ContinueWrite) {
            if let Some((_, body)) = self.assembling.as_mut() {
                body.extend_from_slice(rest);
            }
        } else {
            if self.assembling.is_some() {
                self.interleaved = true;
            }
            self.assembling = Some((first, rest.to_vec()));
        }
        self.complete_command();
        Ok(())
    }

    fn complete_command(&mut self) {
        let Some((command, body)) = self.assembling.as_ref() else {
            return;
        };
        if body.len() < 2 {
            return;
        }
        let length = u16::from_le_bytes([body[0], body[1]]) as usize;
        if body.len() < 2 + length {
            return;
        }

        let command = *command;
        let payload = body[2..2 + length].to_vec();
        self.assembling = None;
        self.commands.push((command, payload.clone()));
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(command, &payload);
            self.outbox.extend(replies);
        }
    }
}

/// In-memory device answering through a responder closure.
///
/// Clones share state, so a test can keep one handle after moving another
/// into the engine.
#[derive(Clone, Default)]
pub struct MockBus {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(u8, &[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let bus = Self::new();
        bus.state.lock().unwrap().responder = Some(Box::new(responder));
        bus
    }

    /// Queue an unsolicited message
    pub fn push(&self, message: Vec<u8>) {
        self.state.lock().unwrap().outbox.push_back(message);
    }

    pub fn commands(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn command_codes(&self) -> Vec<u8> {
        self.commands().into_iter().map(|(code, _)| code).collect()
    }
}

impl Bus for MockBus {
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TcmError>> + Send {
        let result: Ready<_> = ready(self.state.lock().unwrap().write(data));
        result
    }

    fn read(&mut self, len: usize) -> impl Future<Output = Result<Bytes, TcmError>> + Send {
        let result: Ready<_> = ready(self.state.lock().unwrap().read(len));
        result
    }
}

/// `MockBus` whose reads take real time, like a transfer on the blocking pool
#[derive(Clone)]
pub struct SlowBus {
    pub inner: MockBus,
    pub delay: Duration,
}

impl Bus for SlowBus {
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), TcmError>> + Send {
        self.inner.write(data)
    }

    fn read(&mut self, len: usize) -> impl Future<Output = Result<Bytes, TcmError>> + Send {
        let mut inner = self.inner.clone();
        let delay = self.delay;
        async move {
            tokio::time::sleep(delay).await;
            inner.read(len).await
        }
    }
}

/// Route engine logs to the test harness; repeated calls are harmless
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with short deadlines so failure paths finish quickly
pub fn test_config() -> TcmConfig {
    let mut config = TcmConfig::default();
    config.timeouts.default_ms = 200;
    config.timeouts.short_ms = 200;
    config.timeouts.report_ms = 100;
    config.app_status_poll_timeout_ms = 20;
    config.app_status_poll_interval_ms = 5;
    config.response_poll_interval_ms = 1;
    config
}

/// Responder for a healthy device running application firmware
pub fn application_device() -> impl FnMut(u8, &[u8]) -> Vec<Vec<u8>> + Send + 'static {
    move |command, payload| match Command::from(command) {
        Command::Identify => ok(&identify_record(0x01, 42, 256)),
        Command::Reset | Command::RunApplicationFirmware => {
            vec![frame(MessageCode::Identify, &identify_record(0x01, 42, 256))]
        }
        Command::GetApplicationInfo => ok(&app_info_record(0, 1079, 2399, 64)),
        Command::GetBootInfo => ok(&boot_info_record(8, 2048, 256)),
        Command::GetDynamicConfig => ok(&[0x34, 0x12]),
        Command::GetTouchReportConfig => ok(&[0x05, 0x20, 0x00]),
        _ => {
            let _ = payload;
            ok(&[])
        }
    }
}
