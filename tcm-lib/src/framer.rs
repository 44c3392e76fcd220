use crate::bus::Bus;
use crate::config::TcmConfig;
use crate::constants::*;
use crate::error::TcmError;
use crate::packet::{MessageCode, MessageHeader, RawMessage, command_body};
use crate::transport;
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Outcome of one receive cycle
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The device had nothing new (idle, busy or a stray continuation)
    Idle(MessageCode),
    Message(RawMessage),
}

/// The bus together with the chunk parameters and predictive read window.
///
/// Owned behind the device's bus lock; every method here is one exclusive
/// stretch of bus traffic.
pub struct Link<B> {
    bus: B,
    rd_chunk_size: usize,
    wr_chunk_size: usize,
    configured_wr_chunk_size: usize,
    read_length: usize,
    min_read_length: usize,
}

impl<B: Bus> Link<B> {
    pub fn new(bus: B, config: &TcmConfig) -> Self {
        Self {
            bus,
            rd_chunk_size: config.read_chunk_size,
            wr_chunk_size: config.write_chunk_size,
            configured_wr_chunk_size: config.write_chunk_size,
            read_length: config.initial_read_length(),
            min_read_length: config.min_read_length,
        }
    }

    pub fn rd_chunk_size(&self) -> usize {
        self.rd_chunk_size
    }

    pub fn wr_chunk_size(&self) -> usize {
        self.wr_chunk_size
    }

    pub fn read_length(&self) -> usize {
        self.read_length
    }

    /// Adopt the device's advertised maximum write size.
    pub fn renegotiate(&mut self, max_write_size: usize) {
        let mut wr_chunk_size = max_write_size.min(self.configured_wr_chunk_size);
        if wr_chunk_size == 0 {
            wr_chunk_size = max_write_size;
        }
        if wr_chunk_size != self.wr_chunk_size {
            debug!(
                max_write_size,
                wr_chunk_size, "Write chunk size renegotiated"
            );
        }
        self.wr_chunk_size = wr_chunk_size;
    }

    fn update_read_length(&mut self, total_length: usize) {
        let total_length = total_length.max(self.min_read_length);
        self.read_length = if self.rd_chunk_size == 0 {
            total_length
        } else {
            total_length.min(self.rd_chunk_size)
        };
    }

    /// Run one receive cycle and return the validated message, if any.
    pub async fn read_message(&mut self) -> Result<Frame, TcmError> {
        let read_length = self.read_length;
        let head = self.bus.read(read_length).await?;
        if head.len() < MESSAGE_HEADER_SIZE {
            return Err(TcmError::Framing(format!(
                "Short read: {} bytes, expected {read_length}",
                head.len()
            )));
        }

        let header_bytes: [u8; 4] = head[..MESSAGE_HEADER_SIZE].try_into()?;
        let header = MessageHeader::from_bytes(header_bytes);
        if header.marker() != MESSAGE_MARKER {
            return Err(TcmError::Framing(format!(
                "Incorrect header marker {:#04x}",
                header.marker()
            )));
        }

        let code = MessageCode::from(header.code());
        if code.is_status() {
            match code {
                MessageCode::Ok => {}
                MessageCode::ContinuedRead | MessageCode::Idle | MessageCode::Busy => {
                    return Ok(Frame::Idle(code));
                }
                MessageCode::Error => {
                    warn!(length = header.length(), "Device reported error status");
                }
                _ => {
                    return Err(TcmError::Framing(format!(
                        "Incorrect header code {:#04x}",
                        header.code()
                    )));
                }
            }
        }

        let total_length = MESSAGE_HEADER_SIZE + header.length() as usize + 1;
        let captured = head.len().min(read_length);
        let mut buf = BytesMut::with_capacity(total_length);
        if total_length <= captured {
            buf.put_slice(&head[..total_length]);
        } else if total_length - 1 == captured {
            buf.put_slice(&head[..captured]);
            buf.put_u8(MESSAGE_PADDING);
        } else {
            buf.put_slice(&head[..captured]);
            transport::read_continued(
                &mut self.bus,
                &mut buf,
                total_length - captured,
                self.rd_chunk_size,
            )
            .await?;
        }

        let message = RawMessage::try_from(buf.freeze())?;
        self.update_read_length(total_length);
        debug!(
            code = %message.code(),
            length = message.payload.len(),
            "Message received"
        );
        Ok(Frame::Message(message))
    }

    /// Transmit a command with its length-prefixed payload.
    pub async fn write_command(&mut self, command: u8, payload: &[u8]) -> Result<(), TcmError> {
        let body = command_body(payload);
        transport::write_chunked(&mut self.bus, command, &body, self.wr_chunk_size).await
    }

    /// Transmit a command followed by raw bytes, no length prefix.
    pub async fn raw_write(&mut self, command: u8, data: &[u8]) -> Result<(), TcmError> {
        transport::write_chunked(&mut self.bus, command, data, self.wr_chunk_size).await
    }

    pub async fn read_raw(&mut self, length: usize) -> Result<Bytes, TcmError> {
        transport::read_raw(&mut self.bus, length, self.rd_chunk_size).await
    }
}
