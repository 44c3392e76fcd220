//! Chunked transfers over a bus with a capped transaction size.
//!
//! Writes spend one byte per chunk on the command (first chunk) or the
//! continue-write command (later chunks). Reads spend two bytes per chunk on
//! the marker and status code; every chunk after the first must carry the
//! continued-read status.

use crate::bus::Bus;
use crate::constants::*;
use crate::error::TcmError;
use crate::packet::{Command, MessageCode};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

/// Split `total` bytes into transfer lengths of at most `chunk_space` bytes.
///
/// A `chunk_space` of zero means unbounded. There is always at least one
/// chunk, even when `total` is zero.
pub fn chunk_lengths(total: usize, chunk_space: usize) -> Vec<usize> {
    let space = if chunk_space == 0 { total } else { chunk_space };
    if space == 0 {
        return vec![0];
    }
    let count = total.div_ceil(space).max(1);
    let mut remaining = total;
    let mut lengths = Vec::with_capacity(count);
    for _ in 0..count {
        let xfer = remaining.min(space);
        lengths.push(xfer);
        remaining -= xfer;
    }
    lengths
}

fn write_chunk_space(wr_chunk_size: usize) -> usize {
    wr_chunk_size.saturating_sub(WRITE_CHUNK_OVERHEAD)
}

fn read_chunk_space(rd_chunk_size: usize) -> usize {
    rd_chunk_size.saturating_sub(READ_CHUNK_OVERHEAD)
}

/// Build the bus transactions that carry `command` followed by `body`.
pub fn encode_write_chunks(command: u8, body: &[u8], wr_chunk_size: usize) -> Vec<Bytes> {
    let mut offset = 0;
    chunk_lengths(body.len(), write_chunk_space(wr_chunk_size))
        .into_iter()
        .enumerate()
        .map(|(idx, xfer)| {
            let mut chunk = BytesMut::with_capacity(xfer + WRITE_CHUNK_OVERHEAD);
            if idx == 0 {
                chunk.put_u8(command);
            } else {
                chunk.put_u8(Command::ContinueWrite.into());
            }
            chunk.put_slice(&body[offset..offset + xfer]);
            offset += xfer;
            chunk.freeze()
        })
        .collect()
}

/// Send `command` and `body`, one bus transaction per chunk.
///
/// The first failing transaction aborts the transfer.
pub async fn write_chunked<B: Bus>(
    bus: &mut B,
    command: u8,
    body: &[u8],
    wr_chunk_size: usize,
) -> Result<(), TcmError> {
    let chunks = encode_write_chunks(command, body, wr_chunk_size);
    debug!(
        command = format!("{command:#04x}"),
        chunks = chunks.len(),
        "Chunked write"
    );
    for chunk in chunks {
        bus.write(&chunk).await?;
    }
    Ok(())
}

fn check_continuation(chunk: &[u8]) -> Result<(), TcmError> {
    if chunk.len() < READ_CHUNK_OVERHEAD {
        return Err(TcmError::Framing(format!(
            "Continuation chunk too short: {} bytes",
            chunk.len()
        )));
    }
    if chunk[0] != MESSAGE_MARKER {
        return Err(TcmError::Framing(format!(
            "Incorrect continuation marker {:#04x}",
            chunk[0]
        )));
    }
    if chunk[1] != u8::from(MessageCode::ContinuedRead) {
        return Err(TcmError::Framing(format!(
            "Incorrect continuation code {:#04x}",
            chunk[1]
        )));
    }
    Ok(())
}

/// Append `remaining` more message bytes to `buf`.
///
/// Each chunk arrives prefixed by marker + continued-read status. A one-byte
/// tail is the padding byte and is filled in without touching the bus.
pub async fn read_continued<B: Bus>(
    bus: &mut B,
    buf: &mut BytesMut,
    remaining: usize,
    rd_chunk_size: usize,
) -> Result<(), TcmError> {
    buf.reserve(remaining);
    for xfer in chunk_lengths(remaining, read_chunk_space(rd_chunk_size)) {
        if xfer == 0 {
            continue;
        }
        if xfer == 1 {
            buf.put_u8(MESSAGE_PADDING);
            continue;
        }
        let chunk = bus.read(xfer + READ_CHUNK_OVERHEAD).await?;
        check_continuation(&chunk)?;
        trace!(xfer, "Continued read chunk");
        buf.put_slice(&chunk[READ_CHUNK_OVERHEAD..]);
    }
    Ok(())
}

/// Read exactly `length` bytes, the first two being the marker and code of
/// the leading chunk.
///
/// The first chunk is always a bus read and is kept whole; later chunks are
/// stripped of their continuation header.
pub async fn read_raw<B: Bus>(
    bus: &mut B,
    length: usize,
    rd_chunk_size: usize,
) -> Result<Bytes, TcmError> {
    if length < READ_CHUNK_OVERHEAD {
        return Err(TcmError::InvalidArgument(format!(
            "Raw read length {length} is shorter than a chunk header"
        )));
    }

    let mut buf = BytesMut::with_capacity(length);
    let lengths = chunk_lengths(length - READ_CHUNK_OVERHEAD, read_chunk_space(rd_chunk_size));
    for (idx, xfer) in lengths.into_iter().enumerate() {
        if idx == 0 {
            let chunk = bus.read(xfer + READ_CHUNK_OVERHEAD).await?;
            buf.put_slice(&chunk);
            continue;
        }
        if xfer == 1 {
            buf.put_u8(MESSAGE_PADDING);
            continue;
        }
        let chunk = bus.read(xfer + READ_CHUNK_OVERHEAD).await?;
        check_continuation(&chunk)?;
        buf.put_slice(&chunk[READ_CHUNK_OVERHEAD..]);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_lengths_edges() {
        assert_eq!(chunk_lengths(0, 10), vec![0]);
        assert_eq!(chunk_lengths(0, 0), vec![0]);
        assert_eq!(chunk_lengths(10, 0), vec![10]);
        assert_eq!(chunk_lengths(10, 10), vec![10]);
        assert_eq!(chunk_lengths(11, 10), vec![10, 1]);
        assert_eq!(chunk_lengths(25, 10), vec![10, 10, 5]);
    }

    #[test]
    fn test_write_chunks_prefix() {
        let body: Vec<u8> = (0..7).collect();
        let chunks = encode_write_chunks(0x24, &body, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref(), &[0x24, 0, 1, 2]);
        assert_eq!(chunks[1].as_ref(), &[0x01, 3, 4, 5]);
        assert_eq!(chunks[2].as_ref(), &[0x01, 6]);
    }

    #[test]
    fn test_write_chunks_empty_body() {
        let chunks = encode_write_chunks(0x02, &[], 256);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref(), &[0x02]);
    }

    #[test]
    fn test_unbounded_write() {
        let body = [0xaa; 600];
        let chunks = encode_write_chunks(0x12, &body, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 601);
    }
}
