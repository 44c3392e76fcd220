use crate::constants::*;
use crate::error::TcmError;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Response deadlines in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ResponseTimeouts {
    pub default_ms: u64,
    /// Quick configuration commands (dynamic config get/set)
    pub short_ms: u64,
    /// Production tests
    pub long_ms: u64,
    pub erase_flash_ms: u64,
    pub write_flash_ms: u64,
    /// Per report when collecting test reports
    pub report_ms: u64,
}

impl Default for ResponseTimeouts {
    fn default() -> Self {
        Self {
            default_ms: RESPONSE_TIMEOUT_MS_DEFAULT,
            short_ms: RESPONSE_TIMEOUT_MS_SHORT,
            long_ms: RESPONSE_TIMEOUT_MS_LONG,
            erase_flash_ms: ERASE_FLASH_TIMEOUT_MS,
            write_flash_ms: WRITE_FLASH_TIMEOUT_MS,
            report_ms: REPORT_TIMEOUT_MS,
        }
    }
}

/// Host panel resolution used to scale firmware coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Resolution {
    pub max_x: u32,
    pub max_y: u32,
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TcmConfig {
    /// Largest single bus read, 0 for unbounded
    pub read_chunk_size: usize,
    /// Largest single bus write, 0 for unbounded
    pub write_chunk_size: usize,
    /// Floor and initial size of the predictive read window
    pub min_read_length: usize,
    /// Capacity of the object slot table
    pub max_objects: usize,
    pub max_response_length: usize,
    pub timeouts: ResponseTimeouts,
    pub app_status_poll_timeout_ms: u64,
    pub app_status_poll_interval_ms: u64,
    /// Idle back-off between reads while a command waits for its response
    pub response_poll_interval_ms: u64,
    pub resolution: Option<Resolution>,
}

impl Default for TcmConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: RD_CHUNK_SIZE,
            write_chunk_size: WR_CHUNK_SIZE,
            min_read_length: MIN_READ_LENGTH,
            max_objects: 10,
            max_response_length: MAX_RESPONSE_LENGTH,
            timeouts: ResponseTimeouts::default(),
            app_status_poll_timeout_ms: APP_STATUS_POLL_TIMEOUT_MS,
            app_status_poll_interval_ms: APP_STATUS_POLL_MS,
            response_poll_interval_ms: 2,
            resolution: None,
        }
    }
}

impl TcmConfig {
    pub fn validate(&self) -> Result<(), TcmError> {
        if self.read_chunk_size != 0 && self.read_chunk_size <= MESSAGE_HEADER_SIZE {
            return Err(TcmError::Config(format!(
                "read_chunk_size {} cannot hold a message header",
                self.read_chunk_size
            )));
        }
        if self.write_chunk_size != 0 && self.write_chunk_size <= WRITE_CHUNK_OVERHEAD {
            return Err(TcmError::Config(format!(
                "write_chunk_size {} leaves no room for data",
                self.write_chunk_size
            )));
        }
        if self.min_read_length < MESSAGE_HEADER_SIZE {
            return Err(TcmError::Config(format!(
                "min_read_length {} is shorter than a message header",
                self.min_read_length
            )));
        }
        if self.max_objects == 0 || self.max_objects > MAX_OBJECT_SLOTS {
            return Err(TcmError::Config(format!(
                "max_objects must be within 1..={MAX_OBJECT_SLOTS}, got {}",
                self.max_objects
            )));
        }
        if self.max_response_length == 0 {
            return Err(TcmError::Config("max_response_length must not be 0".to_string()));
        }
        if self.timeouts.default_ms == 0 {
            return Err(TcmError::Config("default response timeout must not be 0".to_string()));
        }
        if let Some(res) = self.resolution {
            if res.max_x == 0 || res.max_y == 0 {
                return Err(TcmError::Config(format!(
                    "resolution {}x{} must be non-zero",
                    res.max_x, res.max_y
                )));
            }
        }
        Ok(())
    }

    /// First predictive read window
    pub fn initial_read_length(&self) -> usize {
        if self.read_chunk_size == 0 {
            self.min_read_length
        } else {
            self.min_read_length.min(self.read_chunk_size)
        }
    }
}
