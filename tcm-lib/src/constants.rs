// Protocol constants for the TouchComm message layer

/// First byte of every message read from the device
pub const MESSAGE_MARKER: u8 = 0xA5;

/// Trailing byte after every message payload
pub const MESSAGE_PADDING: u8 = 0x5A;

/// Size of the message header: marker, code and 16-bit length (4 bytes)
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// Bytes a read chunk spends on marker + status code
pub const READ_CHUNK_OVERHEAD: usize = 2;

/// Bytes a write chunk spends on the command / continuation byte
pub const WRITE_CHUNK_OVERHEAD: usize = 1;

/// Bytes of the length field prefixed to every command payload
pub const COMMAND_LENGTH_SIZE: usize = 2;

/// Smallest predictive read window
pub const MIN_READ_LENGTH: usize = 9;

/// Default bus chunk sizes
pub const RD_CHUNK_SIZE: usize = 256;
pub const WR_CHUNK_SIZE: usize = 256;

/// Flash write framing: command byte, two length bytes and a two-byte block address
pub const WRITE_FLASH_OVERHEAD: usize = 5;

/// Smallest touch report configuration the firmware must accept
pub const TOUCH_REPORT_CONFIG_SIZE: usize = 32;

/// Upper bound for the object slot table (attention mask is 32 bits wide)
pub const MAX_OBJECT_SLOTS: usize = 32;

/// Classification value of a lifted object
pub const OBJECT_LIFT: u32 = 0;

/// Minimum LOG report payload carrying a health record
pub const HEALTH_INFO_SIZE: usize = 20;

/// Default response timeouts (milliseconds)
pub const RESPONSE_TIMEOUT_MS_DEFAULT: u64 = 1000;
pub const RESPONSE_TIMEOUT_MS_SHORT: u64 = 300;
pub const RESPONSE_TIMEOUT_MS_LONG: u64 = 3000;
pub const ERASE_FLASH_TIMEOUT_MS: u64 = 5000;
pub const WRITE_FLASH_TIMEOUT_MS: u64 = 200;
pub const REPORT_TIMEOUT_MS: u64 = 1000;

/// Application status polling while the firmware boots
pub const APP_STATUS_POLL_TIMEOUT_MS: u64 = 1000;
pub const APP_STATUS_POLL_MS: u64 = 100;

/// Upper bound for a single command response
pub const MAX_RESPONSE_LENGTH: usize = 64 * 1024;
