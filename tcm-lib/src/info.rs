use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum FirmwareMode {
    #[strum(to_string = "unknown")]
    None = 0x00,
    #[strum(to_string = "application")]
    Application = 0x01,
    #[strum(to_string = "host download")]
    HostDownload = 0x02,
    #[strum(to_string = "bootloader")]
    Bootloader = 0x0b,
    #[strum(to_string = "TDDI bootloader")]
    TddiBootloader = 0x0c,
    #[strum(to_string = "production test")]
    ProductionTest = 0x0e,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Default for FirmwareMode {
    fn default() -> Self {
        FirmwareMode::None
    }
}

impl FirmwareMode {
    /// Modes in which the device is expected to stay without recovery
    pub fn is_operational(&self) -> bool {
        matches!(self, FirmwareMode::Application | FirmwareMode::HostDownload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u16)]
pub enum AppStatus {
    Ok = 0x00,
    Booting = 0x01,
    Updating = 0x02,
    BadAppConfig = 0xff,

    #[num_enum(catch_all)]
    Unknown(u16),
}

impl Default for AppStatus {
    fn default() -> Self {
        AppStatus::Ok
    }
}

/// Copy `payload` into a zeroed record, truncating or zero-filling.
pub(crate) fn read_record<T: FromBytes + IntoBytes + FromZeros>(payload: &[u8]) -> T {
    let mut record = T::new_zeroed();
    let bytes = record.as_mut_bytes();
    let len = bytes.len().min(payload.len());
    bytes[..len].copy_from_slice(&payload[..len]);
    record
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct IdentifyInfoRaw {
    pub version: u8,
    pub mode: u8,
    pub part_number: [u8; 16],
    pub build_id: U32,
    pub max_write_size: U16,
}

/// Identity announced by the firmware after every reset and in response to
/// the identify command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IdentifyInfo {
    pub version: u8,
    pub mode: FirmwareMode,
    pub part_number: String,
    pub build_id: u32,
    pub max_write_size: u16,
}

fn ascii_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

impl From<IdentifyInfoRaw> for IdentifyInfo {
    fn from(raw: IdentifyInfoRaw) -> Self {
        Self {
            version: raw.version,
            mode: FirmwareMode::from_primitive(raw.mode),
            part_number: ascii_field(&raw.part_number),
            build_id: raw.build_id.get(),
            max_write_size: raw.max_write_size.get(),
        }
    }
}

impl IdentifyInfo {
    pub fn parse(payload: &[u8]) -> Self {
        read_record::<IdentifyInfoRaw>(payload).into()
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AppInfoRaw {
    pub version: U16,
    pub status: U16,
    pub static_config_size: U16,
    pub dynamic_config_size: U16,
    pub app_config_start_write_block: U16,
    pub app_config_size: U16,
    pub max_touch_report_config_size: U16,
    pub max_touch_report_payload_size: U16,
    pub customer_config_id: [u8; 16],
    pub max_x: U16,
    pub max_y: U16,
    pub max_objects: U16,
    pub num_of_buttons: U16,
    pub num_of_image_rows: U16,
    pub num_of_image_cols: U16,
    pub has_hybrid_data: U16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AppInfo {
    pub version: u16,
    pub status: AppStatus,
    pub static_config_size: u16,
    pub dynamic_config_size: u16,
    pub app_config_start_write_block: u16,
    pub app_config_size: u16,
    pub max_touch_report_config_size: u16,
    pub max_touch_report_payload_size: u16,
    pub customer_config_id: [u8; 16],
    pub max_x: u16,
    pub max_y: u16,
    pub max_objects: u16,
    pub num_of_buttons: u16,
    pub num_of_image_rows: u16,
    pub num_of_image_cols: u16,
    pub has_hybrid_data: bool,
}

impl From<AppInfoRaw> for AppInfo {
    fn from(raw: AppInfoRaw) -> Self {
        Self {
            version: raw.version.get(),
            status: AppStatus::from_primitive(raw.status.get()),
            static_config_size: raw.static_config_size.get(),
            dynamic_config_size: raw.dynamic_config_size.get(),
            app_config_start_write_block: raw.app_config_start_write_block.get(),
            app_config_size: raw.app_config_size.get(),
            max_touch_report_config_size: raw.max_touch_report_config_size.get(),
            max_touch_report_payload_size: raw.max_touch_report_payload_size.get(),
            customer_config_id: raw.customer_config_id,
            max_x: raw.max_x.get(),
            max_y: raw.max_y.get(),
            max_objects: raw.max_objects.get(),
            num_of_buttons: raw.num_of_buttons.get(),
            num_of_image_rows: raw.num_of_image_rows.get(),
            num_of_image_cols: raw.num_of_image_cols.get(),
            has_hybrid_data: raw.has_hybrid_data.get() != 0,
        }
    }
}

impl AppInfo {
    pub fn parse(payload: &[u8]) -> Self {
        read_record::<AppInfoRaw>(payload).into()
    }

    /// Firmware coordinate range (`max + 1` on each axis)
    pub fn coordinate_range(&self) -> (u32, u32) {
        (self.max_x as u32 + 1, self.max_y as u32 + 1)
    }
}

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct BootInfoRaw {
    pub version: u8,
    pub status: u8,
    pub asic_id: [u8; 2],
    pub write_block_size_words: u8,
    pub erase_page_size_words: U16,
    pub max_write_payload_size: U16,
    pub last_reset_reason: u8,
    pub pc_at_time_of_last_reset: U16,
    pub boot_config_start_block: U16,
    pub boot_config_size_blocks: U16,
    pub display_config_start_block: U32,
    pub display_config_length_blocks: U16,
    pub backup_display_config_start_block: U32,
    pub backup_display_config_length_blocks: U16,
    pub custom_otp_start_block: U16,
    pub custom_otp_length_blocks: U16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BootInfo {
    pub version: u8,
    pub status: u8,
    pub asic_id: u16,
    pub write_block_size_words: u8,
    pub erase_page_size_words: u16,
    pub max_write_payload_size: u16,
    pub last_reset_reason: u8,
    pub pc_at_time_of_last_reset: u16,
    pub boot_config_start_block: u16,
    pub boot_config_size_blocks: u16,
    pub display_config_start_block: u32,
    pub display_config_length_blocks: u16,
    pub backup_display_config_start_block: u32,
    pub backup_display_config_length_blocks: u16,
    pub custom_otp_start_block: u16,
    pub custom_otp_length_blocks: u16,
}

impl From<BootInfoRaw> for BootInfo {
    fn from(raw: BootInfoRaw) -> Self {
        Self {
            version: raw.version,
            status: raw.status,
            asic_id: u16::from_le_bytes(raw.asic_id),
            write_block_size_words: raw.write_block_size_words,
            erase_page_size_words: raw.erase_page_size_words.get(),
            max_write_payload_size: raw.max_write_payload_size.get(),
            last_reset_reason: raw.last_reset_reason,
            pc_at_time_of_last_reset: raw.pc_at_time_of_last_reset.get(),
            boot_config_start_block: raw.boot_config_start_block.get(),
            boot_config_size_blocks: raw.boot_config_size_blocks.get(),
            display_config_start_block: raw.display_config_start_block.get(),
            display_config_length_blocks: raw.display_config_length_blocks.get(),
            backup_display_config_start_block: raw.backup_display_config_start_block.get(),
            backup_display_config_length_blocks: raw.backup_display_config_length_blocks.get(),
            custom_otp_start_block: raw.custom_otp_start_block.get(),
            custom_otp_length_blocks: raw.custom_otp_length_blocks.get(),
        }
    }
}

impl BootInfo {
    pub fn parse(payload: &[u8]) -> Self {
        read_record::<BootInfoRaw>(payload).into()
    }

    /// Flash geometry in bytes
    pub fn geometry(&self) -> FlashGeometry {
        FlashGeometry {
            write_block_size: self.write_block_size_words as usize * 2,
            page_size: self.erase_page_size_words as usize * 2,
            max_write_payload_size: self.max_write_payload_size as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    pub write_block_size: usize,
    pub page_size: usize,
    pub max_write_payload_size: usize,
}
