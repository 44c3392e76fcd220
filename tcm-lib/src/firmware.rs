use crate::bus::Bus;
use crate::constants::WRITE_FLASH_OVERHEAD;
use crate::device::TcmDevice;
use crate::error::TcmError;
use crate::info::{FirmwareMode, FlashGeometry};
use crate::packet::Command;
use bytes::Bytes;
use strum_macros::Display;
use tracing::{debug, info};

/// One region of a firmware image and where it lives in flash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashArea {
    pub flash_addr: u32,
    pub data: Bytes,
}

/// Already-parsed firmware image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareImage {
    pub build_id: u32,
    pub customer_config_id: [u8; 16],
    pub app_firmware: FlashArea,
    pub app_config: FlashArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UpdateOutcome {
    Updated,
    NoUpdateNeeded,
}

/// ERASE_FLASH payload; the short form is used when both values fit a byte.
pub fn erase_payload(page_start: u16, page_count: u16) -> Vec<u8> {
    if page_start > 0xff || page_count > 0xff {
        let [start_lo, start_hi] = page_start.to_le_bytes();
        let [count_lo, count_hi] = page_count.to_le_bytes();
        vec![start_lo, start_hi, count_lo, count_hi]
    } else {
        vec![page_start as u8, page_count as u8]
    }
}

/// Bytes carried by one WRITE_FLASH transfer; a chunk size of 0 is unbounded.
pub fn write_transfer_size(wr_chunk_size: usize, geometry: &FlashGeometry) -> usize {
    let mut size = match wr_chunk_size {
        0 => usize::MAX,
        n => n.saturating_sub(WRITE_FLASH_OVERHEAD),
    };
    if geometry.write_block_size != 0 {
        size -= size % geometry.write_block_size;
    }
    if geometry.max_write_payload_size != 0 {
        size = size.min(geometry.max_write_payload_size);
    }
    size
}

impl<B: Bus> TcmDevice<B> {
    pub async fn erase_flash(&self, page_start: u16, page_count: u16) -> Result<(), TcmError> {
        debug!(page_start, page_count, "Erasing flash");
        self.send_command(Command::EraseFlash, &erase_payload(page_start, page_count))
            .await?;
        Ok(())
    }

    /// Program `data` at byte `address`, one block-aligned transfer at a time.
    pub async fn write_flash(
        &self,
        address: u32,
        data: &[u8],
        geometry: &FlashGeometry,
    ) -> Result<(), TcmError> {
        let wr_chunk_size = self.inner.link.lock().await.wr_chunk_size();
        let transfer = write_transfer_size(wr_chunk_size, geometry);
        if transfer == 0 || geometry.write_block_size == 0 {
            return Err(TcmError::InvalidArgument(format!(
                "No room for flash data (chunk {wr_chunk_size}, block {})",
                geometry.write_block_size
            )));
        }

        let mut offset = 0;
        for chunk in data.chunks(transfer) {
            let block = (address as usize + offset) / geometry.write_block_size;
            let block = u16::try_from(block).map_err(|_| {
                TcmError::InvalidArgument(format!("Flash block {block} out of range"))
            })?;
            let mut payload = Vec::with_capacity(chunk.len() + 2);
            payload.extend_from_slice(&block.to_le_bytes());
            payload.extend_from_slice(chunk);
            self.send_command(Command::WriteFlash, &payload).await?;
            offset += chunk.len();
        }
        debug!(address, length = data.len(), "Flash written");
        Ok(())
    }

    async fn program_area(
        &self,
        region: &str,
        area: &FlashArea,
        geometry: &FlashGeometry,
    ) -> Result<(), TcmError> {
        let page_start = area.flash_addr as usize / geometry.page_size;
        let page_count = area.data.len().div_ceil(geometry.page_size);
        let (Ok(page_start), Ok(page_count)) = (u16::try_from(page_start), u16::try_from(page_count))
        else {
            return Err(TcmError::InvalidArgument(format!(
                "{region} spans pages beyond the erase range"
            )));
        };

        info!(region, page_start, page_count, "Erasing");
        self.erase_flash(page_start, page_count).await?;
        info!(region, length = area.data.len(), "Writing");
        self.write_flash(area.flash_addr, &area.data, geometry).await
    }

    /// Reflash application firmware and config from `image`.
    ///
    /// Without `force` nothing is written when the device already runs the
    /// same build and customer config.
    pub async fn update_firmware(
        &self,
        image: &FirmwareImage,
        force: bool,
    ) -> Result<UpdateOutcome, TcmError> {
        if !force {
            let build_id = self.identity().build_id;
            let config_id = self.app_info().customer_config_id;
            if build_id == image.build_id && config_id == image.customer_config_id {
                info!(build_id, "Firmware up to date");
                return Ok(UpdateOutcome::NoUpdateNeeded);
            }
        }
        if image.app_firmware.data.is_empty() {
            return Err(TcmError::InvalidArgument(
                "Image has no application firmware".to_string(),
            ));
        }

        let identity = self.identify(true).await?;
        if identity.mode == FirmwareMode::Application {
            self.switch_mode(FirmwareMode::Bootloader).await?;
        }

        let geometry = self.boot_info().geometry();
        let wr_chunk_size = self.inner.link.lock().await.wr_chunk_size();
        if geometry.write_block_size == 0 || geometry.page_size == 0 {
            return Err(TcmError::InvalidArgument(
                "Bootloader reported empty flash geometry".to_string(),
            ));
        }
        if wr_chunk_size != 0
            && geometry.write_block_size > wr_chunk_size.saturating_sub(WRITE_FLASH_OVERHEAD)
        {
            return Err(TcmError::InvalidArgument(format!(
                "Write block of {} bytes exceeds chunk size {wr_chunk_size}",
                geometry.write_block_size
            )));
        }

        info!(
            from = identity.build_id,
            to = image.build_id,
            "Updating firmware"
        );
        self.program_area("application firmware", &image.app_firmware, &geometry)
            .await?;
        if !image.app_config.data.is_empty() {
            self.program_area("application config", &image.app_config, &geometry)
                .await?;
        }
        Ok(UpdateOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_payload_width() {
        assert_eq!(erase_payload(2, 16), vec![2, 16]);
        assert_eq!(erase_payload(0x100, 2), vec![0x00, 0x01, 0x02, 0x00]);
        assert_eq!(erase_payload(3, 0x120), vec![0x03, 0x00, 0x20, 0x01]);
    }

    #[test]
    fn test_transfer_size_block_aligned() {
        let geometry = FlashGeometry {
            write_block_size: 16,
            page_size: 4096,
            max_write_payload_size: 0,
        };
        assert_eq!(write_transfer_size(256, &geometry), 240);

        let capped = FlashGeometry {
            max_write_payload_size: 128,
            ..geometry
        };
        assert_eq!(write_transfer_size(256, &capped), 128);
        assert_eq!(write_transfer_size(4, &geometry), 0);
        assert_eq!(write_transfer_size(0, &capped), 128);
    }
}
