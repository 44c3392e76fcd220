use crate::constants::HEALTH_INFO_SIZE;
use crate::error::TcmError;
use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Health record carried in LOG reports
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct HealthInfoRaw {
    pub grip_count: U16,
    pub baseline_err: U16,
    pub noise_state: U16,
    pub shield_mode: U16,
    pub reset_reason: U16,
    pub reserved: [u8; 10],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u16)]
pub enum BaselineError {
    None = 0,
    NegativeFinger = 1,
    MutualSelfCap = 2,
    EnergyRatio = 3,
    RxAbsBaseline = 4,
    TxAbsBaseline = 5,

    #[num_enum(catch_all)]
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u16)]
pub enum ShieldMode {
    None = 0,
    Palm = 1,
    Grip = 2,
    Metal = 3,
    Moisture = 4,
    Esd = 5,

    #[num_enum(catch_all)]
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u16)]
pub enum ResetReason {
    None = 0,
    Hard = 1,
    Instruction = 2,
    Parity = 3,
    Watchdog = 4,
    Other = 5,

    #[num_enum(catch_all)]
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HealthInfo {
    pub grip_count: u16,
    pub baseline_err: BaselineError,
    pub noise_state: u16,
    pub shield_mode: ShieldMode,
    pub reset_reason: ResetReason,
}

impl From<HealthInfoRaw> for HealthInfo {
    fn from(raw: HealthInfoRaw) -> Self {
        Self {
            grip_count: raw.grip_count.get(),
            baseline_err: BaselineError::from_primitive(raw.baseline_err.get()),
            noise_state: raw.noise_state.get(),
            shield_mode: ShieldMode::from_primitive(raw.shield_mode.get()),
            reset_reason: ResetReason::from_primitive(raw.reset_reason.get()),
        }
    }
}

impl HealthInfo {
    pub fn parse(payload: &[u8]) -> Result<Self, TcmError> {
        if payload.len() < HEALTH_INFO_SIZE {
            return Err(TcmError::Buffer(format!(
                "Health record needs {HEALTH_INFO_SIZE} bytes, got {}",
                payload.len()
            )));
        }
        let raw = HealthInfoRaw::read_from_bytes(&payload[..HEALTH_INFO_SIZE])
            .map_err(|_| TcmError::Buffer("Invalid health record".to_string()))?;
        Ok(raw.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HealthEvent {
    Grip,
    Baseline(BaselineError),
    Noise,
    Shield(ShieldMode),
    Reset(ResetReason),
}

/// Remembers the last record so only changes are reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthMonitor {
    last: Option<HealthInfo>,
}

impl HealthMonitor {
    pub fn last(&self) -> Option<HealthInfo> {
        self.last
    }

    /// Events raised by `current` compared to the previous snapshot.
    ///
    /// Reset reasons are reported every time they are non-zero.
    pub fn update(&mut self, current: HealthInfo) -> Vec<HealthEvent> {
        let mut events = Vec::new();
        let previous = self.last;
        let changed = |f: fn(&HealthInfo) -> u16| previous.map(|p| f(&p)) != Some(f(&current));

        if current.grip_count != 0 && changed(|h| h.grip_count) {
            events.push(HealthEvent::Grip);
        }
        if !matches!(
            current.baseline_err,
            BaselineError::None | BaselineError::Unknown(_)
        ) && changed(|h| h.baseline_err.into())
        {
            events.push(HealthEvent::Baseline(current.baseline_err));
        }
        if current.noise_state >= 2 && changed(|h| h.noise_state) {
            events.push(HealthEvent::Noise);
        }
        if !matches!(current.shield_mode, ShieldMode::None | ShieldMode::Unknown(_))
            && changed(|h| h.shield_mode.into())
        {
            events.push(HealthEvent::Shield(current.shield_mode));
        }
        if !matches!(
            current.reset_reason,
            ResetReason::None | ResetReason::Unknown(_)
        ) {
            events.push(HealthEvent::Reset(current.reset_reason));
        }

        self.last = Some(current);
        events
    }
}

/// Latest health record together with what changed since the previous one
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HealthSnapshot {
    pub info: HealthInfo,
    pub events: Vec<HealthEvent>,
}
