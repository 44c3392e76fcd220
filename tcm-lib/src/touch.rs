use crate::config::Resolution;
use crate::constants::OBJECT_LIFT;
use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const GESTURE_INFO_SIZE: usize = 8;
pub const GESTURE_POINTS_SIZE: usize = 24;

/// One contact slot of a decoded touch report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObjectData {
    /// Classification; 0 means lifted
    pub status: u32,
    pub x_pos: u32,
    pub y_pos: u32,
    pub x_width: u32,
    pub y_width: u32,
    pub z: u32,
    pub tx_pos: u32,
    pub rx_pos: u32,
    pub ey_width: u8,
    pub ex_width: u8,
    pub y_e_ratio: u8,
    pub x_e_ratio: u8,
}

/// Everything one TOUCH report decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TouchData {
    pub timestamp: u32,
    pub buttons_state: u32,
    pub gesture_id: u32,
    pub extra_gesture_info: [u8; GESTURE_INFO_SIZE],
    pub data_point: [u8; GESTURE_POINTS_SIZE],
    pub frame_rate: u32,
    pub power_im: u32,
    pub cid_im: u32,
    pub rail_im: u32,
    pub cid_variance_im: u32,
    pub nsm_frequency: u32,
    pub nsm_state: u32,
    pub num_of_active_objects: u32,
    pub num_of_cpu_cycles: u32,
    /// Slot table, `max_objects` entries
    pub objects: Vec<ObjectData>,
    /// Bit per slot written during the decode
    pub touched: u32,
}

impl TouchData {
    pub fn new(max_objects: usize) -> Self {
        Self {
            timestamp: 0,
            buttons_state: 0,
            gesture_id: 0,
            extra_gesture_info: [0; GESTURE_INFO_SIZE],
            data_point: [0; GESTURE_POINTS_SIZE],
            frame_rate: 0,
            power_im: 0,
            cid_im: 0,
            rail_im: 0,
            cid_variance_im: 0,
            nsm_frequency: 0,
            nsm_state: 0,
            num_of_active_objects: 0,
            num_of_cpu_cycles: 0,
            objects: vec![ObjectData::default(); max_objects],
            touched: 0,
        }
    }

    pub fn max_objects(&self) -> usize {
        self.objects.len()
    }

    /// Mutable slot, marking it touched
    pub fn object_mut(&mut self, index: usize) -> Option<&mut ObjectData> {
        let object = self.objects.get_mut(index)?;
        self.touched |= 1 << index;
        Some(object)
    }

    /// Slots written by the last decode, with their index
    pub fn records(&self) -> impl Iterator<Item = (usize, &ObjectData)> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.touched & (1 << idx) != 0)
    }

    pub fn gesture(&self) -> GestureId {
        GestureId::from_primitive(self.gesture_id as u8)
    }
}

/// Gesture identifiers reported in the gesture-id field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum GestureId {
    None = 0x00,
    DoubleTap = 0x01,
    Swipe = 0x02,
    Triangle = 0x03,
    Circle = 0x04,
    Vee = 0x05,
    Heart = 0x06,
    TouchHoldUp = 0x07,
    TouchHoldDown = 0x08,
    SingleTap = 0x10,
    UnicodeM = 0x6d,
    UnicodeS = 0x73,
    UnicodeW = 0x77,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl GestureId {
    pub fn is_touch_hold(&self) -> bool {
        matches!(self, GestureId::TouchHoldUp | GestureId::TouchHoldDown)
    }
}

/// Host-facing view of one contact
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TouchPoint {
    pub slot: usize,
    /// False for the one report that announces a lift
    pub down: bool,
    pub x: u32,
    pub y: u32,
    pub touch_major: u32,
    pub width_major: u32,
    pub tx_press: u8,
    pub rx_press: u8,
    pub tx_er: u8,
    pub rx_er: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TouchPoints {
    pub attention: u32,
    pub points: Vec<TouchPoint>,
}

/// Tracks which slots the host still believes are down.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttentionTracker {
    attention: u32,
}

fn scale(value: u32, host_max: u32, chip_max: u32) -> u32 {
    if chip_max == 0 || host_max == chip_max {
        value
    } else {
        ((value as u64 * host_max as u64) / chip_max as u64) as u32
    }
}

impl AttentionTracker {
    pub fn attention(&self) -> u32 {
        self.attention
    }

    /// Report active slots, and each lifted slot once more before forgetting
    /// it.
    ///
    /// `chip_max` is the firmware's coordinate range (`max_x + 1`,
    /// `max_y + 1`); with a host `resolution` coordinates are rescaled.
    pub fn points(
        &mut self,
        data: &TouchData,
        resolution: Option<Resolution>,
        chip_max: (u32, u32),
    ) -> TouchPoints {
        let mut points = Vec::new();
        for (idx, object) in data.objects.iter().enumerate() {
            let bit = 1u32 << idx;
            let down = object.status != OBJECT_LIFT;
            if down {
                self.attention |= bit;
            } else if self.attention & bit == 0 {
                continue;
            } else {
                self.attention &= !bit;
            }

            let (x, y) = match resolution {
                Some(res) => (
                    scale(object.x_pos, res.max_x, chip_max.0),
                    scale(object.y_pos, res.max_y, chip_max.1),
                ),
                None => (object.x_pos, object.y_pos),
            };
            points.push(TouchPoint {
                slot: idx,
                down,
                x,
                y,
                touch_major: object.x_width.max(object.y_width),
                width_major: object.x_width.min(object.y_width),
                tx_press: object.ex_width,
                rx_press: object.ey_width,
                tx_er: object.x_e_ratio,
                rx_er: object.y_e_ratio,
            });
        }
        TouchPoints {
            attention: self.attention,
            points,
        }
    }
}
