use crate::touch::{GestureId, TouchData};
use strum_macros::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Host-level gesture classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GestureKind {
    #[default]
    Unknown,
    DoubleTap,
    SingleTap,
    LeftToRightSwipe,
    RightToLeftSwipe,
    UpToDownSwipe,
    DownToUpSwipe,
    DoubleSwipe,
    Circle,
    Heart,
    UpVee,
    DownVee,
    LeftVee,
    RightVee,
    M,
    W,
    S,
    FingerprintDown,
    FingerprintUp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Decoded gesture: kind, rotation and the trace points
/// (start, end, then four intermediate points).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GestureInfo {
    pub kind: GestureKind,
    /// `None` when the gesture carries no rotation
    pub clockwise: Option<bool>,
    pub points: [Point; 6],
}

fn rotation(info: &[u8]) -> Option<bool> {
    match info[2] {
        0x10 => Some(true),
        0x20 => Some(false),
        _ => None,
    }
}

fn le16(buf: &[u8], at: usize) -> u32 {
    u16::from_le_bytes([buf[at], buf[at + 1]]) as u32
}

impl GestureInfo {
    pub fn from_touch_data(data: &TouchData) -> Self {
        let info = &data.extra_gesture_info;
        let mut clockwise = None;
        let kind = match data.gesture() {
            GestureId::DoubleTap => GestureKind::DoubleTap,
            GestureId::Circle => {
                clockwise = rotation(info);
                GestureKind::Circle
            }
            GestureId::Heart => {
                clockwise = rotation(info);
                GestureKind::Heart
            }
            GestureId::Swipe => match info[4] {
                0x41 => GestureKind::LeftToRightSwipe,
                0x42 => GestureKind::RightToLeftSwipe,
                0x44 => GestureKind::UpToDownSwipe,
                0x48 => GestureKind::DownToUpSwipe,
                0x81 | 0x82 | 0x84 | 0x88 => GestureKind::DoubleSwipe,
                _ => GestureKind::Unknown,
            },
            GestureId::Vee => match info[2] {
                0x02 => GestureKind::UpVee,
                0x01 => GestureKind::DownVee,
                0x08 => GestureKind::LeftVee,
                0x04 => GestureKind::RightVee,
                _ => GestureKind::Unknown,
            },
            GestureId::UnicodeM => GestureKind::M,
            GestureId::UnicodeW => GestureKind::W,
            GestureId::UnicodeS => GestureKind::S,
            GestureId::SingleTap => GestureKind::SingleTap,
            GestureId::TouchHoldDown => GestureKind::FingerprintDown,
            GestureId::TouchHoldUp => GestureKind::FingerprintUp,
            _ => GestureKind::Unknown,
        };

        let mut points = [Point::default(); 6];
        if kind != GestureKind::Unknown {
            for (idx, point) in points.iter_mut().enumerate() {
                point.x = le16(&data.data_point, idx * 4);
                point.y = le16(&data.data_point, idx * 4 + 2);
            }
        }
        if kind == GestureKind::SingleTap {
            points[0] = Point {
                x: le16(info, 0),
                y: le16(info, 2),
            };
        }

        Self {
            kind,
            clockwise,
            points,
        }
    }

    /// Rescale every point from the firmware range to the host panel
    pub fn scaled(mut self, host: (u32, u32), chip: (u32, u32)) -> Self {
        for point in self.points.iter_mut() {
            if chip.0 != 0 && chip.0 != host.0 {
                point.x = ((point.x as u64 * host.0 as u64) / chip.0 as u64) as u32;
            }
            if chip.1 != 0 && chip.1 != host.1 {
                point.y = ((point.y as u64 * host.1 as u64) / chip.1 as u64) as u32;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FingerprintState {
    Down,
    Up,
}

/// Under-display fingerprint area event from a touch-hold gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FingerprintInfo {
    pub state: FingerprintState,
    pub x: u32,
    pub y: u32,
    pub area_rate: u32,
}

impl FingerprintInfo {
    pub fn from_touch_data(data: &TouchData) -> Option<Self> {
        let info = &data.extra_gesture_info;
        let state = match data.gesture() {
            GestureId::TouchHoldDown => FingerprintState::Down,
            GestureId::TouchHoldUp => FingerprintState::Up,
            _ => return None,
        };
        Some(Self {
            state,
            x: le16(info, 0),
            y: le16(info, 2),
            area_rate: le16(info, 4),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gesture(id: GestureId, info: &[u8]) -> TouchData {
        let mut data = TouchData::new(1);
        data.gesture_id = u8::from(id) as u32;
        data.extra_gesture_info[..info.len()].copy_from_slice(info);
        for (idx, byte) in data.data_point.iter_mut().enumerate() {
            *byte = idx as u8;
        }
        data
    }

    #[test]
    fn test_swipe_directions() {
        let cases = [
            (0x41, GestureKind::LeftToRightSwipe),
            (0x42, GestureKind::RightToLeftSwipe),
            (0x44, GestureKind::UpToDownSwipe),
            (0x48, GestureKind::DownToUpSwipe),
            (0x84, GestureKind::DoubleSwipe),
            (0x00, GestureKind::Unknown),
        ];
        for (direction, kind) in cases {
            let data = gesture(GestureId::Swipe, &[0, 0, 0, 0, direction]);
            assert_eq!(GestureInfo::from_touch_data(&data).kind, kind);
        }
    }

    #[test]
    fn test_circle_rotation() {
        let data = gesture(GestureId::Circle, &[0, 0, 0x10]);
        let info = GestureInfo::from_touch_data(&data);
        assert_eq!(info.kind, GestureKind::Circle);
        assert_eq!(info.clockwise, Some(true));

        let data = gesture(GestureId::Heart, &[0, 0, 0x20]);
        assert_eq!(GestureInfo::from_touch_data(&data).clockwise, Some(false));
    }

    #[test]
    fn test_points_from_coordinate_blob() {
        let data = gesture(GestureId::DoubleTap, &[]);
        let info = GestureInfo::from_touch_data(&data);
        assert_eq!(info.points[0], Point { x: 0x0100, y: 0x0302 });
        assert_eq!(info.points[5], Point { x: 0x1514, y: 0x1716 });
    }

    #[test]
    fn test_single_tap_uses_info_bytes() {
        let data = gesture(GestureId::SingleTap, &[0x10, 0x00, 0x20, 0x00]);
        let info = GestureInfo::from_touch_data(&data);
        assert_eq!(info.points[0], Point { x: 0x10, y: 0x20 });
    }

    #[test]
    fn test_unknown_gesture_has_no_points() {
        let data = gesture(GestureId::Triangle, &[]);
        let info = GestureInfo::from_touch_data(&data);
        assert_eq!(info.kind, GestureKind::Unknown);
        assert_eq!(info.points, [Point::default(); 6]);
    }

    #[test]
    fn test_fingerprint_down() {
        let data = gesture(GestureId::TouchHoldDown, &[0x2c, 0x01, 0x90, 0x01, 0x32, 0x00]);
        let fp = FingerprintInfo::from_touch_data(&data).unwrap();
        assert_eq!(fp.state, FingerprintState::Down);
        assert_eq!((fp.x, fp.y, fp.area_rate), (300, 400, 50));
        assert!(FingerprintInfo::from_touch_data(&gesture(GestureId::Vee, &[])).is_none());
    }
}
