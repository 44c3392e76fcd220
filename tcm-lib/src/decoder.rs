//! Interpreter for touch report configuration programs.
//!
//! A program is a byte stream of opcodes, most followed by one operand byte
//! holding the bit width of the field they extract. The bit cursor into the
//! report only moves forward; loop bodies are re-run by rewinding the
//! program counter.

use crate::bits::{get_bits, get_bytes};
use crate::error::TcmError;
use crate::touch::TouchData;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    End = 0,
    ForeachActiveObject = 1,
    ForeachObject = 2,
    ForeachEnd = 3,
    PadToNextByte = 4,
    Timestamp = 5,
    ObjectNIndex = 6,
    ObjectNClassification = 7,
    ObjectNXPosition = 8,
    ObjectNYPosition = 9,
    ObjectNZ = 10,
    ObjectNXWidth = 11,
    ObjectNYWidth = 12,
    ObjectNTxPosition = 13,
    ObjectNRxPosition = 14,
    Buttons0DState = 15,
    GestureDoubleTap = 16,
    FrameRate = 17,
    PowerIm = 18,
    CidIm = 19,
    RailIm = 20,
    CidVarianceIm = 21,
    NsmFrequency = 22,
    NsmState = 23,
    NumOfActiveObjects = 24,
    NumOfCpuCycles = 25,
    TuningGaussianWidths = 0x80,
    TuningSmallObjectParams = 0x81,
    TuningButtonsVariance = 0x82,
    GestureSwipe = 193,
    GestureCircle = 194,
    GestureUnicode = 195,
    GestureVee = 196,
    GestureTriangle = 197,
    GestureInfo = 198,
    GestureCoordinate = 199,
    CustomerGripInfo = 203,

    #[num_enum(catch_all)]
    Unknown(u8),
}

impl Opcode {
    /// Opcodes followed by a bit-width operand
    pub fn has_operand(&self) -> bool {
        !matches!(
            self,
            Opcode::End
                | Opcode::ForeachActiveObject
                | Opcode::ForeachObject
                | Opcode::ForeachEnd
                | Opcode::PadToNextByte
                | Opcode::Unknown(_)
        )
    }
}

/// Builder for report configuration programs.
#[derive(Debug, Clone, Default)]
pub struct DecodeProgram {
    buf: BytesMut,
}

impl DecodeProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, opcode: Opcode) -> Self {
        self.buf.put_u8(opcode.into());
        self
    }

    pub fn field(mut self, opcode: Opcode, bits: u8) -> Self {
        self.buf.put_u8(opcode.into());
        self.buf.put_u8(bits);
        self
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }

    /// Layout used while the host is awake
    pub fn normal() -> Bytes {
        Self::new()
            .field(Opcode::GestureDoubleTap, 8)
            .field(Opcode::GestureInfo, 48)
            .op(Opcode::ForeachActiveObject)
            .field(Opcode::ObjectNIndex, 4)
            .field(Opcode::ObjectNClassification, 4)
            .field(Opcode::ObjectNXPosition, 16)
            .field(Opcode::ObjectNYPosition, 16)
            .field(Opcode::ObjectNXWidth, 12)
            .field(Opcode::ObjectNYWidth, 12)
            .field(Opcode::CustomerGripInfo, 32)
            .op(Opcode::ForeachEnd)
            .op(Opcode::End)
            .build()
    }

    /// Layout used while suspended, carrying gesture coordinates
    pub fn gesture() -> Bytes {
        Self::new()
            .field(Opcode::GestureDoubleTap, 8)
            .field(Opcode::GestureInfo, 48)
            .field(Opcode::GestureCoordinate, 192)
            .op(Opcode::ForeachActiveObject)
            .field(Opcode::ObjectNIndex, 4)
            .field(Opcode::ObjectNClassification, 4)
            .field(Opcode::ObjectNXPosition, 16)
            .field(Opcode::ObjectNYPosition, 16)
            .op(Opcode::ForeachEnd)
            .op(Opcode::End)
            .build()
    }
}

/// Loop bookkeeping; loops never nest
#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    body_start: usize,
    active_only: bool,
    processed: u32,
    bit_offset_at_start: usize,
}

struct Interpreter<'a> {
    program: &'a [u8],
    report: &'a [u8],
    pc: usize,
    offset: usize,
    object: usize,
    active_objects: Option<u32>,
    frame: Option<LoopFrame>,
    data: TouchData,
}

impl<'a> Interpreter<'a> {
    fn report_bits(&self) -> usize {
        self.report.len() * 8
    }

    fn operand(&mut self, opcode: Opcode) -> Result<usize, TcmError> {
        let bits = *self.program.get(self.pc).ok_or_else(|| {
            TcmError::Decode(format!("Program ends before operand of {opcode}"))
        })?;
        self.pc += 1;
        Ok(bits as usize)
    }

    /// Scalar field; wider fields must be whole bytes and keep their low
    /// 32 bits.
    fn scalar(&mut self, opcode: Opcode) -> Result<u32, TcmError> {
        let bits = self.operand(opcode)?;
        let value = if bits > 32 {
            let mut raw = [0u8; 4];
            self.blob_bits(opcode, bits, &mut raw)?;
            u32::from_le_bytes(raw)
        } else {
            get_bits(self.report, self.offset, bits)
        };
        self.offset += bits;
        Ok(value)
    }

    /// Copy a field into `dest`, little-endian, truncating to its length.
    fn blob_bits(&self, opcode: Opcode, bits: usize, dest: &mut [u8]) -> Result<(), TcmError> {
        if bits <= 32 {
            let value = get_bits(self.report, self.offset, bits).to_le_bytes();
            let len = dest.len().min(4);
            dest[..len].copy_from_slice(&value[..len]);
            return Ok(());
        }
        if bits % 8 != 0 {
            return Err(TcmError::Decode(format!(
                "{opcode} field of {bits} bits is neither a word nor whole bytes"
            )));
        }
        let len = dest.len().min(bits / 8);
        get_bytes(self.report, self.offset, &mut dest[..len]);
        Ok(())
    }

    fn blob(&mut self, opcode: Opcode, dest: &mut [u8]) -> Result<(), TcmError> {
        let bits = self.operand(opcode)?;
        self.blob_bits(opcode, bits, dest)?;
        self.offset += bits;
        Ok(())
    }

    fn object_field(&mut self, opcode: Opcode) -> Result<(), TcmError> {
        let value = self.scalar(opcode)?;
        let Some(object) = self.data.object_mut(self.object) else {
            return Ok(());
        };
        match opcode {
            Opcode::ObjectNClassification => object.status = value,
            Opcode::ObjectNXPosition => object.x_pos = value,
            Opcode::ObjectNYPosition => object.y_pos = value,
            Opcode::ObjectNZ => object.z = value,
            Opcode::ObjectNXWidth => object.x_width = value,
            Opcode::ObjectNYWidth => object.y_width = value,
            Opcode::ObjectNTxPosition => object.tx_pos = value,
            Opcode::ObjectNRxPosition => object.rx_pos = value,
            _ => {}
        }
        Ok(())
    }

    /// Program position just past the next FOREACH_END, scanning opcodes
    /// (and skipping operands) from `pc`.
    fn next_loop_end(&self) -> Option<usize> {
        let mut pc = self.pc;
        while pc < self.program.len() {
            let opcode = Opcode::from_primitive(self.program[pc]);
            pc += 1;
            match opcode {
                Opcode::ForeachEnd => return Some(pc),
                Opcode::End => return None,
                op if op.has_operand() => pc += 1,
                _ => {}
            }
        }
        None
    }

    fn loop_end(&mut self) {
        let Some(mut frame) = self.frame else {
            trace!(pc = self.pc, "FOREACH_END outside a loop");
            return;
        };

        let rewind = if frame.active_only {
            // the bit cursor bounds the loop: stop once the report is used up
            // or the body stopped consuming bits
            let progressed = self.offset > frame.bit_offset_at_start;
            frame.bit_offset_at_start = self.offset;
            let more_bits = progressed && self.offset < self.report_bits();
            match self.active_objects {
                Some(count) => {
                    frame.processed += 1;
                    frame.processed < count && more_bits
                }
                None => more_bits,
            }
        } else {
            self.object += 1;
            self.object < self.data.max_objects()
        };

        if rewind {
            self.pc = frame.body_start;
            self.frame = Some(frame);
        } else {
            self.frame = None;
        }
    }

    fn run(mut self) -> Result<TouchData, TcmError> {
        while self.pc < self.program.len() {
            let opcode = Opcode::from_primitive(self.program[self.pc]);
            self.pc += 1;
            trace!(pc = self.pc - 1, %opcode, offset = self.offset, "Decode step");

            match opcode {
                Opcode::End => break,
                Opcode::ForeachActiveObject
                    if self.active_objects.is_none() && self.offset >= self.report_bits() =>
                {
                    // nothing left to describe an object
                    if let Some(end) = self.next_loop_end() {
                        self.pc = end;
                    }
                }
                Opcode::ForeachActiveObject | Opcode::ForeachObject => {
                    self.object = 0;
                    self.frame = Some(LoopFrame {
                        body_start: self.pc,
                        active_only: opcode == Opcode::ForeachActiveObject,
                        processed: 0,
                        bit_offset_at_start: self.offset,
                    });
                }
                Opcode::ForeachEnd => self.loop_end(),
                Opcode::PadToNextByte => self.offset = self.offset.div_ceil(8) * 8,
                Opcode::Timestamp => self.data.timestamp = self.scalar(opcode)?,
                Opcode::ObjectNIndex => {
                    let index = self.scalar(opcode)? as usize;
                    if index >= self.data.max_objects() {
                        return Err(TcmError::Decode(format!(
                            "Object index {index} out of range (max {})",
                            self.data.max_objects()
                        )));
                    }
                    self.object = index;
                }
                Opcode::ObjectNClassification
                | Opcode::ObjectNXPosition
                | Opcode::ObjectNYPosition
                | Opcode::ObjectNZ
                | Opcode::ObjectNXWidth
                | Opcode::ObjectNYWidth
                | Opcode::ObjectNTxPosition
                | Opcode::ObjectNRxPosition => self.object_field(opcode)?,
                Opcode::CustomerGripInfo => {
                    let mut grip = [0u8; 4];
                    self.blob(opcode, &mut grip)?;
                    if let Some(object) = self.data.object_mut(self.object) {
                        object.ey_width = grip[0];
                        object.ex_width = grip[1];
                        object.y_e_ratio = grip[2];
                        object.x_e_ratio = grip[3];
                    }
                }
                Opcode::Buttons0DState => self.data.buttons_state = self.scalar(opcode)?,
                Opcode::GestureDoubleTap
                | Opcode::GestureSwipe
                | Opcode::GestureCircle
                | Opcode::GestureUnicode
                | Opcode::GestureVee
                | Opcode::GestureTriangle => self.data.gesture_id = self.scalar(opcode)?,
                Opcode::GestureInfo => {
                    let mut info = self.data.extra_gesture_info;
                    self.blob(opcode, &mut info)?;
                    self.data.extra_gesture_info = info;
                }
                Opcode::GestureCoordinate => {
                    let mut points = self.data.data_point;
                    self.blob(opcode, &mut points)?;
                    self.data.data_point = points;
                }
                Opcode::FrameRate => self.data.frame_rate = self.scalar(opcode)?,
                Opcode::PowerIm => self.data.power_im = self.scalar(opcode)?,
                Opcode::CidIm => self.data.cid_im = self.scalar(opcode)?,
                Opcode::RailIm => self.data.rail_im = self.scalar(opcode)?,
                Opcode::CidVarianceIm => self.data.cid_variance_im = self.scalar(opcode)?,
                Opcode::NsmFrequency => self.data.nsm_frequency = self.scalar(opcode)?,
                Opcode::NsmState => self.data.nsm_state = self.scalar(opcode)?,
                Opcode::NumOfActiveObjects => {
                    let count = self.scalar(opcode)?;
                    self.data.num_of_active_objects = count;
                    self.active_objects = Some(count);
                    if count == 0 {
                        if let Some(end) = self.next_loop_end() {
                            self.pc = end;
                            self.frame = None;
                        }
                    }
                }
                Opcode::NumOfCpuCycles => self.data.num_of_cpu_cycles = self.scalar(opcode)?,
                Opcode::TuningGaussianWidths
                | Opcode::TuningSmallObjectParams
                | Opcode::TuningButtonsVariance => {
                    let bits = self.operand(opcode)?;
                    self.offset += bits;
                }
                Opcode::Unknown(code) => {
                    trace!(code, "Skipping unknown opcode");
                }
            }
        }
        Ok(self.data)
    }
}

/// Decode `report` according to `program` into a fresh slot table of
/// `max_objects` entries.
pub fn decode(program: &[u8], report: &[u8], max_objects: usize) -> Result<TouchData, TcmError> {
    Interpreter {
        program,
        report,
        pc: 0,
        offset: 0,
        object: 0,
        active_objects: None,
        frame: None,
        data: TouchData::new(max_objects),
    }
    .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::set_bits;

    fn active_loop_program() -> Bytes {
        DecodeProgram::new()
            .op(Opcode::ForeachActiveObject)
            .field(Opcode::ObjectNIndex, 4)
            .field(Opcode::ObjectNClassification, 4)
            .field(Opcode::ObjectNXPosition, 16)
            .field(Opcode::ObjectNYPosition, 16)
            .op(Opcode::ForeachEnd)
            .op(Opcode::End)
            .build()
    }

    #[test]
    fn test_foreach_object_visits_every_slot() {
        let program = DecodeProgram::new()
            .op(Opcode::ForeachObject)
            .field(Opcode::ObjectNClassification, 8)
            .op(Opcode::ForeachEnd)
            .op(Opcode::End)
            .build();
        let report = [1, 2, 3];
        let data = decode(&program, &report, 3).unwrap();
        assert_eq!(data.touched, 0b111);
        let statuses: Vec<u32> = data.objects.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![1, 2, 3]);
    }

    #[test]
    fn test_active_loop_without_count_stops_at_report_end() {
        // two 5-byte objects, then the report ends
        let mut report = [0u8; 10];
        set_bits(&mut report, 0, 4, 0);
        set_bits(&mut report, 4, 4, 1);
        set_bits(&mut report, 8, 16, 10);
        set_bits(&mut report, 40, 4, 3);
        set_bits(&mut report, 44, 4, 2);
        set_bits(&mut report, 48, 16, 30);
        let data = decode(&active_loop_program(), &report, 10).unwrap();
        let records: Vec<usize> = data.records().map(|(idx, _)| idx).collect();
        assert_eq!(records, vec![0, 3]);
        assert_eq!(data.objects[3].status, 2);
        assert_eq!(data.objects[3].x_pos, 30);
    }

    #[test]
    fn test_object_index_out_of_range() {
        let mut report = [0u8; 5];
        set_bits(&mut report, 0, 4, 9);
        let err = decode(&active_loop_program(), &report, 4).unwrap_err();
        assert!(matches!(err, TcmError::Decode(_)));
    }

    #[test]
    fn test_short_report_fields_are_zero() {
        let program = DecodeProgram::new()
            .field(Opcode::Timestamp, 32)
            .field(Opcode::FrameRate, 8)
            .op(Opcode::End)
            .build();
        let data = decode(&program, &[0x78, 0x56, 0x34, 0x12], 1).unwrap();
        assert_eq!(data.timestamp, 0x1234_5678);
        assert_eq!(data.frame_rate, 0);
    }

    #[test]
    fn test_pad_to_next_byte() {
        let program = DecodeProgram::new()
            .field(Opcode::NsmState, 3)
            .op(Opcode::PadToNextByte)
            .field(Opcode::NsmFrequency, 8)
            .op(Opcode::End)
            .build();
        let data = decode(&program, &[0x05, 0x2a], 1).unwrap();
        assert_eq!(data.nsm_state, 5);
        assert_eq!(data.nsm_frequency, 0x2a);
    }

    #[test]
    fn test_tuning_fields_skipped() {
        let program = DecodeProgram::new()
            .field(Opcode::TuningGaussianWidths, 16)
            .field(Opcode::TuningSmallObjectParams, 8)
            .field(Opcode::CidIm, 8)
            .op(Opcode::End)
            .build();
        let data = decode(&program, &[0xff, 0xff, 0xff, 0x11], 1).unwrap();
        assert_eq!(data.cid_im, 0x11);
    }

    #[test]
    fn test_wide_field_must_be_whole_bytes() {
        let program = DecodeProgram::new()
            .field(Opcode::GestureInfo, 41)
            .op(Opcode::End)
            .build();
        assert!(matches!(
            decode(&program, &[0u8; 8], 1),
            Err(TcmError::Decode(_))
        ));
    }

    #[test]
    fn test_truncated_program() {
        let program = [u8::from(Opcode::Timestamp)];
        assert!(matches!(
            decode(&program, &[0u8; 4], 1),
            Err(TcmError::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_opcode_consumes_nothing() {
        let program: [u8; 4] = [0x60, Opcode::FrameRate.into(), 8, Opcode::End.into()];
        let data = decode(&program, &[0x3c], 1).unwrap();
        assert_eq!(data.frame_rate, 0x3c);
    }

    #[test]
    fn test_gesture_blobs() {
        let mut report = vec![0x01];
        report.extend_from_slice(&[1, 2, 3, 4, 0x41, 6]);
        report.extend((0..24).map(|i| i as u8));
        let data = decode(&DecodeProgram::gesture(), &report, 10).unwrap();
        assert_eq!(data.gesture_id, 1);
        assert_eq!(&data.extra_gesture_info[..6], &[1, 2, 3, 4, 0x41, 6]);
        assert_eq!(data.data_point[23], 23);
        assert_eq!(data.touched, 0);
    }

    #[test]
    fn test_grip_info_bytes() {
        let mut report = vec![0x00];
        report.extend_from_slice(&[0u8; 6]);
        // index 2, classification 1, x, y, widths
        let mut object = [0u8; 12];
        set_bits(&mut object, 0, 4, 2);
        set_bits(&mut object, 4, 4, 1);
        set_bits(&mut object, 8, 16, 500);
        set_bits(&mut object, 24, 16, 900);
        set_bits(&mut object, 40, 12, 7);
        set_bits(&mut object, 52, 12, 9);
        object[8..12].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        report.extend_from_slice(&object);
        let data = decode(&DecodeProgram::normal(), &report, 10).unwrap();
        let slot = data.objects[2];
        assert_eq!((slot.x_pos, slot.y_pos), (500, 900));
        assert_eq!((slot.x_width, slot.y_width), (7, 9));
        assert_eq!(
            (slot.ey_width, slot.ex_width, slot.y_e_ratio, slot.x_e_ratio),
            (0x11, 0x22, 0x33, 0x44)
        );
    }
}
