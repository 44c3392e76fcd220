//! Report decoding through the public interpreter

use tcm_lib::bits::set_bits;
use tcm_lib::decoder::{DecodeProgram, Opcode, decode};

fn counted_active_loop() -> Vec<u8> {
    DecodeProgram::new()
        .field(Opcode::NumOfActiveObjects, 8)
        .op(Opcode::ForeachActiveObject)
        .field(Opcode::ObjectNIndex, 4)
        .field(Opcode::ObjectNClassification, 4)
        .field(Opcode::ObjectNXPosition, 16)
        .field(Opcode::ObjectNYPosition, 16)
        .op(Opcode::ForeachEnd)
        .op(Opcode::End)
        .build()
        .to_vec()
}

#[test]
fn test_single_active_object() {
    let program = counted_active_loop();
    assert_eq!(program, vec![24, 8, 1, 6, 4, 7, 4, 8, 16, 9, 16, 3, 0]);

    let report = [0x01, 0x11, 100, 0, 200, 0];
    let data = decode(&program, &report, 10).unwrap();

    assert_eq!(data.num_of_active_objects, 1);
    assert_eq!(data.touched, 0b10);
    let records: Vec<_> = data.records().collect();
    assert_eq!(records.len(), 1);
    let (slot, object) = records[0];
    assert_eq!(slot, 1);
    assert_eq!(object.status, 1);
    assert_eq!(object.x_pos, 100);
    assert_eq!(object.y_pos, 200);
}

#[test]
fn test_zero_active_objects_skips_loop() {
    let program = DecodeProgram::new()
        .field(Opcode::NumOfActiveObjects, 8)
        .op(Opcode::ForeachActiveObject)
        .field(Opcode::ObjectNIndex, 4)
        .field(Opcode::ObjectNClassification, 4)
        .op(Opcode::ForeachEnd)
        .field(Opcode::FrameRate, 8)
        .op(Opcode::End)
        .build();

    // the byte after the count belongs to the field after the loop
    let report = [0x00, 0x3c, 0xff, 0xff];
    for max_objects in 1..=32 {
        let data = decode(&program, &report, max_objects).unwrap();
        assert_eq!(data.touched, 0, "max_objects {max_objects}");
        assert_eq!(data.records().count(), 0);
        assert_eq!(data.frame_rate, 0x3c);
    }
}

#[test]
fn test_loop_runs_for_whole_active_count() {
    // three records for a two-slot table, slot 0 reported twice
    let program = DecodeProgram::new()
        .field(Opcode::NumOfActiveObjects, 8)
        .op(Opcode::ForeachActiveObject)
        .field(Opcode::ObjectNIndex, 4)
        .field(Opcode::ObjectNClassification, 4)
        .op(Opcode::ForeachEnd)
        .field(Opcode::FrameRate, 8)
        .op(Opcode::End)
        .build();

    let report = hex::decode("031011103c").unwrap();
    let data = decode(&program, &report, 2).unwrap();
    assert_eq!(data.touched, 0b11);
    assert_eq!(data.frame_rate, 0x3c);
}

#[test]
fn test_loop_stops_at_end_of_report() {
    // the count claims more contacts than the report carries
    let mut report = [0u8; 2];
    set_bits(&mut report, 0, 8, 200);
    set_bits(&mut report, 8, 4, 1);
    set_bits(&mut report, 12, 4, 1);
    let program = DecodeProgram::new()
        .field(Opcode::NumOfActiveObjects, 8)
        .op(Opcode::ForeachActiveObject)
        .field(Opcode::ObjectNIndex, 4)
        .field(Opcode::ObjectNClassification, 4)
        .op(Opcode::ForeachEnd)
        .op(Opcode::End)
        .build();

    let data = decode(&program, &report, 4).unwrap();
    assert_eq!(data.num_of_active_objects, 200);
    assert_eq!(data.touched, 0b10);
}

#[test]
fn test_tuning_fields_are_skipped() {
    let program = DecodeProgram::new()
        .field(Opcode::TuningGaussianWidths, 16)
        .field(Opcode::Timestamp, 8)
        .op(Opcode::End)
        .build();
    let data = decode(&program, &[0xaa, 0xbb, 0x07], 1).unwrap();
    assert_eq!(data.timestamp, 7);
}

#[test]
fn test_two_active_loops_skip_independently() {
    // ambiguous layout: each empty loop must skip to its own end
    let program = DecodeProgram::new()
        .field(Opcode::NumOfActiveObjects, 8)
        .op(Opcode::ForeachActiveObject)
        .field(Opcode::ObjectNIndex, 4)
        .field(Opcode::ObjectNClassification, 4)
        .op(Opcode::ForeachEnd)
        .field(Opcode::FrameRate, 8)
        .field(Opcode::NumOfActiveObjects, 8)
        .op(Opcode::ForeachActiveObject)
        .field(Opcode::ObjectNIndex, 4)
        .field(Opcode::ObjectNClassification, 4)
        .op(Opcode::ForeachEnd)
        .field(Opcode::Timestamp, 8)
        .op(Opcode::End)
        .build();

    let data = decode(&program, &[0x00, 0x3c, 0x00, 0x07], 4).unwrap();
    assert_eq!(data.frame_rate, 0x3c);
    assert_eq!(data.timestamp, 7);
    assert_eq!(data.touched, 0);

    let data = decode(&program, &[0x01, 0x11, 0x3c, 0x00, 0x07], 4).unwrap();
    assert_eq!(data.touched, 0b10);
    assert_eq!(data.frame_rate, 0x3c);
    assert_eq!(data.timestamp, 7);
}
