use clap::Parser;
use tcm_lib::decoder::{DecodeProgram, decode};

/// Decode a captured TOUCH report payload offline.
#[derive(Parser, Debug)]
struct Args {
    /// Report payload as hex, without the message header
    report: String,
    /// Touch report config as hex; defaults to the built-in touch program
    #[arg(short, long)]
    program: Option<String>,
    #[arg(long, default_value_t = 10)]
    max_objects: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let report = hex::decode(args.report.trim())?;
    let program = match args.program {
        Some(program) => hex::decode(program.trim())?,
        None => DecodeProgram::normal().to_vec(),
    };

    let data = decode(&program, &report, args.max_objects)?;
    println!(
        "timestamp {} gesture 0x{:02x} active objects {}",
        data.timestamp, data.gesture_id, data.num_of_active_objects
    );
    for (slot, object) in data.objects.iter().enumerate().take(u32::BITS as usize) {
        if data.touched & (1 << slot) == 0 {
            continue;
        }
        println!(
            "  slot {slot}: status {} x {} y {} z {} width {}x{}",
            object.status, object.x_pos, object.y_pos, object.z, object.x_width, object.y_width
        );
    }
    Ok(())
}
