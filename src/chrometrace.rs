use std::{fs::File, io::Write, path::Path};

use crate::GpuTimerRecord;

/// Writes a .json trace file that can be viewed as a flame graph in Chrome or Edge via <chrome://tracing>
///
/// `records` is a frame of begin/end records as returned by
/// [`Renderer::get_gpu_timings`](crate::Renderer::get_gpu_timings); nesting is
/// rebuilt from the pairing. Timestamps are taken as nanoseconds.
pub fn write_chrometrace(target: &Path, records: &[GpuTimerRecord]) -> std::io::Result<()> {
    let mut file = File::create(target)?;

    writeln!(file, "{{")?;
    writeln!(file, "\"traceEvents\": [")?;

    let events = pair_records(records);
    for (i, (name, start, end)) in events.iter().enumerate() {
        write!(
            file,
            r#"{{ "pid":{}, "tid":1, "ts":{}, "dur":{}, "ph":"X", "name":"{}" }}{}"#,
            std::process::id(),
            *start as f64 / 1000.0,
            end.saturating_sub(*start) as f64 / 1000.0,
            name,
            if i + 1 == events.len() { "\n" } else { ",\n" }
        )?;
    }

    writeln!(file, "]")?;
    writeln!(file, "}}")?;

    Ok(())
}

/// Match begin records with their end records via a stack.
///
/// Stray ends and unclosed begins are skipped; a well-formed frame has none.
fn pair_records(records: &[GpuTimerRecord]) -> Vec<(&'static str, u64, u64)> {
    let mut stack = Vec::new();
    let mut events = Vec::new();
    for record in records {
        if record.is_end {
            if let Some((name, start)) = stack.pop() {
                events.push((name, start, record.timestamp));
            }
        } else {
            stack.push((record.name, record.timestamp));
        }
    }
    events
}
