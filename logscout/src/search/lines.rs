use std::fs::File;
use std::io::{BufRead, BufReader};

use super::collector::{decode_line, LineCollector};
use super::ScanContext;
use crate::errors::{ScanError, ScanResult};
use crate::results::FileMatches;
use crate::spec::ReadingMode;

const BUFFER_CAPACITY: usize = 65536;

/// Streams the file one physical line at a time.
pub(crate) fn scan(ctx: &ScanContext<'_>) -> ScanResult<FileMatches> {
    let path = ctx.path();
    let file = File::open(path).map_err(|e| ScanError::from_io(path, e))?;
    let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);

    let mut result = FileMatches::new(path, ReadingMode::Lines);
    let mut collector = LineCollector::new(ctx.spec, path);
    let mut line_buffer = Vec::with_capacity(256);
    let mut line_number = 0usize;
    let mut bytes_read = 0u64;
    let mut lossy = false;

    loop {
        if ctx.cancel.is_cancelled() {
            result.cancelled = true;
            break;
        }

        line_buffer.clear();
        let n = reader
            .read_until(b'\n', &mut line_buffer)
            .map_err(|e| ScanError::from_io(path, e))?;
        if n == 0 {
            break;
        }
        bytes_read += n as u64;
        line_number += 1;

        let (text, replaced) = decode_line(&line_buffer);
        lossy |= replaced;
        let keep_going = collector.push(line_number, text);

        if ctx.should_report(line_number as u64) {
            ctx.report_progress(line_number as u64);
        }
        if !keep_going {
            break;
        }
    }

    result.lines_processed = line_number as u64;
    result.matches = collector.finish();
    ctx.finish(&result, bytes_read, lossy);
    Ok(result)
}
