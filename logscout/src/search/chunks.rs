use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};

use super::collector::{decode_line, LineCollector};
use super::ScanContext;
use crate::errors::{ScanError, ScanResult};
use crate::results::FileMatches;
use crate::spec::ReadingMode;

const BUFFER_CAPACITY: usize = 65536;

/// Reads fixed-size chunks and re-splits them on `\n`.
///
/// Bytes after the last newline of a chunk are carried over to the next read,
/// so a line straddling any number of chunks is seen exactly once, whatever
/// the chunk size. Splitting happens on raw bytes, before decoding, which
/// keeps multi-byte characters cut by a chunk boundary intact.
pub(crate) fn scan(ctx: &ScanContext<'_>) -> ScanResult<FileMatches> {
    let path = ctx.path();
    let file = File::open(path).map_err(|e| ScanError::from_io(path, e))?;
    let mut reader = BufReader::with_capacity(BUFFER_CAPACITY, file);

    let mut result = FileMatches::new(path, ReadingMode::Chunks);
    let mut collector = LineCollector::new(ctx.spec, path);
    let mut chunk = vec![0u8; ctx.spec.chunk_size()];
    let mut carry: Vec<u8> = Vec::new();
    let mut line_number = 0usize;
    let mut chunk_index = 0u64;
    let mut bytes_read = 0u64;
    let mut lossy = false;
    let mut stopped = false;

    'chunks: loop {
        if ctx.cancel.is_cancelled() {
            result.cancelled = true;
            break;
        }

        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(ScanError::from_io(path, e)),
        };
        chunk_index += 1;
        bytes_read += n as u64;
        ctx.report_chunk(chunk_index, bytes_read);

        // The carry never holds a newline, so only the new bytes need scanning.
        let mut search_from = carry.len();
        carry.extend_from_slice(&chunk[..n]);
        let mut line_start = 0;

        while let Some(pos) = carry[search_from..].iter().position(|&b| b == b'\n') {
            if ctx.cancel.is_cancelled() {
                result.cancelled = true;
                break 'chunks;
            }
            let line_end = search_from + pos;
            line_number += 1;

            let (text, replaced) = decode_line(&carry[line_start..line_end]);
            lossy |= replaced;
            line_start = line_end + 1;
            search_from = line_start;

            if !collector.push(line_number, text) {
                stopped = true;
                break 'chunks;
            }
        }
        carry.drain(..line_start);
        ctx.report_progress(line_number as u64);
    }

    if !stopped && !result.cancelled && !carry.is_empty() {
        line_number += 1;
        let (text, replaced) = decode_line(&carry);
        lossy |= replaced;
        collector.push(line_number, text);
    }

    result.lines_processed = line_number as u64;
    result.matches = collector.finish();
    ctx.finish(&result, bytes_read, lossy);
    Ok(result)
}
