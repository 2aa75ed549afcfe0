use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::collector::decode_line;
use super::ScanContext;
use crate::errors::{ScanError, ScanResult};
use crate::progress::CancellationToken;
use crate::results::{FileMatches, MatchedLine};
use crate::spec::{FilterSpec, ReadingMode};

/// How long to wait for output before checking the cancellation token again
const POLL_INTERVAL: Duration = Duration::from_millis(50);

const CHECK_BUFFER_SIZE: usize = 64 * 1024;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Whether `rg` would see this file's lines differently from the line reader.
///
/// `rg` matches raw bytes, so `.` never matches an invalid UTF-8 byte that the
/// line reader has replaced with U+FFFD. Under `--crlf` a `\r` not followed by
/// `\n` ends a line for `$` and `.`, while the line reader only drops the `\r`
/// of a terminator. `rg` also strips a leading UTF-8 BOM. Any of these sends
/// the file to line mode. A cancelled check reports `false` so the caller
/// reaches its own cancellation handling.
pub(crate) fn diverges_from_line_mode(
    path: &Path,
    cancel: &CancellationToken,
) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; CHECK_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    let mut bom_checked = false;

    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let n = match file.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let eof = n == 0;
        pending.extend_from_slice(&buffer[..n]);

        if !bom_checked && (eof || pending.len() >= UTF8_BOM.len()) {
            if pending.starts_with(UTF8_BOM) {
                return Ok(true);
            }
            bom_checked = true;
        }

        // A `\r` is bare when the byte after it is known and is not `\n`
        let bare_cr = pending.iter().enumerate().any(|(i, &b)| {
            b == b'\r' && pending.get(i + 1).is_some_and(|&next| next != b'\n')
        });
        if bare_cr {
            return Ok(true);
        }

        let mut keep_from = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) if e.error_len().is_some() || eof => return Ok(true),
            Err(e) => e.valid_up_to(),
        };
        if eof {
            return Ok(false);
        }
        if !bom_checked {
            continue;
        }
        if pending.last() == Some(&b'\r') {
            keep_from = keep_from.min(pending.len() - 1);
        }
        pending.drain(..keep_from);
    }
}

/// Translates a spec into `rg` arguments for scanning `path`.
///
/// The flags pin down the output format (`N:text` for matches, `N-text` for
/// context) and the line semantics used by the other modes: no user config,
/// binary content searched as text, CRLF treated as a line terminator. The
/// multiline and dot-all flags are not forwarded since matching is per line.
pub fn build_args(spec: &FilterSpec, path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "--no-config",
        "--line-number",
        "--no-heading",
        "--no-filename",
        "--color",
        "never",
        "--text",
        "--crlf",
    ]
    .iter()
    .map(OsString::from)
    .collect();

    args.push(if spec.config().case_insensitive { "-i" } else { "-s" }.into());
    if spec.context_before() > 0 {
        args.push("-B".into());
        args.push(spec.context_before().to_string().into());
    }
    if spec.context_after() > 0 {
        args.push("-A".into());
        args.push(spec.context_after().to_string().into());
    }
    if let Some(max) = spec.max_count() {
        args.push("--max-count".into());
        args.push(max.to_string().into());
    }
    args.extend(spec.ripgrep_flags().iter().map(OsString::from));

    args.push("--regexp".into());
    args.push(spec.pattern().into());
    args.push("--".into());
    args.push(path.as_os_str().to_owned());
    args
}

/// One line of `rg` output
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OutputLine {
    pub line_number: usize,
    pub text: String,
    pub is_match: bool,
}

/// Parses `N:text` / `N-text`; separators and anything else yield `None`.
pub(crate) fn parse_output_line(raw: &[u8]) -> Option<OutputLine> {
    let digits = raw.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let is_match = match raw.get(digits) {
        Some(b':') => true,
        Some(b'-') => false,
        _ => return None,
    };
    let line_number = std::str::from_utf8(&raw[..digits]).ok()?.parse().ok()?;
    let (text, _) = decode_line(&raw[digits + 1..]);
    Some(OutputLine {
        line_number,
        text,
        is_match,
    })
}

/// Accumulates parsed output and rebuilds matches with their context
#[derive(Default)]
struct OutputAssembler {
    lines: HashMap<usize, String>,
    match_numbers: Vec<usize>,
    last_line: usize,
}

impl OutputAssembler {
    fn add(&mut self, line: OutputLine) {
        if line.is_match {
            self.match_numbers.push(line.line_number);
        }
        self.last_line = self.last_line.max(line.line_number);
        self.lines.insert(line.line_number, line.text);
    }

    fn into_matches(self, spec: &FilterSpec, path: &Path) -> Vec<MatchedLine> {
        let before = spec.context_before();
        let after = spec.context_after();
        // Matching lines inside the trailing context of the last counted match
        // are printed as matches; they only serve as context here.
        self.match_numbers
            .iter()
            .take(spec.max_count().unwrap_or(usize::MAX))
            .filter_map(|&n| {
                let text = self.lines.get(&n)?;
                let mut matched = MatchedLine::new(path, n, text.clone());
                matched.context_before = (n.saturating_sub(before).max(1)..n)
                    .filter_map(|i| self.lines.get(&i).map(|t| (i, t.clone())))
                    .collect();
                matched.context_after = (n + 1..=n + after)
                    .filter_map(|i| self.lines.get(&i).map(|t| (i, t.clone())))
                    .collect();
                Some(matched)
            })
            .collect()
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal; the group was created for this child.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Runs `binary` over the target file and parses its output.
///
/// A spawn failure or an exit code other than 0 (matches) or 1 (no matches)
/// is reported as a [`ScanError::SubprocessError`], which the caller turns
/// into a line-mode fallback.
pub(crate) fn scan(binary: &Path, ctx: &ScanContext<'_>) -> ScanResult<FileMatches> {
    let path = ctx.path();
    let args = build_args(ctx.spec, path);
    debug!("Running {} {:?}", binary.display(), args);

    let mut cmd = Command::new(binary);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ScanError::subprocess(format!("failed to start {}: {}", binary.display(), e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ScanError::subprocess("stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ScanError::subprocess("stderr was not captured"))?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let stdout_reader = thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx.send(buf).is_err() {
                        break;
                    }
                }
            }
        }
    });
    let stderr_reader = thread::spawn(move || {
        let mut message = String::new();
        let _ = stderr.read_to_string(&mut message);
        message
    });

    let mut result = FileMatches::new(path, ReadingMode::Ripgrep);
    let mut assembler = OutputAssembler::default();
    let mut records = 0u64;

    loop {
        if ctx.cancel.is_cancelled() {
            debug!("Cancelling search tool for {}", path.display());
            kill_process_group(&mut child);
            result.cancelled = true;
            break;
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(raw) => {
                if let Some(line) = parse_output_line(&raw) {
                    trace!("rg output line {}: {}", line.line_number, line.text);
                    assembler.add(line);
                    records += 1;
                    if ctx.should_report(records) {
                        ctx.report_progress(assembler.last_line as u64);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = child.wait().map_err(|e| {
        ScanError::subprocess(format!("failed to wait for {}: {}", binary.display(), e))
    })?;
    drop(rx);
    let _ = stdout_reader.join();
    let stderr_text = stderr_reader.join().unwrap_or_default();

    if !result.cancelled && !matches!(status.code(), Some(0) | Some(1)) {
        return Err(ScanError::subprocess(format!(
            "{} exited with {}: {}",
            binary.display(),
            status,
            stderr_text.trim()
        )));
    }
    if !stderr_text.trim().is_empty() {
        warn!("Search tool reported on {}: {}", path.display(), stderr_text.trim());
    }

    result.lines_processed = assembler.last_line as u64;
    result.matches = assembler.into_matches(ctx.spec, path);
    let bytes = if result.cancelled { 0 } else { ctx.target.size };
    ctx.finish(&result, bytes, false);
    Ok(result)
}
