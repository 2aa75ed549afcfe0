use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::Path;
use tracing::trace;

use crate::results::MatchedLine;
use crate::spec::FilterSpec;

/// Decodes one raw line, dropping its `\n` / `\r\n` terminator.
///
/// Invalid UTF-8 is replaced rather than rejected; the flag tells the caller
/// that a replacement happened.
pub fn decode_line(raw: &[u8]) -> (String, bool) {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    match String::from_utf8_lossy(raw) {
        Cow::Borrowed(s) => (s.to_owned(), false),
        Cow::Owned(s) => (s, true),
    }
}

/// Turns a sequence of numbered lines into matches with context.
///
/// Lines must be pushed in order, starting at 1. Before-context comes from a
/// sliding window; after-context is filled in as later lines arrive.
pub struct LineCollector<'a> {
    spec: &'a FilterSpec,
    path: &'a Path,
    window: VecDeque<(usize, String)>,
    awaiting_context: Vec<usize>,
    matches: Vec<MatchedLine>,
    limit_reached: bool,
}

impl<'a> LineCollector<'a> {
    pub fn new(spec: &'a FilterSpec, path: &'a Path) -> Self {
        Self {
            spec,
            path,
            window: VecDeque::with_capacity(spec.context_before()),
            awaiting_context: Vec::new(),
            matches: Vec::new(),
            limit_reached: false,
        }
    }

    /// Feeds the next line. Returns `false` once later lines can no longer
    /// change the output (max count reached and after-context complete).
    pub fn push(&mut self, line_number: usize, text: String) -> bool {
        let after = self.spec.context_after();
        if !self.awaiting_context.is_empty() {
            for &idx in &self.awaiting_context {
                self.matches[idx]
                    .context_after
                    .push((line_number, text.clone()));
            }
            let matches = &self.matches;
            self.awaiting_context
                .retain(|&idx| matches[idx].context_after.len() < after);
        }

        if !self.limit_reached && self.spec.is_match(&text) {
            trace!("Found match at line {}: {}", line_number, text);
            let mut matched = MatchedLine::new(self.path, line_number, text.clone());
            matched.context_before = self.window.iter().cloned().collect();
            self.matches.push(matched);
            if after > 0 {
                self.awaiting_context.push(self.matches.len() - 1);
            }
            if self
                .spec
                .max_count()
                .is_some_and(|max| self.matches.len() >= max)
            {
                self.limit_reached = true;
            }
        }

        let before = self.spec.context_before();
        if before > 0 {
            if self.window.len() == before {
                self.window.pop_front();
            }
            self.window.push_back((line_number, text));
        }

        !(self.limit_reached && self.awaiting_context.is_empty())
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn finish(self) -> Vec<MatchedLine> {
        self.matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::FilterSpecConfig;

    fn collect(spec: &FilterSpec, lines: &[&str]) -> (Vec<MatchedLine>, usize) {
        let path = Path::new("test.log");
        let mut collector = LineCollector::new(spec, path);
        let mut consumed = 0;
        for (i, line) in lines.iter().enumerate() {
            consumed += 1;
            if !collector.push(i + 1, line.to_string()) {
                break;
            }
        }
        (collector.finish(), consumed)
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\r\n"), ("hello".to_string(), false));
        assert_eq!(decode_line(b"hello\n"), ("hello".to_string(), false));
        assert_eq!(decode_line(b"hello"), ("hello".to_string(), false));
        assert_eq!(decode_line(b""), (String::new(), false));
    }

    #[test]
    fn test_decode_line_replaces_invalid_utf8() {
        let (text, lossy) = decode_line(b"ERROR \xff\xfe bytes\n");
        assert!(lossy);
        assert!(text.starts_with("ERROR "));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_context_lines() {
        let spec = FilterSpecConfig::new("ERROR").context(1, 2).compile().unwrap();
        let (matches, _) = collect(&spec, &["a", "ERROR one", "b", "ERROR two", "c", "d", "e"]);

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].context_before, vec![(1, "a".to_string())]);
        assert_eq!(
            matches[0].context_after,
            vec![(3, "b".to_string()), (4, "ERROR two".to_string())]
        );
        assert_eq!(matches[1].context_before, vec![(3, "b".to_string())]);
        assert_eq!(
            matches[1].context_after,
            vec![(5, "c".to_string()), (6, "d".to_string())]
        );
    }

    #[test]
    fn test_context_at_file_edges() {
        let spec = FilterSpecConfig::new("x").context(3, 3).compile().unwrap();
        let (matches, _) = collect(&spec, &["x", "y"]);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].context_before.is_empty());
        assert_eq!(matches[0].context_after, vec![(2, "y".to_string())]);
    }

    #[test]
    fn test_max_count_stops_after_context() {
        let spec = FilterSpecConfig::new("hit")
            .max_count(2)
            .context(0, 1)
            .compile()
            .unwrap();
        let (matches, consumed) = collect(&spec, &["hit", "hit", "tail", "hit", "more"]);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].context_after, vec![(3, "tail".to_string())]);
        assert_eq!(consumed, 3);

        let spec = FilterSpecConfig::new("hit").max_count(1).compile().unwrap();
        let (matches, consumed) = collect(&spec, &["hit", "hit"]);
        assert_eq!(matches.len(), 1);
        assert_eq!(consumed, 1);
    }
}
