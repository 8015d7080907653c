//! Log & command stream
//!
//! Per-container bounded ring buffers fed by a streaming log tail and
//! interleaved with command echoes and replies. Entries live only in
//! memory; a container restart does not invalidate them.

mod buffer;
mod registry;

pub use buffer::LogBuffer;
pub use registry::LogRegistry;

use chrono::{DateTime, Utc};
use regex::RegexSet;
use serde::{Deserialize, Serialize};

/// Hard cap on one entry's content
pub const MAX_CONTENT_LEN: usize = 8192;

/// ANSI reset sentinel wrapped around spliced entries so upstream color
/// state cannot bleed between entries.
pub const ANSI_RESET: &str = "\u{1b}[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Stdout,
    Stderr,
    Command,
    CommandOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: LogType,
    pub content: String,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, entry_type: LogType, content: impl Into<String>) -> Self {
        let mut content = content.into();
        if content.len() > MAX_CONTENT_LEN {
            let mut cut = MAX_CONTENT_LEN;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
        }
        Self {
            timestamp,
            entry_type,
            content,
        }
    }

    /// A spliced entry wrapped in ANSI resets on both ends.
    pub fn spliced(timestamp: DateTime<Utc>, entry_type: LogType, content: &str) -> Self {
        Self::new(
            timestamp,
            entry_type,
            format!("{}{}{}", ANSI_RESET, content, ANSI_RESET),
        )
    }
}

/// Drops console lines matching any configured noise pattern.
pub struct NoiseFilter {
    set: Option<RegexSet>,
}

impl NoiseFilter {
    /// Patterns are regexes; ones that fail to compile match literally.
    pub fn new(patterns: &[String]) -> Self {
        if patterns.is_empty() {
            return Self { set: None };
        }

        let escaped: Vec<String> = patterns
            .iter()
            .map(|p| {
                if regex::Regex::new(p).is_ok() {
                    p.clone()
                } else {
                    regex::escape(p)
                }
            })
            .collect();

        Self {
            set: RegexSet::new(&escaped).ok(),
        }
    }

    pub fn is_noise(&self, line: &str) -> bool {
        self.set.as_ref().is_some_and(|set| set.is_match(line))
    }
}

/// Splits a raw byte tail into cleaned console lines.
///
/// Partial lines are held until the newline arrives; embedded `\r` keeps
/// only the final segment.
pub(crate) struct TailParser {
    partial: String,
}

impl TailParser {
    pub fn new() -> Self {
        Self {
            partial: String::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let raw: String = self.partial.drain(..=pos).collect();
            let line = clean_line(&raw);
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

fn clean_line(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['\n', '\r']);
    // Progress-bar style output: keep the final carriage-return segment
    match trimmed.rsplit('\r').next() {
        Some(last) => last.to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_content_bounded() {
        let long = "x".repeat(MAX_CONTENT_LEN + 100);
        let entry = LogEntry::new(Utc::now(), LogType::Stdout, long);
        assert_eq!(entry.content.len(), MAX_CONTENT_LEN);
    }

    #[test]
    fn test_spliced_wraps_ansi_reset() {
        let entry = LogEntry::spliced(Utc::now(), LogType::Command, "say hi");
        assert!(entry.content.starts_with(ANSI_RESET));
        assert!(entry.content.ends_with(ANSI_RESET));
        assert!(entry.content.contains("say hi"));
    }

    #[test]
    fn test_noise_filter() {
        let filter = NoiseFilter::new(&[
            "Thread RCON Listener".to_string(),
            "Thread RCON Client".to_string(),
        ]);
        assert!(filter.is_noise("[12:00:01] [Server thread/INFO]: Thread RCON Listener started"));
        assert!(!filter.is_noise("[12:00:01] [Server thread/INFO]: Done (3.2s)!"));

        let empty = NoiseFilter::new(&[]);
        assert!(!empty.is_noise("anything"));
    }

    #[test]
    fn test_tail_parser_partial_lines() {
        let mut parser = TailParser::new();
        assert!(parser.feed(b"[INFO] sta").is_empty());
        let lines = parser.feed(b"rting\n[INFO] done\n");
        assert_eq!(lines, vec!["[INFO] starting", "[INFO] done"]);
    }

    #[test]
    fn test_tail_parser_carriage_return_keeps_last_segment() {
        let mut parser = TailParser::new();
        let lines = parser.feed(b"progress 10%\rprogress 50%\rprogress 100%\n");
        assert_eq!(lines, vec!["progress 100%"]);
    }

    #[test]
    fn test_tail_parser_skips_blank_lines() {
        let mut parser = TailParser::new();
        let lines = parser.feed(b"\n\nhello\n\n");
        assert_eq!(lines, vec!["hello"]);
    }
}
