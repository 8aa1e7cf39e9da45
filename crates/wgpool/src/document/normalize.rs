//! Document normalization.
//!
//! Hand edits and older tooling can leave dangling `[Peer]` markers or piles
//! of blank lines behind. Normalizing repairs that on the next load instead
//! of carrying the damage forward.

use std::fmt;

use super::{ConfigDocument, Section};

/// What normalization changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// `[Peer]` sections without any key-value line that were removed.
    pub dropped_peers: usize,
    /// Repeated `[Interface]` sections that were removed.
    pub dropped_interfaces: usize,
    /// Blank lines removed from runs of consecutive blank lines.
    pub collapsed_blank_lines: usize,
    /// Blank lines removed from the end of the document.
    pub trimmed_trailing_lines: usize,
}

impl NormalizeReport {
    /// Check if nothing was changed.
    pub fn is_empty(&self) -> bool {
        self.dropped_blocks() == 0
            && self.collapsed_blank_lines == 0
            && self.trimmed_trailing_lines == 0
    }

    /// Number of whole sections dropped.
    pub fn dropped_blocks(&self) -> usize {
        self.dropped_peers + self.dropped_interfaces
    }

    /// Combine two reports.
    pub fn merge(mut self, other: NormalizeReport) -> Self {
        self.dropped_peers += other.dropped_peers;
        self.dropped_interfaces += other.dropped_interfaces;
        self.collapsed_blank_lines += other.collapsed_blank_lines;
        self.trimmed_trailing_lines += other.trimmed_trailing_lines;
        self
    }
}

impl fmt::Display for NormalizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "document already normalized");
        }
        let mut parts = Vec::new();
        if self.dropped_peers > 0 {
            parts.push(format!("dropped {} empty peer section(s)", self.dropped_peers));
        }
        if self.dropped_interfaces > 0 {
            parts.push(format!(
                "dropped {} repeated interface section(s)",
                self.dropped_interfaces
            ));
        }
        if self.collapsed_blank_lines > 0 {
            parts.push(format!(
                "collapsed {} blank line(s)",
                self.collapsed_blank_lines
            ));
        }
        if self.trimmed_trailing_lines > 0 {
            parts.push(format!(
                "trimmed {} trailing line(s)",
                self.trimmed_trailing_lines
            ));
        }
        write!(f, "{}", parts.join(", "))
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Collapse runs of blank lines to one; returns how many lines were removed.
fn collapse_blank_runs(lines: &mut Vec<String>) -> usize {
    let before = lines.len();
    let mut previous_blank = false;
    lines.retain(|line| {
        let blank = is_blank(line);
        let keep = !(blank && previous_blank);
        previous_blank = blank;
        keep
    });
    before - lines.len()
}

fn trim_trailing_blanks(lines: &mut Vec<String>, keep_first: bool) -> usize {
    let floor = usize::from(keep_first);
    let mut removed = 0;
    while lines.len() > floor && lines.last().is_some_and(|l| is_blank(l)) {
        lines.pop();
        removed += 1;
    }
    removed
}

/// Normalize a document, returning the repaired copy and what changed.
///
/// Normalizing an already normalized document is a no-op.
pub fn normalize(doc: &ConfigDocument) -> (ConfigDocument, NormalizeReport) {
    let mut report = NormalizeReport::default();
    let (mut preamble, sections) = doc.clone().into_parts();

    let mut kept = Vec::with_capacity(sections.len());
    let mut seen_interface = false;
    for section in sections {
        match section {
            Section::Interface(_) if seen_interface => report.dropped_interfaces += 1,
            Section::Interface(_) => {
                seen_interface = true;
                kept.push(section);
            }
            Section::Peer(ref peer) if peer.directives().is_empty() => {
                report.dropped_peers += 1;
            }
            Section::Peer(_) => kept.push(section),
        }
    }

    report.collapsed_blank_lines += collapse_blank_runs(&mut preamble);
    for section in &mut kept {
        report.collapsed_blank_lines += collapse_blank_runs(section.lines_mut());
    }

    report.trimmed_trailing_lines = match kept.last_mut() {
        // The marker line is never blank, so it always survives.
        Some(last) => trim_trailing_blanks(last.lines_mut(), true),
        None => trim_trailing_blanks(&mut preamble, false),
    };

    (ConfigDocument::from_parts(preamble, kept), report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{PeerRecord, parse, serialize};

    #[test]
    fn test_collapse_and_trim() {
        let text = "[Interface]\nAddress = 10.0.0.1/24\n\n\n\n[Peer]\n# a\nPublicKey = YQ==\nAllowedIPs = 10.0.0.2/32\n\n\n";
        let (doc, report) = normalize(&parse(text).document);
        assert_eq!(report.collapsed_blank_lines, 3);
        assert_eq!(report.trimmed_trailing_lines, 1);
        assert_eq!(report.dropped_blocks(), 0);
        assert_eq!(
            serialize(&doc),
            "[Interface]\nAddress = 10.0.0.1/24\n\n[Peer]\n# a\nPublicKey = YQ==\nAllowedIPs = 10.0.0.2/32\n"
        );
    }

    #[test]
    fn test_idempotent() {
        let text = "\n\n[Interface]\nAddress = 10.0.0.1/24\n\n\n[Peer]\n# a\nPublicKey = YQ==\nAllowedIPs = 10.0.0.2/32\n\n";
        let (once, first) = normalize(&parse(text).document);
        assert!(!first.is_empty());
        let (twice, second) = normalize(&once);
        assert!(second.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_drops_peer_built_without_directives() {
        let empty = PeerRecord::from_parts(vec!["[Peer]".into(), "# ghost".into()], Some("ghost".into()), Vec::new());
        let doc = ConfigDocument::from_parts(Vec::new(), vec![Section::Peer(empty)]);
        let (fixed, report) = normalize(&doc);
        assert_eq!(report.dropped_peers, 1);
        assert_eq!(fixed.peer_count(), 0);
        assert_eq!(report.to_string(), "dropped 1 empty peer section(s)");
    }

    #[test]
    fn test_report_merge_and_display() {
        let a = NormalizeReport {
            dropped_peers: 1,
            ..Default::default()
        };
        let b = NormalizeReport {
            collapsed_blank_lines: 2,
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.dropped_peers, 1);
        assert_eq!(merged.collapsed_blank_lines, 2);
        assert_eq!(
            merged.to_string(),
            "dropped 1 empty peer section(s), collapsed 2 blank line(s)"
        );
        assert_eq!(
            NormalizeReport::default().to_string(),
            "document already normalized"
        );
    }
}
