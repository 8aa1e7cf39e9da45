//! Text codec for configuration documents.
//!
//! Parsing is total: any text yields a document. Lines are classified one at
//! a time with small winnow parsers and grouped into sections at structural
//! markers. Peer sections without any `Key = Value` line are dropped and
//! counted in the returned [`NormalizeReport`], as are repeated
//! `[Interface]` sections (the first one wins).

use tracing::warn;
use winnow::combinator::{delimited, separated_pair};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{rest, take_till};

use super::normalize::NormalizeReport;
use super::{ConfigDocument, Directive, InterfaceRecord, PeerRecord, Section, SectionKind};

/// Result type for line parsers.
type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Result of [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    /// The parsed document.
    pub document: ConfigDocument,
    /// What was dropped while parsing.
    pub report: NormalizeReport,
}

/// Classification of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineKind<'a> {
    Blank,
    Comment(&'a str),
    Marker(SectionKind),
    Entry(&'a str, &'a str),
    Other,
}

fn section_marker<'i>(input: &mut &'i str) -> PResult<&'i str> {
    delimited('[', take_till(1.., ']'), ']').parse_next(input)
}

fn key_value<'i>(input: &mut &'i str) -> PResult<(&'i str, &'i str)> {
    separated_pair(take_till(1.., '='), '=', rest).parse_next(input)
}

/// Classify a single line.
pub(crate) fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if let Some(comment) = trimmed.strip_prefix('#') {
        return LineKind::Comment(comment.trim());
    }
    if let Ok(name) = section_marker.parse(trimmed) {
        let name = name.trim();
        if name.eq_ignore_ascii_case("interface") {
            return LineKind::Marker(SectionKind::Interface);
        }
        if name.eq_ignore_ascii_case("peer") {
            return LineKind::Marker(SectionKind::Peer);
        }
        return LineKind::Other;
    }
    if let Ok((key, value)) = key_value.parse(trimmed) {
        let key = key.trim();
        let value = value.split('#').next().unwrap_or_default().trim();
        if !key.is_empty() {
            return LineKind::Entry(key, value);
        }
    }
    LineKind::Other
}

/// A section under construction.
struct Pending {
    kind: SectionKind,
    lines: Vec<String>,
    name: Option<String>,
    directives: Vec<Directive>,
}

impl Pending {
    fn new(kind: SectionKind, marker: &str) -> Self {
        Self {
            kind,
            lines: vec![marker.to_string()],
            name: None,
            directives: Vec::new(),
        }
    }

    fn push(&mut self, line: &str, kind: LineKind<'_>) {
        match kind {
            LineKind::Comment(text)
                if self.kind == SectionKind::Peer
                    && self.lines.len() == 1
                    && !text.is_empty() =>
            {
                self.name = Some(text.to_string());
            }
            LineKind::Entry(key, value) => self.directives.push(Directive::new(key, value)),
            _ => {}
        }
        self.lines.push(line.to_string());
    }
}

/// Parse configuration text.
pub fn parse(text: &str) -> Parsed {
    let mut preamble = Vec::new();
    let mut sections = Vec::new();
    let mut report = NormalizeReport::default();
    let mut current: Option<Pending> = None;
    let mut seen_interface = false;

    let mut finish = |pending: Pending, sections: &mut Vec<Section>| match pending.kind {
        SectionKind::Interface if seen_interface => {
            warn!(
                lines = pending.lines.len(),
                "dropping repeated [Interface] section"
            );
            report.dropped_interfaces += 1;
        }
        SectionKind::Interface => {
            seen_interface = true;
            sections.push(Section::Interface(InterfaceRecord::from_parts(
                pending.lines,
                pending.directives,
            )));
        }
        SectionKind::Peer if pending.directives.is_empty() => {
            warn!(
                name = pending.name.as_deref().unwrap_or("<unnamed>"),
                "dropping [Peer] section without any key-value lines"
            );
            report.dropped_peers += 1;
        }
        SectionKind::Peer => {
            sections.push(Section::Peer(PeerRecord::from_parts(
                pending.lines,
                pending.name,
                pending.directives,
            )));
        }
    };

    for line in text.lines() {
        // `lines` strips `\r\n` but leaves a lone `\r` on an unterminated
        // last line.
        let line = line.strip_suffix('\r').unwrap_or(line);
        let kind = classify(line);
        if let LineKind::Marker(section) = kind {
            if let Some(done) = current.take() {
                finish(done, &mut sections);
            }
            current = Some(Pending::new(section, line));
        } else if let Some(pending) = current.as_mut() {
            pending.push(line, kind);
        } else {
            preamble.push(line.to_string());
        }
    }
    if let Some(done) = current.take() {
        finish(done, &mut sections);
    }

    Parsed {
        document: ConfigDocument::from_parts(preamble, sections),
        report,
    }
}

/// Serialize a document. Every line is terminated by `\n`.
pub fn serialize(doc: &ConfigDocument) -> String {
    let mut out = String::new();
    let lines = doc
        .preamble()
        .iter()
        .chain(doc.sections().iter().flat_map(|s| s.lines().iter()));
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
