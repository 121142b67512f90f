//! IPv4 address parser.

use super::patterns::RE_IPV4;
use super::{Parser, ParserKind, PatternEngine, Span};
use crate::error::Result;
use crate::mappings::ip::parse_ipv4;
use crate::mappings::MappingStore;
use std::sync::Arc;

static PREP_FILES: [&str; 1] = ["sos_commands/networking/ip_-o_addr"];

/// Reject version strings and invalid octets.
fn is_address(line: &str, span: Span) -> bool {
    let mut after = line[span.end..].chars();
    match after.next() {
        Some(c) if c.is_alphanumeric() || c == '_' => return false,
        Some('.') if after.next().is_some_and(|c| c.is_ascii_digit()) => return false,
        _ => {}
    }
    parse_ipv4(&line[span.start..span.end]).is_some()
}

/// Keep a valid address. A prefix that is really the start of a path
/// segment or out of range is dropped and the bare address kept.
fn accept_candidate(line: &str, span: Span) -> Option<Span> {
    if is_address(line, span) {
        return Some(span);
    }
    let slash = line[span.start..span.end].find('/')?;
    let bare = Span {
        start: span.start,
        end: span.start + slash,
    };
    is_address(line, bare).then_some(bare)
}

pub struct IpParser {
    store: Arc<MappingStore>,
    engine: PatternEngine,
}

impl IpParser {
    pub fn new(store: Arc<MappingStore>) -> Self {
        Self {
            store,
            engine: PatternEngine::new(vec![&*RE_IPV4], &[]).with_filter(accept_candidate),
        }
    }
}

impl Parser for IpParser {
    fn name(&self) -> &'static str {
        "IP Parser"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Ip
    }

    fn mapping(&self) -> &Arc<MappingStore> {
        &self.store
    }

    fn prep_files(&self) -> &'static [&'static str] {
        &PREP_FILES
    }

    fn parse_line(&self, line: &str) -> Result<(String, usize)> {
        if memchr::memchr(b'.', line.as_bytes()).is_none() {
            return Ok((line.to_string(), 0));
        }
        self.engine.substitute(line, &self.store)
    }
}
