//! Line parsers, one per token category.
//!
//! Every parser finds candidate tokens in a line, asks its category's
//! [`MappingStore`] for the synthetic value, and rewrites the line. Parsers
//! hold no per-line state; everything that must persist lives in the store.
//!
//! The regex driven parsers share [`PatternEngine`]. It runs the detection
//! patterns in declared order, lets the earliest pattern claim a span, trims
//! boundary padding off every match and resumes searching at the end of the
//! trimmed token.

pub mod hostname;
pub mod ip;
pub mod keyword;
pub mod literal;
pub mod mac;
pub mod patterns;
pub mod username;

pub use hostname::HostnameParser;
pub use ip::IpParser;
pub use keyword::KeywordParser;
pub use mac::MacParser;
pub use username::UsernameParser;

pub use crate::mappings::Category as ParserKind;

use crate::error::Result;
use crate::mappings::MappingStore;
use regex::Regex;
use std::sync::Arc;

/// Common prefix of every word-style synthetic value.
pub const SYNTHETIC_WORD_PREFIX: &str = "obfuscated";

/// One category's detection and rewrite logic.
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ParserKind;

    /// Key of this parser's section in a mapping file.
    fn map_key(&self) -> &'static str {
        self.kind().map_key()
    }

    fn mapping(&self) -> &Arc<MappingStore>;

    /// Archive relative files read before obfuscation starts.
    fn prep_files(&self) -> &'static [&'static str] {
        &[]
    }

    /// Seed the store from the content of a preparation file.
    ///
    /// Returns the number of values found.
    fn prepare(&self, content: &str) -> Result<usize> {
        let mut found = 0;
        for line in content.lines() {
            found += self.parse_line(line)?.1;
        }
        Ok(found)
    }

    /// Obfuscate one line, returning the new line and the substitution count.
    fn parse_line(&self, line: &str) -> Result<(String, usize)>;
}

/// Byte range of a canonical token inside a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Decides on a candidate given the full line and the token span: keep it,
/// narrow it to a sub-span, or drop it with `None`.
pub type SpanFilter = Box<dyn Fn(&str, Span) -> Option<Span> + Send + Sync>;

/// Shared scanner for the regex based parsers.
pub struct PatternEngine {
    patterns: Vec<&'static Regex>,
    markers: &'static [&'static str],
    skip_lines: Vec<&'static Regex>,
    filter: Option<SpanFilter>,
}

impl PatternEngine {
    pub fn new(patterns: Vec<&'static Regex>, markers: &'static [&'static str]) -> Self {
        Self {
            patterns,
            markers,
            skip_lines: vec![&*patterns::RE_BINARY_MARKER],
            filter: None,
        }
    }

    /// Pass every candidate through `filter` before it is claimed.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str, Span) -> Option<Span> + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn should_skip_line(&self, line: &str) -> bool {
        self.skip_lines.iter().any(|re| re.is_match(line))
    }

    /// Canonical token spans in the order they were claimed.
    pub fn find_tokens(&self, line: &str) -> Vec<Span> {
        let mut claimed: Vec<Span> = Vec::new();
        for re in &self.patterns {
            let mut pos = 0;
            while pos <= line.len() {
                let Some(m) = re.find_at(line, pos) else {
                    break;
                };
                let Some(span) = trim_token(line, m.start(), m.end()) else {
                    pos = next_boundary(line, m.start().max(m.end()));
                    continue;
                };
                pos = span.end;
                let span = match &self.filter {
                    Some(filter) => match filter(line, span) {
                        Some(kept) => kept,
                        None => continue,
                    },
                    None => span,
                };
                if claimed.iter().any(|c| c.overlaps(&span)) {
                    continue;
                }
                claimed.push(span);
            }
        }
        claimed
    }

    fn has_marker(&self, token: &str) -> bool {
        let lower = token.to_ascii_lowercase();
        self.markers.iter().any(|m| lower.starts_with(m))
    }

    /// Substitute every discovered token through `store`.
    pub fn substitute(&self, line: &str, store: &MappingStore) -> Result<(String, usize)> {
        if self.should_skip_line(line) {
            return Ok((line.to_string(), 0));
        }
        let mut replacements: Vec<(String, String)> = Vec::new();
        let mut count = 0;
        for span in self.find_tokens(line) {
            let token = &line[span.start..span.end];
            if self.has_marker(token) || store.is_synthetic(token) {
                continue;
            }
            let synthetic = store.get_or_create(token)?;
            if synthetic == token {
                continue;
            }
            count += 1;
            if !replacements.iter().any(|(t, _)| t == token) {
                replacements.push((token.to_string(), synthetic));
            }
        }
        if replacements.is_empty() {
            return Ok((line.to_string(), 0));
        }
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let mut out = line.to_string();
        for (token, synthetic) in &replacements {
            out = replace_bounded(&out, token, synthetic).0;
        }
        Ok((out, count))
    }
}

pub(crate) fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn next_boundary(line: &str, mut pos: usize) -> usize {
    pos += 1;
    while pos < line.len() && !line.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

/// Strip non-alphanumeric padding from both ends of `line[start..end]`.
fn trim_token(line: &str, start: usize, end: usize) -> Option<Span> {
    let text = &line[start..end];
    let lead = text.len() - text.trim_start_matches(|c: char| !c.is_alphanumeric()).len();
    let trail = text.len() - text.trim_end_matches(|c: char| !c.is_alphanumeric()).len();
    if lead + trail >= text.len() {
        return None;
    }
    Some(Span {
        start: start + lead,
        end: end - trail,
    })
}

/// Replace occurrences of `token` that are not part of a longer word.
///
/// Returns the new text and the number of replacements.
pub fn replace_bounded(text: &str, token: &str, replacement: &str) -> (String, usize) {
    bounded_replace(text, text, token, replacement)
}

/// [`replace_bounded`] ignoring ASCII case.
pub fn replace_bounded_ignore_case(text: &str, token: &str, replacement: &str) -> (String, usize) {
    let folded = text.to_ascii_lowercase();
    bounded_replace(text, &folded, &token.to_ascii_lowercase(), replacement)
}

// `haystack` has the byte layout of `text`
fn bounded_replace(text: &str, haystack: &str, token: &str, replacement: &str) -> (String, usize) {
    if token.is_empty() {
        return (text.to_string(), 0);
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut replaced = 0;
    for (idx, _) in haystack.match_indices(token) {
        if idx < last {
            continue;
        }
        let end = idx + token.len();
        let before_ok = text[..idx].chars().next_back().map_or(true, |c| !is_word_char(c));
        let after_ok = text[end..].chars().next().map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            out.push_str(&text[last..idx]);
            out.push_str(replacement);
            last = end;
            replaced += 1;
        }
    }
    out.push_str(&text[last..]);
    (out, replaced)
}

/// The word containing `span`, expanded over alphanumeric characters.
pub(crate) fn enclosing_word(line: &str, span: Span) -> &str {
    let start = line[..span.start]
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric())
        .last()
        .map_or(span.start, |(i, _)| i);
    let end = line[span.end..]
        .char_indices()
        .find(|(_, c)| !c.is_alphanumeric())
        .map_or(line.len(), |(i, _)| span.end + i);
    &line[start..end]
}

/// Build the enabled parsers in their fixed run order.
pub fn build_parsers(
    mappings: &crate::mappings::MappingSet,
    config: &crate::config::CleanerConfig,
) -> Result<Vec<Box<dyn Parser>>> {
    let mut parsers: Vec<Box<dyn Parser>> = Vec::new();
    for kind in ParserKind::ALL {
        if !config.parser_enabled(kind) {
            continue;
        }
        let store = Arc::clone(mappings.store(kind));
        let parser: Box<dyn Parser> = match kind {
            ParserKind::Hostname => Box::new(HostnameParser::new(store)),
            ParserKind::Ip => Box::new(IpParser::new(store)),
            ParserKind::Mac => Box::new(MacParser::new(store)),
            ParserKind::Keyword => Box::new(KeywordParser::new(store, &config.parsers.keywords)?),
            ParserKind::Username => {
                Box::new(UsernameParser::new(store, &config.parsers.usernames)?)
            }
        };
        parsers.push(parser);
    }
    Ok(parsers)
}
