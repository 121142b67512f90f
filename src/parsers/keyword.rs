//! Parser for user supplied keywords.

use super::literal::LiteralMatcher;
use super::{Parser, ParserKind};
use crate::error::Result;
use crate::mappings::MappingStore;
use std::sync::Arc;

pub struct KeywordParser {
    store: Arc<MappingStore>,
    matcher: LiteralMatcher,
}

impl KeywordParser {
    /// Seeds the store with `keywords`; values loaded from a mapping file
    /// are already in it.
    pub fn new<S: AsRef<str>>(store: Arc<MappingStore>, keywords: &[S]) -> Result<Self> {
        for keyword in keywords {
            let keyword = keyword.as_ref().trim();
            if keyword.len() > 1 {
                store.get_or_create(keyword)?;
            }
        }
        Ok(Self {
            store,
            matcher: LiteralMatcher::new(false, false),
        })
    }
}

impl Parser for KeywordParser {
    fn name(&self) -> &'static str {
        "Keyword Parser"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Keyword
    }

    fn mapping(&self) -> &Arc<MappingStore> {
        &self.store
    }

    fn prepare(&self, _content: &str) -> Result<usize> {
        Ok(0)
    }

    fn parse_line(&self, line: &str) -> Result<(String, usize)> {
        self.matcher.substitute(line, &self.store)
    }
}
