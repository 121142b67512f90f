//! Literal matching for the keyword and username parsers.
//!
//! The automaton is built from the store's real values and rebuilt whenever
//! the store has grown since the last build.

use super::{enclosing_word, is_word_char, Span, SYNTHETIC_WORD_PREFIX};
use crate::error::Result;
use crate::mappings::MappingStore;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use std::sync::RwLock;

struct Automaton {
    generation: usize,
    matcher: Option<AhoCorasick>,
    values: Vec<String>,
}

pub struct LiteralMatcher {
    case_insensitive: bool,
    whole_word: bool,
    cache: RwLock<Automaton>,
}

impl LiteralMatcher {
    pub fn new(case_insensitive: bool, whole_word: bool) -> Self {
        Self {
            case_insensitive,
            whole_word,
            cache: RwLock::new(Automaton {
                generation: usize::MAX,
                matcher: None,
                values: Vec::new(),
            }),
        }
    }

    fn build(&self, store: &MappingStore) -> Result<Automaton> {
        let values = store.real_values();
        let matcher = if values.is_empty() {
            None
        } else {
            Some(
                AhoCorasickBuilder::new()
                    .match_kind(MatchKind::LeftmostLongest)
                    .ascii_case_insensitive(self.case_insensitive)
                    .build(&values)
                    .map_err(|e| crate::error::CleanerError::InvalidPattern {
                        pattern: format!("{} literals", store.category()),
                        message: e.to_string(),
                    })?,
            )
        };
        Ok(Automaton {
            generation: values.len(),
            matcher,
            values,
        })
    }

    fn accept(&self, line: &str, span: Span) -> bool {
        if self.whole_word {
            let before = line[..span.start].chars().next_back();
            let after = line[span.end..].chars().next();
            if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
                return false;
            }
        }
        // never rewrite inside a value another parser produced
        !enclosing_word(line, span)
            .to_ascii_lowercase()
            .starts_with(SYNTHETIC_WORD_PREFIX)
    }

    /// Replace every accepted occurrence of a known value.
    pub fn substitute(&self, line: &str, store: &MappingStore) -> Result<(String, usize)> {
        let current = store.len();
        let stale = self
            .cache
            .read()
            .map_or(true, |c| c.generation != current);
        if stale {
            let fresh = self.build(store)?;
            let mut cache = self.cache.write().unwrap_or_else(|p| p.into_inner());
            *cache = fresh;
        }
        let cache = self.cache.read().unwrap_or_else(|p| p.into_inner());
        let Some(matcher) = cache.matcher.as_ref() else {
            return Ok((line.to_string(), 0));
        };

        let mut out = String::with_capacity(line.len());
        let mut last = 0;
        let mut count = 0;
        for m in matcher.find_iter(line) {
            let span = Span {
                start: m.start(),
                end: m.end(),
            };
            if !self.accept(line, span) {
                continue;
            }
            let value = &cache.values[m.pattern().as_usize()];
            let Some(synthetic) = store.get(value) else {
                continue;
            };
            out.push_str(&line[last..span.start]);
            out.push_str(&synthetic);
            last = span.end;
            count += 1;
        }
        out.push_str(&line[last..]);
        Ok((out, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::{Category, WordGenerator};

    #[test]
    fn test_rebuilds_when_store_grows() {
        let store = MappingStore::new(Category::Keyword, Box::new(WordGenerator::keyword()));
        let m = LiteralMatcher::new(false, false);
        assert_eq!(m.substitute("alpha beta", &store).unwrap().1, 0);
        store.get_or_create("beta").unwrap();
        let (line, count) = m.substitute("alpha beta", &store).unwrap();
        assert_eq!(line, "alpha obfuscatedword0");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_whole_word_case_insensitive() {
        let store = MappingStore::new(Category::Username, Box::new(WordGenerator::username()));
        store.get_or_create("alice").unwrap();
        let m = LiteralMatcher::new(true, true);
        let (line, count) = m.substitute("Alice malice alice_x ALICE.", &store).unwrap();
        assert_eq!(line, "obfuscateduser0 malice alice_x obfuscateduser0.");
        assert_eq!(count, 2);
    }
}
