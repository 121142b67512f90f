//! MAC address parser.
//!
//! EUI-64 forms are matched first so that the 48-bit pattern never claims
//! part of a longer address.

use super::patterns::{RE_MAC_48, RE_MAC_EUI64, RE_MAC_QUAD};
use super::{Parser, ParserKind, PatternEngine};
use crate::error::Result;
use crate::mappings::mac::MAC_MARKERS;
use crate::mappings::MappingStore;
use std::sync::Arc;

static PREP_FILES: [&str; 1] = ["sos_commands/networking/ip_-d_address"];

pub struct MacParser {
    store: Arc<MappingStore>,
    engine: PatternEngine,
}

impl MacParser {
    pub fn new(store: Arc<MappingStore>) -> Self {
        Self {
            store,
            engine: PatternEngine::new(
                vec![&*RE_MAC_EUI64, &*RE_MAC_QUAD, &*RE_MAC_48],
                &MAC_MARKERS,
            ),
        }
    }
}

impl Parser for MacParser {
    fn name(&self) -> &'static str {
        "MAC Parser"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Mac
    }

    fn mapping(&self) -> &Arc<MappingStore> {
        &self.store
    }

    fn prep_files(&self) -> &'static [&'static str] {
        &PREP_FILES
    }

    fn parse_line(&self, line: &str) -> Result<(String, usize)> {
        if memchr::memchr2(b':', b'-', line.as_bytes()).is_none() {
            return Ok((line.to_string(), 0));
        }
        self.engine.substitute(line, &self.store)
    }
}
