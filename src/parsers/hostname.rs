//! Hostname and domain parser.

use super::patterns::RE_HOSTNAME;
use super::{replace_bounded_ignore_case, Parser, ParserKind, PatternEngine, Span};
use crate::error::Result;
use crate::mappings::hostname::{DOMAIN_MARKER, HOST_MARKER};
use crate::mappings::{HostnameGenerator, MappingStore};
use std::sync::{Arc, RwLock};
use tracing::debug;

static MARKERS: [&str; 2] = [HOST_MARKER, DOMAIN_MARKER];
static PREP_FILES: [&str; 1] = ["sos_commands/host/hostname"];

pub struct HostnameParser {
    store: Arc<MappingStore>,
    engine: PatternEngine,
    /// Short names replaced wherever they stand alone.
    short_names: RwLock<Vec<String>>,
}

impl HostnameParser {
    pub fn new(store: Arc<MappingStore>) -> Self {
        // single label entries of a loaded mapping are short names too
        let mut short_names: Vec<String> = store
            .entries()
            .into_keys()
            .filter(|k| !k.contains('.'))
            .collect();
        short_names.sort_by(|a, b| b.len().cmp(&a.len()));
        let domains = Arc::clone(&store);
        let engine = PatternEngine::new(vec![&*RE_HOSTNAME], &MARKERS).with_filter(move |line, span| {
            let token = &line[span.start..span.end];
            let len = domains
                .with_generator::<HostnameGenerator, _>(|g| g.scrub_len(token))
                .unwrap_or(token.len());
            Some(Span {
                start: span.start,
                end: span.start + len,
            })
        });
        Self {
            store,
            engine,
            short_names: RwLock::new(short_names),
        }
    }

    pub fn short_names(&self) -> Vec<String> {
        self.short_names
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn add_short_name(&self, name: &str) {
        let name = name.to_lowercase();
        if name.is_empty() {
            return;
        }
        let mut names = self.short_names.write().unwrap_or_else(|p| p.into_inner());
        if !names.contains(&name) {
            names.push(name);
            names.sort_by(|a, b| b.len().cmp(&a.len()));
        }
    }

    /// Register the system hostname: its domain, its short name, and the
    /// full name itself.
    pub fn load_hostname_into_map(&self, hostname: &str) -> Result<()> {
        let hostname = hostname.trim().trim_end_matches('.').to_lowercase();
        if hostname.is_empty() || hostname.contains("localhost") {
            return Ok(());
        }
        let labels: Vec<&str> = hostname.split('.').collect();
        if labels.iter().any(|l| l.is_empty()) {
            debug!(hostname = %hostname, "Ignoring malformed hostname");
            return Ok(());
        }
        self.store.with_generator::<HostnameGenerator, _>(|g| {
            if labels.len() > 3 {
                g.add_domain(&labels[labels.len() - 2..].join("."));
            }
            if labels.len() > 2 {
                g.add_domain(&labels[1..].join("."));
            }
        });
        self.add_short_name(labels[0]);
        self.store.get_or_create(labels[0])?;
        if labels.len() > 1 {
            self.store.get_or_create(&hostname)?;
        }
        Ok(())
    }
}

impl Parser for HostnameParser {
    fn name(&self) -> &'static str {
        "Hostname Parser"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Hostname
    }

    fn mapping(&self) -> &Arc<MappingStore> {
        &self.store
    }

    fn prep_files(&self) -> &'static [&'static str] {
        &PREP_FILES
    }

    fn prepare(&self, content: &str) -> Result<usize> {
        match content.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(hostname) => {
                self.load_hostname_into_map(hostname)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn parse_line(&self, line: &str) -> Result<(String, usize)> {
        if !line.contains('.') && self.short_names.read().map_or(true, |s| s.is_empty()) {
            return Ok((line.to_string(), 0));
        }
        let (mut line, mut count) = self.engine.substitute(line, &self.store)?;
        if self.engine.should_skip_line(&line) {
            return Ok((line, count));
        }
        let mut folded = line.to_ascii_lowercase();
        for short in self.short_names() {
            if !folded.contains(short.as_str()) {
                continue;
            }
            let Some(synthetic) = self.store.get(&short) else {
                continue;
            };
            let (replaced, n) = replace_bounded_ignore_case(&line, &short, &synthetic);
            if n > 0 {
                line = replaced;
                folded = line.to_ascii_lowercase();
                count += n;
            }
        }
        Ok((line, count))
    }
}
