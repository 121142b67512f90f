//! Username parser.
//!
//! Names come from `lastlog` output in the archive and from configuration.
//! They are matched as whole words, ignoring case.

use super::literal::LiteralMatcher;
use super::{Parser, ParserKind};
use crate::error::Result;
use crate::mappings::MappingStore;
use std::sync::Arc;
use tracing::debug;

static PREP_FILES: [&str; 1] = ["sos_commands/login/lastlog_-u_1000-60000"];

/// Accounts present on every system.
const SKIP_USERS: [&str; 10] = [
    "core",
    "nobody",
    "nfsnobody",
    "shutdown",
    "stack",
    "reboot",
    "root",
    "ubuntu",
    "username",
    "wtmp",
];

pub struct UsernameParser {
    store: Arc<MappingStore>,
    matcher: LiteralMatcher,
}

impl UsernameParser {
    pub fn new<S: AsRef<str>>(store: Arc<MappingStore>, usernames: &[S]) -> Result<Self> {
        let parser = Self {
            store,
            matcher: LiteralMatcher::new(true, true),
        };
        for name in usernames {
            parser.add_user(name.as_ref())?;
        }
        Ok(parser)
    }

    fn add_user(&self, name: &str) -> Result<bool> {
        let name = name.trim().to_lowercase();
        if name.len() < 2 || SKIP_USERS.contains(&name.as_str()) {
            return Ok(false);
        }
        self.store.get_or_create(&name)?;
        Ok(true)
    }
}

impl Parser for UsernameParser {
    fn name(&self) -> &'static str {
        "Username Parser"
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Username
    }

    fn mapping(&self) -> &Arc<MappingStore> {
        &self.store
    }

    fn prep_files(&self) -> &'static [&'static str] {
        &PREP_FILES
    }

    /// Read the first column of lastlog output, skipping the header.
    fn prepare(&self, content: &str) -> Result<usize> {
        let mut users: Vec<&str> = Vec::new();
        for line in content.lines() {
            let Some(first) = line.split_whitespace().next() else {
                continue;
            };
            if first.eq_ignore_ascii_case("username") {
                continue;
            }
            users.push(first);
            if let Some((_, user)) = first.split_once('\\') {
                users.push(user);
            }
        }
        // longest first so a name never shadows one that contains it
        users.sort_by(|a, b| b.len().cmp(&a.len()));
        users.dedup();

        let mut found = 0;
        for user in users {
            if self.add_user(user)? {
                found += 1;
            }
        }
        debug!(count = found, "Loaded usernames from lastlog");
        Ok(found)
    }

    fn parse_line(&self, line: &str) -> Result<(String, usize)> {
        self.matcher.substitute(line, &self.store)
    }
}
