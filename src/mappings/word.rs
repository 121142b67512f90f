//! Counter based generator for keywords and usernames.

use super::Generator;
use std::any::Any;

/// Produces `<prefix>0`, `<prefix>1`, ...
#[derive(Debug, Clone)]
pub struct WordGenerator {
    prefix: &'static str,
    lowercase: bool,
    counter: u64,
}

impl WordGenerator {
    /// `lowercase` folds keys so `Alice` and `alice` share one value.
    pub fn new(prefix: &'static str, lowercase: bool) -> Self {
        Self {
            prefix,
            lowercase,
            counter: 0,
        }
    }

    pub fn keyword() -> Self {
        Self::new("obfuscatedword", false)
    }

    pub fn username() -> Self {
        Self::new("obfuscateduser", true)
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }
}

impl Generator for WordGenerator {
    fn ignore(&self, item: &str) -> bool {
        item.trim().is_empty()
    }

    fn normalize(&self, item: &str) -> String {
        let item = item.trim();
        if self.lowercase {
            item.to_lowercase()
        } else {
            item.to_string()
        }
    }

    fn generate(&mut self, _key: &str, _attempt: u32) -> Option<String> {
        let value = format!("{}{}", self.prefix, self.counter);
        self.counter = self.counter.checked_add(1)?;
        Some(value)
    }

    fn observe(&mut self, _key: &str, synthetic: &str) {
        if let Some(n) = synthetic
            .strip_prefix(self.prefix)
            .and_then(|rest| rest.parse::<u64>().ok())
        {
            self.counter = self.counter.max(n.saturating_add(1));
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
