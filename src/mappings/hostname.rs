//! Hostname and domain generator.
//!
//! Short names become `obfuscatedhostN`. Domains are obfuscated as whole
//! units without their top-level label, so `example.com` and
//! `host.foo.example.com` get unrelated values:
//!
//! * `example.com` → `obfuscateddomain0.com`
//! * `web01.example.com` → `obfuscatedhost0.obfuscateddomain0.com`
//!
//! Only names inside a loaded domain are touched. Everything else matched by
//! the loose hostname pattern (file names, package names) passes through.

use super::Generator;
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::collections::HashMap;

pub const HOST_MARKER: &str = "obfuscatedhost";
pub const DOMAIN_MARKER: &str = "obfuscateddomain";

static IGNORE_MATCHES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^localhost(?:\.|$)", r"localdomain", r"^com\."]
        .iter()
        .map(|p| Regex::new(p).expect("valid hostname ignore regex"))
        .collect()
});

#[derive(Debug, Clone, Default)]
pub struct HostnameGenerator {
    /// Loaded domains, lower-cased with their top-level label.
    domains: Vec<String>,
    hosts: HashMap<String, String>,
    subdomains: HashMap<String, String>,
    host_count: u64,
    domain_count: u64,
}

impl HostnameGenerator {
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let mut generator = Self::default();
        for domain in domains {
            generator.add_domain(domain.as_ref());
        }
        generator
    }

    /// Register a domain whose names should be obfuscated.
    pub fn add_domain(&mut self, domain: &str) {
        let domain = domain.trim().trim_matches('.').to_lowercase();
        if domain.is_empty() || !domain.contains('.') || self.is_ignored(&domain) {
            return;
        }
        if !self.domains.contains(&domain) {
            self.domains.push(domain);
        }
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    fn is_ignored(&self, name: &str) -> bool {
        IGNORE_MATCHES.iter().any(|re| re.is_match(name))
    }

    fn in_loaded_domains(&self, name: &str) -> bool {
        if !name.contains('.') {
            // short names only ever reach the store on purpose
            return true;
        }
        self.domains
            .iter()
            .any(|d| name == d || name.strip_suffix(d.as_str()).is_some_and(|h| h.ends_with('.')))
    }

    /// Byte length of the part of `token` to obfuscate.
    ///
    /// A name inside a loaded domain is taken whole. A name that only reaches
    /// a loaded domain before running on into a suffix, as in
    /// `www.example.com-access.log`, is cut right after the domain.
    pub fn scrub_len(&self, token: &str) -> usize {
        if self.in_loaded_domains(&self.normalize(token)) {
            return token.len();
        }
        let folded = token.to_ascii_lowercase();
        let bytes = folded.as_bytes();
        let mut best = None;
        for domain in &self.domains {
            for (idx, _) in folded.match_indices(domain.as_str()) {
                let end = idx + domain.len();
                let starts_label = idx == 0 || bytes[idx - 1] == b'.';
                let runs_on = matches!(bytes.get(end).copied(), Some(b'.' | b'-'));
                if starts_label && runs_on {
                    best = best.max(Some(end));
                }
            }
        }
        best.unwrap_or(token.len())
    }

    fn short_name(&mut self, host: &str, fresh: bool) -> String {
        if !fresh {
            if let Some(existing) = self.hosts.get(host) {
                return existing.clone();
            }
        }
        let value = format!("{HOST_MARKER}{}", self.host_count);
        self.host_count += 1;
        if !fresh {
            self.hosts.insert(host.to_string(), value.clone());
        }
        value
    }

    fn subdomain(&mut self, dname: &str) -> String {
        if let Some(existing) = self.subdomains.get(dname) {
            return existing.clone();
        }
        let value = format!("{DOMAIN_MARKER}{}", self.domain_count);
        self.domain_count += 1;
        self.subdomains.insert(dname.to_string(), value.clone());
        value
    }

    fn bump_counter(counter: &mut u64, label: &str, marker: &str) {
        if let Some(n) = label.strip_prefix(marker).and_then(|r| r.parse::<u64>().ok()) {
            *counter = (*counter).max(n.saturating_add(1));
        }
    }
}

impl Generator for HostnameGenerator {
    fn ignore(&self, item: &str) -> bool {
        let name = self.normalize(item);
        name.is_empty() || self.is_ignored(&name) || !self.in_loaded_domains(&name)
    }

    fn normalize(&self, item: &str) -> String {
        item.trim()
            .trim_start_matches(['.', '_'])
            .trim_end_matches('.')
            .to_lowercase()
    }

    fn generate(&mut self, key: &str, attempt: u32) -> Option<String> {
        let labels: Vec<&str> = key.split('.').collect();
        if labels.iter().any(|l| l.is_empty()) {
            return None;
        }
        let fresh = attempt > 0;
        let value = match labels.as_slice() {
            [host] => self.short_name(host, fresh),
            [dname, tld] => format!("{}.{tld}", self.subdomain(dname)),
            [host, middle @ .., tld] => {
                let ob_host = self.short_name(host, fresh);
                let ob_domain = self.subdomain(&middle.join("."));
                format!("{ob_host}.{ob_domain}.{tld}")
            }
            [] => return None,
        };
        Some(value)
    }

    fn observe(&mut self, key: &str, synthetic: &str) {
        let real: Vec<&str> = key.split('.').collect();
        let syn: Vec<&str> = synthetic.split('.').collect();
        for label in &syn {
            Self::bump_counter(&mut self.host_count, label, HOST_MARKER);
            Self::bump_counter(&mut self.domain_count, label, DOMAIN_MARKER);
        }
        if real.len() != syn.len() {
            return;
        }
        match (real.as_slice(), syn.as_slice()) {
            ([host], [ob_host]) => {
                self.hosts.entry(host.to_string()).or_insert_with(|| ob_host.to_string());
            }
            ([dname, tld], [ob_domain, _]) => {
                self.subdomains
                    .entry(dname.to_string())
                    .or_insert_with(|| ob_domain.to_string());
                self.add_domain(&format!("{dname}.{tld}"));
            }
            ([host, middle @ .., tld], [ob_host, ob_middle @ .., _]) if ob_middle.len() == 1 => {
                self.hosts.entry(host.to_string()).or_insert_with(|| ob_host.to_string());
                let dname = middle.join(".");
                self.add_domain(&format!("{dname}.{tld}"));
                self.subdomains
                    .entry(dname)
                    .or_insert_with(|| ob_middle[0].to_string());
            }
            _ => {}
        }
    }

    fn accepts(&self, key: &str, synthetic: &str) -> bool {
        !key.is_empty() && synthetic.split('.').all(|l| !l.is_empty())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
