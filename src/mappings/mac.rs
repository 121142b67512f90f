//! MAC address generator.
//!
//! Synthetic addresses keep the shape of the input and start with the
//! `53:4f:53` marker, so they are recognizable and never look like a vendor
//! assigned address:
//!
//! * 48-bit `53:4f:53:XX:XX:XX`
//! * EUI-64 `53:4f:53:ff:fe:XX:XX:XX`
//! * quad form `534f:53ff:feXX:XXXX`

use super::Generator;
use std::any::Any;

/// Marker prefixes of every synthetic MAC address.
pub const MAC_MARKERS: [&str; 2] = ["53:4f:53", "534f:53"];

const COUNTER_LIMIT: u32 = 0x00FF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacShape {
    Octets6,
    Octets8,
    Quad,
}

fn shape_of(key: &str) -> Option<MacShape> {
    let groups: Vec<&str> = key.split(':').collect();
    let all_hex = groups
        .iter()
        .all(|g| !g.is_empty() && g.chars().all(|c| c.is_ascii_hexdigit()));
    if !all_hex {
        return None;
    }
    match (groups.len(), groups[0].len()) {
        (6, 2) if groups.iter().all(|g| g.len() == 2) => Some(MacShape::Octets6),
        (8, 2) if groups.iter().all(|g| g.len() == 2) => Some(MacShape::Octets8),
        (4, 4) if groups.iter().all(|g| g.len() == 4) => Some(MacShape::Quad),
        _ => None,
    }
}

/// Counter backed generator shared by all three shapes.
#[derive(Debug, Clone)]
pub struct MacGenerator {
    counter: u32,
}

impl Default for MacGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MacGenerator {
    pub fn new() -> Self {
        Self { counter: 1 }
    }

    fn render(shape: MacShape, n: u32) -> String {
        let [_, a, b, c] = n.to_be_bytes();
        match shape {
            MacShape::Octets6 => format!("53:4f:53:{a:02x}:{b:02x}:{c:02x}"),
            MacShape::Octets8 => format!("53:4f:53:ff:fe:{a:02x}:{b:02x}:{c:02x}"),
            MacShape::Quad => format!("534f:53ff:fe{a:02x}:{b:02x}{c:02x}"),
        }
    }
}

impl Generator for MacGenerator {
    fn ignore(&self, item: &str) -> bool {
        let key = self.normalize(item);
        if shape_of(&key).is_none() {
            return true;
        }
        // broadcast and all-zero placeholders carry no identity
        let digits: String = key.chars().filter(|c| *c != ':').collect();
        digits.chars().all(|c| c == '0') || digits.chars().all(|c| c == 'f')
    }

    fn normalize(&self, item: &str) -> String {
        item.trim().to_ascii_lowercase().replace('-', ":")
    }

    fn generate(&mut self, key: &str, _attempt: u32) -> Option<String> {
        let shape = shape_of(key)?;
        if self.counter > COUNTER_LIMIT {
            return None;
        }
        let value = Self::render(shape, self.counter);
        self.counter += 1;
        Some(value)
    }

    fn observe(&mut self, _key: &str, synthetic: &str) {
        if !MAC_MARKERS.iter().any(|m| synthetic.starts_with(m)) {
            return;
        }
        let digits: String = synthetic.chars().filter(|c| *c != ':').collect();
        if digits.len() < 6 {
            return;
        }
        if let Ok(n) = u32::from_str_radix(&digits[digits.len() - 6..], 16) {
            self.counter = self.counter.max(n.saturating_add(1));
        }
    }

    fn accepts(&self, key: &str, synthetic: &str) -> bool {
        shape_of(key).is_some() && shape_of(&self.normalize(synthetic)).is_some()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
