use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn full_postcode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]{1,2}[0-9][A-Z0-9]?)\s*([0-9])[A-Z]{2}$").expect("static regex")
    })
}

fn outward_only_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{1,2}[0-9][A-Z0-9]?$").expect("static regex"))
}

/// Trimmed, upper-cased form of a raw postcode.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Space-free key used to join postcodes across sources.
pub fn clean_key(raw: &str) -> String {
    normalize(raw).chars().filter(|c| !c.is_whitespace()).collect()
}

/// Postcode district, i.e. the outward code.
pub fn district(raw: &str) -> Option<String> {
    let pc = normalize(raw);
    if let Some(caps) = full_postcode_re().captures(&pc) {
        return Some(caps[1].to_owned());
    }
    pc.split_whitespace().next().map(str::to_owned)
}

/// Postcode sector: outward code, a space, and the first character of the
/// inward code.
pub fn sector(raw: &str) -> Option<String> {
    let pc = normalize(raw);
    if let Some(caps) = full_postcode_re().captures(&pc) {
        return Some(format!("{} {}", &caps[1], &caps[2]));
    }
    let parts: Vec<&str> = pc.split_whitespace().collect();
    match parts.as_slice() {
        [outward, inward] => inward
            .chars()
            .next()
            .map(|first| format!("{} {}", outward, first)),
        [outward] if outward.len() > 1 && outward_only_re().is_match(outward) => {
            Some((*outward).to_owned())
        }
        _ => None,
    }
}

/// Outward code of a space-free postcode, found by stripping a trailing
/// digit-letter-letter inward code.
pub fn outward_from_clean(clean: &str) -> Option<&str> {
    let bytes = clean.as_bytes();
    if bytes.len() < 5 {
        return None;
    }
    let n = bytes.len();
    let inward = &bytes[n - 3..];
    if inward[0].is_ascii_digit() && inward[1].is_ascii_alphabetic() && inward[2].is_ascii_alphabetic() {
        Some(&clean[..n - 3])
    } else {
        None
    }
}

/// A postcode with its derived geography. Sector and district are always
/// recomputed from the postcode string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Postcode {
    display: String,
    key: String,
    sector: String,
    district: String,
}

impl Postcode {
    /// Parse a raw postcode. `None` unless both a district and a sector can be
    /// derived.
    pub fn parse(raw: &str) -> Option<Self> {
        let display = normalize(raw);
        if display.is_empty() {
            return None;
        }
        let district = district(&display)?;
        let sector = sector(&display)?;
        Some(Self {
            key: clean_key(&display),
            display,
            sector,
            district,
        })
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    /// Space-free postcode, the join key of the panel.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn sector(&self) -> &str {
        &self.sector
    }

    pub fn district(&self) -> &str {
        &self.district
    }
}
