//! Per-postcode static attributes aggregated from energy certificates.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::{aggregate::median, geography::clean_key, ingest::CertificateRecord};

pub const UNKNOWN: &str = "Unknown";

const UNKNOWN_SYNONYMS: [&str; 9] = [
    "UNKNOWN", "NO DATA!", "INVALID!", "N/A", "NODATA", "NAN", "NONE", "NULL", "",
];

/// Trim and upper-case a categorical certificate value, folding the many
/// spellings of "no value" into [`UNKNOWN`].
pub fn clean_category(raw: Option<&str>) -> String {
    let value = raw.unwrap_or_default().trim().to_uppercase();
    if UNKNOWN_SYNONYMS.contains(&value.as_str()) {
        UNKNOWN.to_owned()
    } else {
        value
    }
}

fn parse_numeric(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Most frequent value, ties broken towards the lexicographically smallest.
fn mode<'a, I: IntoIterator<Item = &'a str>>(values: I) -> String {
    values
        .into_iter()
        .counts()
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.cmp(a)))
        .map(|(v, _)| v.to_owned())
        .unwrap_or_else(|| UNKNOWN.to_owned())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateAggregate {
    pub floor_area: f64,
    pub rooms: f64,
    pub property_type: String,
    pub energy_rating: String,
    pub built_form: String,
    pub age_band: String,
    pub tenure: String,
}

impl CertificateAggregate {
    pub fn fallback(floor_area: f64, rooms: f64) -> Self {
        Self {
            floor_area,
            rooms,
            property_type: UNKNOWN.to_owned(),
            energy_rating: UNKNOWN.to_owned(),
            built_form: UNKNOWN.to_owned(),
            age_band: UNKNOWN.to_owned(),
            tenure: UNKNOWN.to_owned(),
        }
    }

    /// Numeric features in a fixed order.
    pub fn numeric(&self) -> [(&'static str, f64); 2] {
        [
            ("cert_total_floor_area", self.floor_area),
            ("cert_number_habitable_rooms", self.rooms),
        ]
    }

    /// Categorical features in a fixed order.
    pub fn categorical(&self) -> [(&'static str, &str); 5] {
        [
            ("cert_property_type", &self.property_type),
            ("cert_current_energy_rating", &self.energy_rating),
            ("cert_built_form", &self.built_form),
            ("cert_construction_age_band", &self.age_band),
            ("cert_tenure", &self.tenure),
        ]
    }
}

struct CleanCertificate {
    key: String,
    floor_area: Option<f64>,
    rooms: Option<f64>,
    property_type: String,
    energy_rating: String,
    built_form: String,
    age_band: String,
    tenure: String,
}

/// Certificate aggregates keyed by space-free postcode, plus the aggregate
/// used for postcodes without any certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateTable {
    by_postcode: HashMap<String, CertificateAggregate>,
    fallback: CertificateAggregate,
}

impl Default for CertificateTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl CertificateTable {
    pub fn empty() -> Self {
        Self {
            by_postcode: HashMap::new(),
            fallback: CertificateAggregate::fallback(0.0, 0.0),
        }
    }

    pub fn from_records(records: &[CertificateRecord]) -> Self {
        let rows: Vec<CleanCertificate> = records
            .iter()
            .filter_map(|r| {
                let key = clean_key(r.postcode.as_deref()?);
                if key.is_empty() {
                    return None;
                }
                Some(CleanCertificate {
                    key,
                    floor_area: parse_numeric(r.floor_area.as_deref()),
                    rooms: parse_numeric(r.rooms.as_deref()),
                    property_type: clean_category(r.property_type.as_deref()),
                    energy_rating: clean_category(r.energy_rating.as_deref()),
                    built_form: clean_category(r.built_form.as_deref()),
                    age_band: clean_category(r.age_band.as_deref()),
                    tenure: clean_category(r.tenure.as_deref()),
                })
            })
            .collect();

        if rows.is_empty() {
            warn!("No certificate rows with a usable postcode");
            return Self::empty();
        }

        let column_median = |pick: fn(&CleanCertificate) -> Option<f64>, name: &str| {
            let mut values: Vec<f64> = rows.iter().filter_map(pick).collect();
            median(&mut values).unwrap_or_else(|| {
                warn!("Certificate column {} has no numeric values, filling with 0", name);
                0.0
            })
        };
        let area_fill = column_median(|r| r.floor_area, "TOTAL_FLOOR_AREA");
        let rooms_fill = column_median(|r| r.rooms, "NUMBER_HABITABLE_ROOMS");

        let by_postcode: HashMap<String, CertificateAggregate> = rows
            .into_iter()
            .into_group_map_by(|r| r.key.clone())
            .into_iter()
            .map(|(key, group)| {
                let mut areas: Vec<f64> = group.iter().map(|r| r.floor_area.unwrap_or(area_fill)).collect();
                let mut rooms: Vec<f64> = group.iter().map(|r| r.rooms.unwrap_or(rooms_fill)).collect();
                let agg = CertificateAggregate {
                    floor_area: median(&mut areas).unwrap_or(area_fill),
                    rooms: median(&mut rooms).unwrap_or(rooms_fill),
                    property_type: mode(group.iter().map(|r| r.property_type.as_str())),
                    energy_rating: mode(group.iter().map(|r| r.energy_rating.as_str())),
                    built_form: mode(group.iter().map(|r| r.built_form.as_str())),
                    age_band: mode(group.iter().map(|r| r.age_band.as_str())),
                    tenure: mode(group.iter().map(|r| r.tenure.as_str())),
                };
                (key, agg)
            })
            .collect();

        info!("Aggregated certificates for {} postcodes", by_postcode.len());
        Self {
            by_postcode,
            fallback: CertificateAggregate::fallback(area_fill, rooms_fill),
        }
    }

    pub fn lookup(&self, postcode_key: &str) -> &CertificateAggregate {
        self.by_postcode.get(postcode_key).unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &CertificateAggregate {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.by_postcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_postcode.is_empty()
    }
}
