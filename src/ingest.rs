//! Loading and cleaning of raw transaction and certificate files.

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::{error::IngestError, geography::Postcode, month::CorpusAnchor};

/// Prices at or below this many pounds are treated as non-market transfers.
pub const MIN_PRICE: f64 = 1000.0;

// Column positions in the headerless price-paid layout.
const COL_PRICE: usize = 1;
const COL_DATE: usize = 2;
const COL_POSTCODE: usize = 3;
const COL_PROPERTY_TYPE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyType {
    Detached,
    SemiDetached,
    Terraced,
    Flat,
    Other,
}

impl PropertyType {
    pub const ALL: [PropertyType; 5] = [
        PropertyType::Detached,
        PropertyType::SemiDetached,
        PropertyType::Terraced,
        PropertyType::Flat,
        PropertyType::Other,
    ];

    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "D" => PropertyType::Detached,
            "S" => PropertyType::SemiDetached,
            "T" => PropertyType::Terraced,
            "F" => PropertyType::Flat,
            _ => PropertyType::Other,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn slug(self) -> &'static str {
        match self {
            PropertyType::Detached => "detached",
            PropertyType::SemiDetached => "semi_detached",
            PropertyType::Terraced => "terraced",
            PropertyType::Flat => "flat",
            PropertyType::Other => "other",
        }
    }
}

/// One cleaned sale.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub price: f64,
    pub date: NaiveDate,
    pub postcode: Postcode,
    pub property_type: PropertyType,
}

/// The four columns of a price-paid row the pipeline consumes, still as text.
#[derive(Debug, Clone, Default)]
pub struct RawTransaction {
    pub price: String,
    pub date: String,
    pub postcode: String,
    pub property_type: String,
}

impl RawTransaction {
    fn from_record(record: &StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or_default().to_owned();
        Self {
            price: field(COL_PRICE),
            date: field(COL_DATE),
            postcode: field(COL_POSTCODE),
            property_type: field(COL_PROPERTY_TYPE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BadPrice,
    LowPrice,
    BadDate,
    BadPostcode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectCounts {
    pub malformed: usize,
    pub bad_price: usize,
    pub low_price: usize,
    pub bad_date: usize,
    pub bad_postcode: usize,
}

impl RejectCounts {
    fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::BadPrice => self.bad_price += 1,
            Rejection::LowPrice => self.low_price += 1,
            Rejection::BadDate => self.bad_date += 1,
            Rejection::BadPostcode => self.bad_postcode += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed + self.bad_price + self.low_price + self.bad_date + self.bad_postcode
    }

    fn merge(&mut self, other: RejectCounts) {
        self.malformed += other.malformed;
        self.bad_price += other.bad_price;
        self.low_price += other.low_price;
        self.bad_date += other.bad_date;
        self.bad_postcode += other.bad_postcode;
    }
}

/// Accepts `YYYY-MM-DD` optionally followed by a time component.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

pub fn clean_transaction(raw: &RawTransaction) -> Result<TransactionRecord, Rejection> {
    let price = raw
        .price
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite())
        .ok_or(Rejection::BadPrice)?;
    if price <= MIN_PRICE {
        return Err(Rejection::LowPrice);
    }
    let date = parse_date(&raw.date).ok_or(Rejection::BadDate)?;
    let postcode = Postcode::parse(&raw.postcode).ok_or(Rejection::BadPostcode)?;
    Ok(TransactionRecord {
        price,
        date,
        postcode,
        property_type: PropertyType::from_code(&raw.property_type),
    })
}

/// Cleaned transactions plus the corpus anchor observed while cleaning them.
#[derive(Debug, Clone, Default)]
pub struct CleanTransactions {
    pub records: Vec<TransactionRecord>,
    pub anchor: Option<CorpusAnchor>,
    pub rejected: RejectCounts,
}

impl CleanTransactions {
    pub fn push_raw(&mut self, raw: &RawTransaction) {
        match clean_transaction(raw) {
            Ok(record) => {
                self.anchor = Some(match self.anchor {
                    Some(anchor) => anchor.extend(record.date),
                    None => CorpusAnchor::new(record.date),
                });
                self.records.push(record);
            }
            Err(rejection) => self.rejected.record(rejection),
        }
    }

    pub fn from_raw<'a, I: IntoIterator<Item = &'a RawTransaction>>(rows: I) -> Self {
        let mut out = Self::default();
        for raw in rows {
            out.push_raw(raw);
        }
        out
    }

    fn merge(&mut self, other: CleanTransactions) {
        self.records.extend(other.records);
        self.anchor = match (self.anchor, other.anchor) {
            (Some(a), Some(b)) => Some(a.extend(b.min_date())),
            (a, b) => a.or(b),
        };
        self.rejected.merge(other.rejected);
    }
}

/// Read one headerless price-paid CSV stream.
pub fn read_price_paid<R: Read>(reader: R) -> CleanTransactions {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut out = CleanTransactions::default();
    for result in rdr.records() {
        match result {
            Ok(record) => out.push_raw(&RawTransaction::from_record(&record)),
            Err(e) => {
                debug!("skipping malformed price-paid row: {}", e);
                out.rejected.malformed += 1;
            }
        }
    }
    out
}

/// Price-paid files in `dir` whose name starts with `prefix` and ends `.csv`.
pub fn price_paid_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, IngestError> {
    let entries = std::fs::read_dir(dir).map_err(|source| IngestError::Io {
        path: dir.to_owned(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| IngestError::Io {
            path: dir.to_owned(),
            source,
        })?;
        let path = entry.path();
        let name = path.file_name().and_then(|s| s.to_str()).unwrap_or_default();
        if name.starts_with(prefix) && path.extension().and_then(|s| s.to_str()) == Some("csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load and clean every price-paid file in `dir`.
pub fn load_price_paid(dir: &Path, prefix: &str) -> Result<CleanTransactions, IngestError> {
    let files = price_paid_files(dir, prefix)?;
    if files.is_empty() {
        return Err(IngestError::NoFiles {
            dir: dir.to_owned(),
            prefix: prefix.to_owned(),
        });
    }
    info!("Found {} price files", files.len());

    let mut all = CleanTransactions::default();
    for path in files {
        let file = File::open(&path).map_err(|source| IngestError::Io {
            path: path.clone(),
            source,
        })?;
        let cleaned = read_price_paid(file);
        info!(
            "Loaded {}: {} rows kept, {} rejected",
            path.display(),
            cleaned.records.len(),
            cleaned.rejected.total()
        );
        all.merge(cleaned);
    }

    if all.records.is_empty() {
        return Err(IngestError::NoValidRows);
    }
    if let Some(anchor) = all.anchor {
        debug!("Corpus anchor fixed at {}", anchor.min_date());
    }
    Ok(all)
}

/// A raw energy-certificate row. Every column is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(rename = "POSTCODE", default)]
    pub postcode: Option<String>,
    #[serde(rename = "TOTAL_FLOOR_AREA", default)]
    pub floor_area: Option<String>,
    #[serde(rename = "NUMBER_HABITABLE_ROOMS", default)]
    pub rooms: Option<String>,
    #[serde(rename = "PROPERTY_TYPE", default)]
    pub property_type: Option<String>,
    #[serde(rename = "CURRENT_ENERGY_RATING", default)]
    pub energy_rating: Option<String>,
    #[serde(rename = "BUILT_FORM", default)]
    pub built_form: Option<String>,
    #[serde(rename = "CONSTRUCTION_AGE_BAND", default)]
    pub age_band: Option<String>,
    #[serde(rename = "TENURE", default)]
    pub tenure: Option<String>,
}

pub fn read_certificates<R: Read>(reader: R) -> Vec<CertificateRecord> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);

    let mut records = Vec::new();
    let mut failed = 0;
    for result in rdr.deserialize::<CertificateRecord>() {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!("skipping certificate row: {}", e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        warn!("{} certificate rows could not be parsed", failed);
    }
    records
}

/// Certificates are optional: a missing or unreadable file yields `None`.
pub fn load_certificates(path: &Path) -> Option<Vec<CertificateRecord>> {
    match File::open(path) {
        Ok(file) => {
            let records = read_certificates(file);
            if records.is_empty() {
                warn!("Certificates file {} is empty, no certificate features", path.display());
                None
            } else {
                info!("Loaded {} certificate rows", records.len());
                Some(records)
            }
        }
        Err(e) => {
            warn!("Certificates file {} unavailable ({}), no certificate features", path.display(), e);
            None
        }
    }
}
