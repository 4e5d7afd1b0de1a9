use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Floor-plan codes accepted by `--madori`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Madori {
    #[serde(rename = "1R")]
    OneR,
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "1DK")]
    OneDk,
    #[serde(rename = "1LDK")]
    OneLdk,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "2DK")]
    TwoDk,
    #[serde(rename = "2LDK")]
    TwoLdk,
    #[serde(rename = "3K")]
    ThreeK,
    #[serde(rename = "3DK")]
    ThreeDk,
    #[serde(rename = "3LDK")]
    ThreeLdk,
    #[serde(rename = "4K")]
    FourK,
    #[serde(rename = "4DK")]
    FourDk,
    #[serde(rename = "4LDK")]
    FourLdk,
}

impl Madori {
    pub const ALL: [Madori; 13] = [
        Madori::OneR,
        Madori::OneK,
        Madori::OneDk,
        Madori::OneLdk,
        Madori::TwoK,
        Madori::TwoDk,
        Madori::TwoLdk,
        Madori::ThreeK,
        Madori::ThreeDk,
        Madori::ThreeLdk,
        Madori::FourK,
        Madori::FourDk,
        Madori::FourLdk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Madori::OneR => "1R",
            Madori::OneK => "1K",
            Madori::OneDk => "1DK",
            Madori::OneLdk => "1LDK",
            Madori::TwoK => "2K",
            Madori::TwoDk => "2DK",
            Madori::TwoLdk => "2LDK",
            Madori::ThreeK => "3K",
            Madori::ThreeDk => "3DK",
            Madori::ThreeLdk => "3LDK",
            Madori::FourK => "4K",
            Madori::FourDk => "4DK",
            Madori::FourLdk => "4LDK",
        }
    }
}

impl fmt::Display for Madori {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Madori {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = to_half_width(s.trim()).to_uppercase();
        Madori::ALL
            .iter()
            .find(|m| m.as_str() == code)
            .copied()
            .ok_or_else(|| ConfigError::invalid("madori", format!("unknown floor plan '{}'", s)))
    }
}

/// Converts full-width ASCII (as used on Japanese portals) to half-width
pub fn to_half_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// Amenity requirement given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Yes,
    No,
    #[default]
    Any,
}

impl FromStr for Preference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "required" | "true" => Ok(Preference::Yes),
            "no" | "forbidden" | "false" => Ok(Preference::No),
            "any" | "" => Ok(Preference::Any),
            other => Err(ConfigError::invalid(
                "preference",
                format!("expected yes|no|any, got '{}'", other),
            )),
        }
    }
}

impl Preference {
    /// Whether a listing with the given amenity value satisfies this preference.
    /// Unknown values always pass.
    pub fn accepts(&self, value: Amenity) -> bool {
        !matches!(
            (self, value),
            (Preference::Yes, Amenity::No) | (Preference::No, Amenity::Yes)
        )
    }
}

/// Amenity flag as found on a listing. `Unknown` is distinct from `No`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Amenity {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Amenity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Amenity::Yes => "yes",
            Amenity::No => "no",
            Amenity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Amenity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main window direction of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aspect {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::North => "north",
            Aspect::NorthEast => "northeast",
            Aspect::East => "east",
            Aspect::SouthEast => "southeast",
            Aspect::South => "south",
            Aspect::SouthWest => "southwest",
            Aspect::West => "west",
            Aspect::NorthWest => "northwest",
        }
    }

    /// Parses english names, compass abbreviations and kanji ("南向き")
    pub fn parse(text: &str) -> Option<Aspect> {
        let cleaned = text
            .trim()
            .trim_end_matches("向き")
            .trim_end_matches('向')
            .replace(['-', '_', ' '], "")
            .to_lowercase();

        let aspect = match cleaned.as_str() {
            "n" | "north" | "北" => Aspect::North,
            "ne" | "northeast" | "北東" => Aspect::NorthEast,
            "e" | "east" | "東" => Aspect::East,
            "se" | "southeast" | "南東" => Aspect::SouthEast,
            "s" | "south" | "南" => Aspect::South,
            "sw" | "southwest" | "南西" => Aspect::SouthWest,
            "w" | "west" | "西" => Aspect::West,
            "nw" | "northwest" | "北西" => Aspect::NorthWest,
            _ => return None,
        };
        Some(aspect)
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
    Sqlite,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
            OutputFormat::Sqlite => "db",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "sqlite" | "db" => Ok(OutputFormat::Sqlite),
            other => Err(ConfigError::invalid(
                "output-format",
                format!("expected csv|jsonl|sqlite, got '{}'", other),
            )),
        }
    }
}

/// Validated survey parameters. Built once by `query::SurveyParams::into_query`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurveyQuery {
    pub station: String,
    pub max_walk_minutes: Option<u32>,
    pub area: Option<f64>,
    pub area_tolerance: f64,
    pub madori: Option<Madori>,
    pub subject_built: Option<NaiveDate>, // first day of the completion month
    pub age_max_years: Option<u32>,
    pub age_diff_years: Option<u32>,
    pub building_type: Option<String>,
    pub auto_lock: Preference,
    pub bath_toilet: Preference,
    pub aspect: Option<Aspect>, // None means any
    pub max_listings: usize,
    pub sites: Vec<String>,
    pub output_format: OutputFormat,
    pub brand_new_separate_stats: bool,
    pub surveyed_on: NaiveDate,
}

impl SurveyQuery {
    /// Position of a site in the requested order; unknown sites sort last
    pub fn site_rank(&self, site: &str) -> usize {
        self.sites
            .iter()
            .position(|s| s == site)
            .unwrap_or(usize::MAX)
    }

    /// Age of the subject building in whole months at survey time
    pub fn subject_age_months(&self) -> Option<i32> {
        self.subject_built
            .map(|built| months_between(built, self.surveyed_on).max(0))
    }
}

/// Whole months from `from` to `to`, ignoring the day of month
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + (to.month() as i32 - from.month() as i32)
}

/// A scraped value before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn as_text(&self) -> String {
        match self {
            RawValue::Number(n) => n.to_string(),
            RawValue::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

/// Field names adapters use in `RawRecord`
pub mod fields {
    pub const NAME: &str = "name";
    pub const URL: &str = "url";
    pub const RENT: &str = "rent";
    pub const FEE: &str = "fee";
    pub const DEPOSIT: &str = "deposit";
    pub const KEY_MONEY: &str = "key_money";
    pub const AREA: &str = "area";
    pub const MADORI: &str = "madori";
    pub const BUILT: &str = "built";
    pub const ACCESS: &str = "access";
    pub const BUILDING_TYPE: &str = "building_type";
    pub const AUTO_LOCK: &str = "auto_lock";
    pub const BATH_TOILET: &str = "bath_toilet";
    pub const ASPECT: &str = "aspect";
}

/// Site-specific record as scraped from one result page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub site: String,
    pub collected_at: DateTime<Utc>,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new(site: &str, collected_at: DateTime<Utc>) -> Self {
        Self {
            site: site.to_string(),
            collected_at,
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field, skipping blank text
    pub fn with(mut self, name: &str, value: impl Into<RawValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<RawValue>) {
        let value = value.into();
        if let RawValue::Text(text) = &value {
            if text.trim().is_empty() {
                return;
            }
        }
        self.fields.insert(name.to_string(), value);
    }

    /// Trimmed text of a field, `None` when absent or blank
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.as_text().trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Canonical listing produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub site: String,
    pub name: String,
    pub url: Option<String>,
    pub rent: u64,
    pub common_fee: u64,
    pub deposit: Option<u64>,
    pub key_money: Option<u64>,
    pub area: f64, // m²
    pub madori: Option<String>,
    pub built_at: Option<NaiveDate>,
    pub age_months: Option<u32>,
    pub age_diff_months: Option<i32>, // subject age minus listing age: positive when the comparable is newer
    pub station: Option<String>,
    pub walk_minutes: Option<u32>,
    pub building_type: Option<String>,
    pub auto_lock: Amenity,
    pub bath_toilet_separate: Amenity,
    pub aspect: Option<Aspect>,
    pub collected_at: DateTime<Utc>,
}

impl Listing {
    /// Rent plus common fee, always recomputed
    pub fn total_rent(&self) -> u64 {
        self.rent.saturating_add(self.common_fee)
    }

    pub fn rent_per_area(&self) -> Option<f64> {
        if self.area > 0.0 {
            Some(self.total_rent() as f64 / self.area)
        } else {
            None
        }
    }

    /// Buildings younger than a year
    pub fn is_brand_new(&self) -> bool {
        matches!(self.age_months, Some(months) if months < 12)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Parse,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Fetch => f.write_str("fetch"),
            FailureStage::Parse => f.write_str("parse"),
        }
    }
}

/// Non-fatal failure, kept for the run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub site: String,
    pub stage: FailureStage,
    pub reason: String,
}

impl FailureRecord {
    pub fn fetch(site: &str, reason: impl fmt::Display) -> Self {
        Self {
            site: site.to_string(),
            stage: FailureStage::Fetch,
            reason: reason.to_string(),
        }
    }

    pub fn parse(site: &str, reason: impl fmt::Display) -> Self {
        Self {
            site: site.to_string(),
            stage: FailureStage::Parse,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} failure: {}", self.site, self.stage, self.reason)
    }
}
