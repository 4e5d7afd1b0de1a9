use crate::dedup::DedupGroup;
use crate::models::{Amenity, Aspect, OutputFormat};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One output record per deduplicated listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRow {
    pub name: String,
    pub site: String,
    pub sources: Vec<String>,
    pub duplicate_count: usize,
    pub url: Option<String>,
    pub rent: u64,
    pub common_fee: u64,
    pub total_rent: u64,
    pub deposit: Option<u64>,
    pub key_money: Option<u64>,
    pub area: f64,
    pub madori: Option<String>,
    pub built: Option<String>, // YYYY-MM
    pub age_months: Option<u32>,
    pub age_diff_months: Option<i32>,
    pub station: Option<String>,
    pub walk_minutes: Option<u32>,
    pub building_type: Option<String>,
    pub auto_lock: Amenity,
    pub bath_toilet_separate: Amenity,
    pub aspect: Option<Aspect>,
    pub collected_at: DateTime<Utc>,
}

impl From<&DedupGroup> for ListingRow {
    fn from(group: &DedupGroup) -> Self {
        let l = &group.listing;
        Self {
            name: l.name.clone(),
            site: l.site.clone(),
            sources: group.sources.clone(),
            duplicate_count: group.duplicate_count,
            url: l.url.clone(),
            rent: l.rent,
            common_fee: l.common_fee,
            total_rent: l.total_rent(),
            deposit: l.deposit,
            key_money: l.key_money,
            area: l.area,
            madori: l.madori.clone(),
            built: l.built_at.map(|d| d.format("%Y-%m").to_string()),
            age_months: l.age_months,
            age_diff_months: l.age_diff_months,
            station: l.station.clone(),
            walk_minutes: l.walk_minutes,
            building_type: l.building_type.clone(),
            auto_lock: l.auto_lock,
            bath_toilet_separate: l.bath_toilet_separate,
            aspect: l.aspect,
            collected_at: l.collected_at,
        }
    }
}

pub const CSV_HEADER: [&str; 22] = [
    "name",
    "site",
    "sources",
    "duplicate_count",
    "url",
    "rent",
    "common_fee",
    "total_rent",
    "deposit",
    "key_money",
    "area",
    "madori",
    "built",
    "age_months",
    "age_diff_months",
    "station",
    "walk_minutes",
    "building_type",
    "auto_lock",
    "bath_toilet_separate",
    "aspect",
    "collected_at",
];

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

impl ListingRow {
    fn csv_fields(&self) -> [String; 22] {
        [
            self.name.clone(),
            self.site.clone(),
            self.sources.join(";"),
            self.duplicate_count.to_string(),
            opt(&self.url),
            self.rent.to_string(),
            self.common_fee.to_string(),
            self.total_rent.to_string(),
            opt(&self.deposit),
            opt(&self.key_money),
            self.area.to_string(),
            opt(&self.madori),
            opt(&self.built),
            opt(&self.age_months),
            opt(&self.age_diff_months),
            opt(&self.station),
            opt(&self.walk_minutes),
            opt(&self.building_type),
            self.auto_lock.to_string(),
            self.bath_toilet_separate.to_string(),
            opt(&self.aspect),
            self.collected_at.to_rfc3339(),
        ]
    }
}

/// Header plus one record per row. No rows means an empty file.
pub fn write_csv(path: &Path, rows: &[ListingRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if !rows.is_empty() {
        writer.write_record(CSV_HEADER)?;
        for row in rows {
            writer.write_record(row.csv_fields())?;
        }
    }

    writer.flush()?;
    Ok(())
}

pub fn write_jsonl(path: &Path, rows: &[ListingRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    Ok(())
}

/// `<dir>/rent-survey-YYYYMMDD-HHMMSS.<ext>`
pub fn default_output_path(dir: &Path, format: OutputFormat, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("rent-survey-{}.{}", now.format("%Y%m%d-%H%M%S"), format.extension()))
}

/// Resolves the output path and creates its parent directory
pub fn ensure_output_path(
    requested: Option<&Path>,
    output_dir: &Path,
    format: OutputFormat,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let path = match requested {
        Some(path) => path.to_path_buf(),
        None => default_output_path(output_dir, format, now),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    Ok(path)
}
