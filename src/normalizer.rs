use crate::models::{
    fields, months_between, to_half_width, Amenity, Aspect, FailureRecord, Listing, RawRecord, SurveyQuery,
};
use chrono::NaiveDate;
use regex::Regex;

/// Completion date and age derived from a "built" cell
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BuiltInfo {
    pub built_at: Option<NaiveDate>,
    pub age_months: Option<u32>,
}

/// Anything above this is a mis-parsed cell, not a rent
pub const MAX_AMOUNT_YEN: f64 = 1_000_000_000.0;

fn to_yen(amount: f64) -> Option<u64> {
    let amount = amount.round();
    if amount.is_finite() && (0.0..=MAX_AMOUNT_YEN).contains(&amount) {
        Some(amount as u64)
    } else {
        None
    }
}

/// Parses amounts like "8.5万円", "85,000円", "85000" into yen
pub fn parse_yen(text: &str) -> Option<u64> {
    let cleaned = to_half_width(text).replace([',', ' '], "");
    if cleaned.is_empty() {
        return None;
    }

    let yen_regex = Regex::new(r"([0-9]+(?:\.[0-9]+)?)(万円|万|円)").ok()?;
    if let Some(caps) = yen_regex.captures(&cleaned) {
        let number: f64 = caps.get(1)?.as_str().parse().ok()?;
        let multiplier = match caps.get(2)?.as_str() {
            "万円" | "万" => 10_000.0,
            _ => 1.0,
        };
        return to_yen(number * multiplier);
    }

    let number_regex = Regex::new(r"^([0-9]+(?:\.[0-9]+)?)$").ok()?;
    number_regex
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .and_then(to_yen)
}

/// Common fee: "-", "なし" or a missing cell all mean zero
pub fn parse_fee(text: Option<&str>) -> Result<u64, String> {
    match text.map(str::trim) {
        None | Some("") | Some("-") | Some("－") | Some("なし") | Some("無") => Ok(0),
        Some(text) => parse_yen(text).ok_or_else(|| format!("unparseable common fee '{}'", text)),
    }
}

/// Deposit / key money. Amounts given in months ("1ヶ月") are converted with the rent.
pub fn parse_months_or_yen(text: &str, rent: u64) -> Option<u64> {
    let cleaned = to_half_width(text.trim());
    if matches!(cleaned.as_str(), "-" | "－" | "なし" | "無") {
        return Some(0);
    }

    let months_regex = Regex::new(r"^([0-9]+(?:\.[0-9]+)?)\s*(?:ヶ月|ヵ月|か月|カ月)").ok()?;
    if let Some(months) = months_regex
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return to_yen(months * rent as f64);
    }

    parse_yen(&cleaned)
}

/// "25.5m2", "24.8㎡" -> square metres
pub fn parse_area(text: &str) -> Option<f64> {
    let cleaned = to_half_width(text);
    let area_regex = Regex::new(r"([0-9]+(?:\.[0-9]+)?)").ok()?;
    area_regex
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|area| *area > 0.0)
}

/// Station name and walk minutes from access text such as
/// "ＪＲ山手線/恵比寿駅 歩5分" or "恵比寿駅 徒歩6分"
pub fn parse_access(text: &str) -> (Option<String>, Option<u32>) {
    let cleaned = to_half_width(text);

    let minutes = Regex::new(r"(?:徒歩|歩)\s*([0-9]+)\s*分")
        .ok()
        .and_then(|re| re.captures(&cleaned))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    let station = Regex::new(r"([^\s/]+?)駅")
        .ok()
        .and_then(|re| re.captures(&cleaned))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    (station, minutes)
}

/// Completion year-month or age from texts like "2019年3月", "2019-03", "築12年", "新築"
pub fn parse_built(text: &str, surveyed_on: NaiveDate) -> BuiltInfo {
    let cleaned = to_half_width(text.trim());

    if cleaned.contains("新築") || cleaned.contains("築1年未満") {
        return BuiltInfo {
            built_at: None,
            age_months: Some(0),
        };
    }

    if let Some(built_at) = Regex::new(r"([0-9]{4})\s*(?:年|/|-)\s*([0-9]{1,2})")
        .ok()
        .and_then(|re| re.captures(&cleaned))
        .and_then(|caps| {
            let year = caps.get(1)?.as_str().parse::<i32>().ok()?;
            let month = caps.get(2)?.as_str().parse::<u32>().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)
        })
    {
        return BuiltInfo {
            built_at: Some(built_at),
            age_months: Some(months_between(built_at, surveyed_on).max(0) as u32),
        };
    }

    let age_years = Regex::new(r"築\s*([0-9]+)\s*年")
        .ok()
        .and_then(|re| re.captures(&cleaned))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());

    BuiltInfo {
        built_at: None,
        age_months: age_years.map(|years| years * 12),
    }
}

/// yes/no/unknown; anything unrecognised stays unknown
pub fn parse_amenity(text: Option<&str>) -> Amenity {
    match text.map(|t| t.trim().to_lowercase()).as_deref() {
        Some("yes") | Some("true") | Some("1") | Some("あり") | Some("有") | Some("○") => Amenity::Yes,
        Some("no") | Some("false") | Some("0") | Some("なし") | Some("無") | Some("-") => Amenity::No,
        _ => Amenity::Unknown,
    }
}

/// Converts one raw record into a Listing
pub fn normalize(raw: &RawRecord, query: &SurveyQuery) -> Result<Listing, FailureRecord> {
    let fail = |reason: String| FailureRecord::parse(&raw.site, reason);

    let name = raw
        .text(fields::NAME)
        .ok_or_else(|| fail(format!("record without property name ({})", describe(raw))))?;

    let rent_text = raw
        .text(fields::RENT)
        .ok_or_else(|| fail(format!("'{}' has no rent", name)))?;
    let rent = parse_yen(&rent_text).ok_or_else(|| fail(format!("'{}' has unparseable rent '{}'", name, rent_text)))?;

    let area_text = raw
        .text(fields::AREA)
        .ok_or_else(|| fail(format!("'{}' has no floor area", name)))?;
    let area = parse_area(&area_text)
        .ok_or_else(|| fail(format!("'{}' has unparseable floor area '{}'", name, area_text)))?;

    let common_fee = parse_fee(raw.text(fields::FEE).as_deref()).map_err(|e| fail(format!("'{}': {}", name, e)))?;

    let built = raw
        .text(fields::BUILT)
        .map(|text| parse_built(&text, query.surveyed_on))
        .unwrap_or_default();
    let age_diff_months = match (built.age_months, query.subject_age_months()) {
        (Some(age), Some(subject_age)) => Some(subject_age.saturating_sub(i32::try_from(age).unwrap_or(i32::MAX))),
        _ => None,
    };

    let (station, walk_minutes) = raw
        .text(fields::ACCESS)
        .map(|text| parse_access(&text))
        .unwrap_or((None, None));

    Ok(Listing {
        site: raw.site.clone(),
        name,
        url: raw.text(fields::URL),
        rent,
        common_fee,
        deposit: raw
            .text(fields::DEPOSIT)
            .and_then(|text| parse_months_or_yen(&text, rent)),
        key_money: raw
            .text(fields::KEY_MONEY)
            .and_then(|text| parse_months_or_yen(&text, rent)),
        area,
        madori: raw.text(fields::MADORI).map(|m| to_half_width(&m).to_uppercase()),
        built_at: built.built_at,
        age_months: built.age_months,
        age_diff_months,
        station,
        walk_minutes,
        building_type: raw.text(fields::BUILDING_TYPE),
        auto_lock: parse_amenity(raw.text(fields::AUTO_LOCK).as_deref()),
        bath_toilet_separate: parse_amenity(raw.text(fields::BATH_TOILET).as_deref()),
        aspect: raw.text(fields::ASPECT).and_then(|text| Aspect::parse(&text)),
        collected_at: raw.collected_at,
    })
}

/// Normalizes every record, collecting failures instead of stopping
pub fn normalize_all(records: &[RawRecord], query: &SurveyQuery) -> (Vec<Listing>, Vec<FailureRecord>) {
    let mut listings = Vec::with_capacity(records.len());
    let mut failures = Vec::new();

    for record in records {
        match normalize(record, query) {
            Ok(listing) => listings.push(listing),
            Err(failure) => {
                tracing::debug!("Dropping record: {}", failure);
                failures.push(failure);
            }
        }
    }

    (listings, failures)
}

fn describe(raw: &RawRecord) -> String {
    raw.text(fields::URL)
        .unwrap_or_else(|| format!("fields: {}", raw.fields.keys().cloned().collect::<Vec<_>>().join(",")))
}
