use crate::adapter::AdapterRegistry;
use crate::error::ConfigError;
use crate::models::{Aspect, Madori, OutputFormat, Preference, SurveyQuery};
use chrono::NaiveDate;

/// Survey parameters as typed by the user, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyParams {
    pub station: String,
    pub minutes: Option<i64>,
    pub area: Option<f64>,
    pub area_tolerance: f64,
    pub madori: Option<String>,
    pub subject_built: Option<String>,
    pub age_max: Option<i64>,
    pub age_diff: Option<i64>,
    pub building_type: Option<String>,
    pub auto_lock: String,
    pub bath_toilet: String,
    pub aspect: Option<String>,
    pub max_listings: i64,
    pub sites: Vec<String>,
    pub output_format: String,
    pub brand_new_separate_stats: bool,
}

impl Default for SurveyParams {
    fn default() -> Self {
        Self {
            station: String::new(),
            minutes: None,
            area: None,
            area_tolerance: 10.0,
            madori: None,
            subject_built: None,
            age_max: None,
            age_diff: None,
            building_type: None,
            auto_lock: "any".to_string(),
            bath_toilet: "any".to_string(),
            aspect: None,
            max_listings: 50,
            sites: vec!["homes".to_string(), "suumo".to_string()],
            output_format: "csv".to_string(),
            brand_new_separate_stats: false,
        }
    }
}

fn non_negative(name: &str, value: Option<i64>) -> Result<Option<u32>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(ConfigError::invalid(name, format!("must not be negative, got {}", v))),
        Some(v) => u32::try_from(v)
            .map(Some)
            .map_err(|_| ConfigError::invalid(name, format!("{} is too large", v))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parses `YYYY-MM` (or `YYYY/MM`) into the first day of that month
pub fn parse_year_month(text: &str) -> Result<NaiveDate, ConfigError> {
    let invalid = || ConfigError::invalid("subject-built", format!("expected YYYY-MM, got '{}'", text));

    let (year, month) = text.trim().split_once(['-', '/']).ok_or_else(invalid)?;
    if year.len() != 4 {
        return Err(invalid());
    }
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}

fn parse_sites(sites: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut parsed: Vec<String> = Vec::new();
    for site in sites {
        let site = site.trim().to_lowercase();
        if site.is_empty() {
            continue;
        }
        if parsed.contains(&site) {
            return Err(ConfigError::invalid("sites", format!("'{}' listed more than once", site)));
        }
        parsed.push(site);
    }
    Ok(parsed)
}

impl SurveyParams {
    /// Validates every parameter and checks the sites against the registry.
    /// Nothing here touches the network.
    pub fn into_query(self, registry: &AdapterRegistry, surveyed_on: NaiveDate) -> Result<SurveyQuery, ConfigError> {
        let station = self.station.trim().to_string();
        if station.is_empty() {
            return Err(ConfigError::invalid("station", "must not be empty"));
        }

        let area = match self.area {
            Some(a) if !a.is_finite() || a <= 0.0 => {
                return Err(ConfigError::invalid("area", format!("must be positive, got {}", a)))
            }
            other => other,
        };
        if !self.area_tolerance.is_finite() || self.area_tolerance < 0.0 {
            return Err(ConfigError::invalid(
                "area-tolerance",
                format!("must not be negative, got {}", self.area_tolerance),
            ));
        }

        if self.max_listings <= 0 {
            return Err(ConfigError::invalid(
                "max-listings",
                format!("must be positive, got {}", self.max_listings),
            ));
        }

        let madori = non_blank(self.madori).map(|m| m.parse::<Madori>()).transpose()?;
        let subject_built = non_blank(self.subject_built)
            .map(|s| parse_year_month(&s))
            .transpose()?;

        let auto_lock: Preference = self
            .auto_lock
            .parse()
            .map_err(|_| ConfigError::invalid("auto-lock", format!("expected yes|no|any, got '{}'", self.auto_lock)))?;
        let bath_toilet: Preference = self.bath_toilet.parse().map_err(|_| {
            ConfigError::invalid("bath-toilet", format!("expected yes|no|any, got '{}'", self.bath_toilet))
        })?;

        let aspect = match non_blank(self.aspect) {
            None => None,
            Some(a) if a.eq_ignore_ascii_case("any") => None,
            Some(a) => Some(Aspect::parse(&a).ok_or_else(|| ConfigError::invalid("aspect", format!("unknown direction '{}'", a)))?),
        };

        let output_format: OutputFormat = self.output_format.parse()?;

        let sites = parse_sites(&self.sites)?;
        registry.resolve(&sites)?;

        Ok(SurveyQuery {
            station,
            max_walk_minutes: non_negative("minutes", self.minutes)?,
            area,
            area_tolerance: self.area_tolerance,
            madori,
            subject_built,
            age_max_years: non_negative("age-max", self.age_max)?,
            age_diff_years: non_negative("age-diff", self.age_diff)?,
            building_type: non_blank(self.building_type),
            auto_lock,
            bath_toilet,
            aspect,
            max_listings: self.max_listings as usize,
            sites,
            output_format,
            brand_new_separate_stats: self.brand_new_separate_stats,
            surveyed_on,
        })
    }
}
