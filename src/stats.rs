use crate::models::{Amenity, Aspect, Listing, SurveyQuery};
use serde::Serialize;
use std::fmt;

/// count/mean/median/min/max of one metric, or an explicit no-data marker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetricSummary {
    NoData,
    Values {
        count: usize,
        mean: f64,
        median: f64,
        min: f64,
        max: f64,
    },
}

impl MetricSummary {
    pub fn from_values(mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        if values.is_empty() {
            return MetricSummary::NoData;
        }

        values.sort_by(|a, b| a.total_cmp(b));
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;

        MetricSummary::Values {
            count,
            mean,
            median: median(&values).unwrap_or(mean),
            min: values[0],
            max: values[count - 1],
        }
    }

    pub fn count(&self) -> usize {
        match self {
            MetricSummary::NoData => 0,
            MetricSummary::Values { count, .. } => *count,
        }
    }
}

impl fmt::Display for MetricSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSummary::NoData => f.write_str("no data"),
            MetricSummary::Values { count, mean, median, min, max } => write!(
                f,
                "count={} mean={:.1} median={:.1} min={:.1} max={:.1}",
                count, mean, median, min, max
            ),
        }
    }
}

/// Median of an ascending slice: middle value, or the mean of the two middle values
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rent,
    TotalRent,
    RentPerArea,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Rent, Metric::TotalRent, Metric::RentPerArea];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Rent => "Rent",
            Metric::TotalRent => "Total rent",
            Metric::RentPerArea => "Rent per m²",
        }
    }

    fn value(&self, listing: &Listing) -> Option<f64> {
        match self {
            Metric::Rent => Some(listing.rent as f64),
            Metric::TotalRent => Some(listing.total_rent() as f64),
            Metric::RentPerArea => listing.rent_per_area(),
        }
    }

    pub fn summarize(&self, listings: &[&Listing]) -> MetricSummary {
        MetricSummary::from_values(listings.iter().filter_map(|l| self.value(l)).collect())
    }
}

/// Listings sharing one grouping value, summarised on total rent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub label: String,
    pub count: usize,
    pub total_rent: MetricSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub label: String,
    pub listing_count: usize,
    pub metrics: Vec<(Metric, MetricSummary)>,
    /// Empty when the query has no subject-built date or age-diff
    pub by_age_diff: Vec<GroupStats>,
    pub by_auto_lock: Vec<GroupStats>,
    pub by_bath_toilet: Vec<GroupStats>,
    pub by_aspect: Vec<GroupStats>,
    pub by_site: Vec<GroupStats>,
}

impl StatsReport {
    pub fn metric(&self, metric: Metric) -> &MetricSummary {
        self.metrics
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, summary)| summary)
            .unwrap_or(&MetricSummary::NoData)
    }
}

fn group(label: impl Into<String>, members: Vec<&Listing>) -> GroupStats {
    GroupStats {
        label: label.into(),
        count: members.len(),
        total_rent: Metric::TotalRent.summarize(&members),
    }
}

fn group_by_amenity(listings: &[Listing], flag: impl Fn(&Listing) -> Amenity) -> Vec<GroupStats> {
    [Amenity::Yes, Amenity::No, Amenity::Unknown]
        .into_iter()
        .map(|value| group(value.as_str(), listings.iter().filter(|l| flag(*l) == value).collect()))
        .collect()
}

fn group_by_age_diff(listings: &[Listing], query: &SurveyQuery) -> Vec<GroupStats> {
    let (Some(years), Some(_)) = (query.age_diff_years, query.subject_built) else {
        return Vec::new();
    };
    let limit = i64::from(years) * 12;

    let mut within = Vec::new();
    let mut outside = Vec::new();
    let mut unknown = Vec::new();
    for listing in listings {
        match listing.age_diff_months {
            Some(diff) if i64::from(diff).abs() <= limit => within.push(listing),
            Some(_) => outside.push(listing),
            None => unknown.push(listing),
        }
    }

    vec![
        group(format!("within ±{}y", years), within),
        group(format!("outside ±{}y", years), outside),
        group("unknown", unknown),
    ]
}

fn group_by_aspect(listings: &[Listing]) -> Vec<GroupStats> {
    const ORDER: [Aspect; 8] = [
        Aspect::North,
        Aspect::NorthEast,
        Aspect::East,
        Aspect::SouthEast,
        Aspect::South,
        Aspect::SouthWest,
        Aspect::West,
        Aspect::NorthWest,
    ];

    let mut groups: Vec<GroupStats> = ORDER
        .iter()
        .map(|aspect| (aspect, listings.iter().filter(|l| l.aspect == Some(*aspect)).collect::<Vec<_>>()))
        .filter(|(_, members)| !members.is_empty())
        .map(|(aspect, members)| group(aspect.as_str(), members))
        .collect();
    groups.push(group("unknown", listings.iter().filter(|l| l.aspect.is_none()).collect()));
    groups
}

fn group_by_site(listings: &[Listing], query: &SurveyQuery) -> Vec<GroupStats> {
    query
        .sites
        .iter()
        .map(|site| group(site.as_str(), listings.iter().filter(|l| &l.site == site).collect()))
        .collect()
}

/// One full statistics pass
pub fn build_report(label: &str, listings: &[Listing], query: &SurveyQuery) -> StatsReport {
    let all: Vec<&Listing> = listings.iter().collect();

    StatsReport {
        label: label.to_string(),
        listing_count: listings.len(),
        metrics: Metric::ALL.iter().map(|m| (*m, m.summarize(&all))).collect(),
        by_age_diff: group_by_age_diff(listings, query),
        by_auto_lock: group_by_amenity(listings, |l| l.auto_lock),
        by_bath_toilet: group_by_amenity(listings, |l| l.bath_toilet_separate),
        by_aspect: group_by_aspect(listings),
        by_site: group_by_site(listings, query),
    }
}

/// The main report, plus one excluding buildings under a year old when requested
pub fn aggregate(listings: &[Listing], query: &SurveyQuery) -> Vec<StatsReport> {
    let mut reports = vec![build_report("All listings", listings, query)];

    if query.brand_new_separate_stats {
        let established: Vec<Listing> = listings.iter().filter(|l| !l.is_brand_new()).cloned().collect();
        reports.push(build_report("Excluding buildings under 1 year", &established, query));
    }

    reports
}
