use crate::crawler::CrawlOutcome;
use crate::dedup::DedupGroup;
use crate::models::FailureRecord;
use crate::stats::{GroupStats, Metric, StatsReport};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct SiteLine {
    pub site: String,
    pub raw: usize,
    pub pages: u32,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurveySummary {
    pub station: String,
    pub sites: Vec<SiteLine>,
    pub normalized: usize,
    pub kept_after_filter: usize,
    pub filtered_out: usize,
    pub deduplicated: usize,
    /// Groups that merged more than one listing
    pub merged_groups: usize,
    /// Listings inside those groups
    pub merged_listings: usize,
    pub reports: Vec<StatsReport>,
    pub failures: Vec<FailureRecord>,
    pub output_path: Option<PathBuf>,
}

impl SurveySummary {
    pub fn site_lines(outcome: &CrawlOutcome) -> Vec<SiteLine> {
        outcome
            .sites
            .iter()
            .map(|s| SiteLine {
                site: s.site.clone(),
                raw: s.records.len(),
                pages: s.pages,
                failed: s.failure().is_some(),
            })
            .collect()
    }

    /// (groups with duplicates, listings in them)
    pub fn merge_counts(groups: &[DedupGroup]) -> (usize, usize) {
        groups
            .iter()
            .filter(|g| g.duplicate_count > 1)
            .fold((0, 0), |(n, listings), g| (n + 1, listings + g.duplicate_count))
    }

    pub fn raw_total(&self) -> usize {
        self.sites.iter().map(|s| s.raw).sum()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "{}", "=".repeat(80))?;
        writeln!(out, "Rent survey around {}", self.station)?;
        writeln!(out, "{}", "=".repeat(80))?;

        for site in &self.sites {
            let failures = self.failures.iter().filter(|f| f.site == site.site).count();
            writeln!(
                out,
                "{:<8} raw: {:>4}  pages: {:>2}  failures: {}{}",
                site.site,
                site.raw,
                site.pages,
                failures,
                if site.failed { "  (stopped early)" } else { "" }
            )?;
        }
        writeln!(out, "{}", "-".repeat(80))?;
        writeln!(out, "Raw records:     {}", self.raw_total())?;
        writeln!(out, "Normalized:      {}", self.normalized)?;
        writeln!(out, "After filtering: {} ({} filtered out)", self.kept_after_filter, self.filtered_out)?;
        writeln!(out, "After dedup:     {}", self.deduplicated)?;
        if self.merged_groups > 0 {
            writeln!(
                out,
                "Duplicates:      {} listings merged into {} groups",
                self.merged_listings, self.merged_groups
            )?;
        }

        for report in &self.reports {
            writeln!(out)?;
            write_report(out, report)?;
        }

        if !self.failures.is_empty() {
            writeln!(out)?;
            writeln!(out, "Failures ({}):", self.failures.len())?;
            for failure in &self.failures {
                writeln!(out, "  ⚠ {}", failure)?;
            }
        }

        if let Some(path) = &self.output_path {
            writeln!(out, "{}", "=".repeat(80))?;
            writeln!(out, "Output written to: {}", path.display())?;
        }
        writeln!(out, "{}", "=".repeat(80))?;
        Ok(())
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

fn write_groups(out: &mut String, title: &str, groups: &[GroupStats]) -> std::fmt::Result {
    if groups.is_empty() {
        return Ok(());
    }
    writeln!(out, "  By {} (total rent):", title)?;
    for group in groups {
        writeln!(out, "    {:<14} n={:<4} {}", group.label, group.count, group.total_rent)?;
    }
    Ok(())
}

fn write_report(out: &mut String, report: &StatsReport) -> std::fmt::Result {
    writeln!(out, "{} ({} listings)", report.label, report.listing_count)?;
    writeln!(out, "{}", "-".repeat(80))?;
    for metric in Metric::ALL {
        writeln!(out, "  {:<12} {}", metric.label(), report.metric(metric))?;
    }
    write_groups(out, "age difference", &report.by_age_diff)?;
    write_groups(out, "auto-lock", &report.by_auto_lock)?;
    write_groups(out, "bath/toilet separate", &report.by_bath_toilet)?;
    write_groups(out, "aspect", &report.by_aspect)?;
    write_groups(out, "site", &report.by_site)?;
    Ok(())
}
