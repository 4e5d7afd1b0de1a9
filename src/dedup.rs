// Same unit when name, floor area (0.1 m²), total rent and walk minutes all match

use crate::models::{Listing, SurveyQuery};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    name: String,
    area_tenths: i64,
    total_rent: u64,
    walk_minutes: Option<u32>,
}

impl DedupKey {
    pub fn of(listing: &Listing) -> Self {
        Self {
            name: listing.name.trim().to_string(),
            area_tenths: (listing.area * 10.0).round() as i64,
            total_rent: listing.total_rent(),
            walk_minutes: listing.walk_minutes,
        }
    }
}

/// One physical unit and how many listings described it
#[derive(Debug, Clone, PartialEq)]
pub struct DedupGroup {
    pub listing: Listing,
    pub duplicate_count: usize,
    /// Sites the unit was seen on, in requested-site order
    pub sources: Vec<String>,
}

/// Groups listings by `DedupKey`. The representative is the member from the
/// site requested first; among equals the earliest one wins. Groups keep the
/// order in which their first member appeared.
pub fn deduplicate(listings: Vec<Listing>, query: &SurveyQuery) -> Vec<DedupGroup> {
    let mut groups: Vec<DedupGroup> = Vec::new();
    let mut index: HashMap<DedupKey, usize> = HashMap::new();

    for listing in listings {
        let key = DedupKey::of(&listing);
        match index.get(&key) {
            Some(&position) => {
                let group = &mut groups[position];
                group.duplicate_count += 1;
                if !group.sources.contains(&listing.site) {
                    group.sources.push(listing.site.clone());
                }
                if query.site_rank(&listing.site) < query.site_rank(&group.listing.site) {
                    group.listing = listing;
                }
            }
            None => {
                index.insert(key, groups.len());
                groups.push(DedupGroup {
                    sources: vec![listing.site.clone()],
                    listing,
                    duplicate_count: 1,
                });
            }
        }
    }

    for group in &mut groups {
        group.sources.sort_by_key(|site| query.site_rank(site));
    }

    let merged = groups.iter().filter(|g| g.duplicate_count > 1).count();
    tracing::debug!("Deduplicated into {} groups ({} with duplicates)", groups.len(), merged);

    groups
}

pub fn representatives(groups: &[DedupGroup]) -> Vec<Listing> {
    groups.iter().map(|g| g.listing.clone()).collect()
}
