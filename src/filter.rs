// A value the listing does not carry never excludes it

use crate::models::{to_half_width, Listing, Madori, SurveyQuery};

/// Why a listing was left out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Area,
    WalkMinutes,
    Age,
    Madori,
    BuildingType,
    AutoLock,
    BathToilet,
    Aspect,
}

pub fn check(listing: &Listing, query: &SurveyQuery) -> Result<(), Rejection> {
    if let Some(target) = query.area {
        if (listing.area - target).abs() > query.area_tolerance {
            return Err(Rejection::Area);
        }
    }

    if let (Some(max), Some(minutes)) = (query.max_walk_minutes, listing.walk_minutes) {
        if minutes > max {
            return Err(Rejection::WalkMinutes);
        }
    }

    if let (Some(years), Some(age)) = (query.age_max_years, listing.age_months) {
        if u64::from(age) > u64::from(years) * 12 {
            return Err(Rejection::Age);
        }
    }

    if let (Some(wanted), Some(madori)) = (query.madori, listing.madori.as_deref()) {
        if madori.parse::<Madori>().ok() != Some(wanted) {
            return Err(Rejection::Madori);
        }
    }

    if let (Some(wanted), Some(building_type)) = (query.building_type.as_deref(), listing.building_type.as_deref()) {
        let wanted = to_half_width(wanted).to_lowercase();
        if !to_half_width(building_type).to_lowercase().contains(&wanted) {
            return Err(Rejection::BuildingType);
        }
    }

    if !query.auto_lock.accepts(listing.auto_lock) {
        return Err(Rejection::AutoLock);
    }

    if !query.bath_toilet.accepts(listing.bath_toilet_separate) {
        return Err(Rejection::BathToilet);
    }

    if let (Some(wanted), Some(aspect)) = (query.aspect, listing.aspect) {
        if wanted != aspect {
            return Err(Rejection::Aspect);
        }
    }

    Ok(())
}

/// Keeps the listings that satisfy the query; returns them with the number dropped
pub fn apply(listings: Vec<Listing>, query: &SurveyQuery) -> (Vec<Listing>, usize) {
    let before = listings.len();
    let kept: Vec<Listing> = listings
        .into_iter()
        .filter(|listing| match check(listing, query) {
            Ok(()) => true,
            Err(reason) => {
                tracing::trace!("Filtered out '{}' ({}): {:?}", listing.name, listing.site, reason);
                false
            }
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
