use crate::adapter::{looks_like_block_page, PageRequest, PageToken, ParseError, ParsedPage, SiteAdapter};
use crate::models::{fields, Preference, RawRecord, SurveyQuery};
use crate::sites::html;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};

const ORIGIN: &str = "https://www.homes.co.jp";
const SEARCH_URL: &str = "https://www.homes.co.jp/chintai/list/";

/// LIFULL HOME'S rental search. One property card per unit; cards carry
/// equipment tags and the main window direction.
pub struct HomesAdapter;

impl HomesAdapter {
    pub fn new() -> Self {
        Self
    }

    fn is_empty_result(document: &Html, body: &str) -> bool {
        html::has_match(document, ".mod-noResult") || body.contains("条件に一致する物件はありませんでした")
    }

    fn parse_card(card: &ElementRef, collected_at: DateTime<Utc>) -> RawRecord {
        let mut record = RawRecord::new("homes", collected_at);

        let text_fields = [
            (fields::NAME, "h2.property-title a"),
            (fields::RENT, "span.price strong"),
            (fields::FEE, "span.price span.property-data"),
            (fields::DEPOSIT, "span.shikikin"),
            (fields::KEY_MONEY, "span.reikin"),
            (fields::AREA, "span.menseki"),
            (fields::MADORI, "span.madori"),
            (fields::BUILT, "span.chikunen"),
            (fields::ACCESS, "div.property-point p"),
            (fields::BUILDING_TYPE, "span.bukken-type"),
            (fields::ASPECT, "span.direction"),
        ];
        for (field, css) in text_fields {
            if let Some(text) = html::select_text(card, css) {
                record.insert(field, text);
            }
        }

        if let Some(href) = html::select_attr(card, "h2.property-title a", "href") {
            record.insert(fields::URL, html::absolute_url(ORIGIN, &href));
        }

        // The tag list is only rendered when the unit has equipment data;
        // without it both flags stay unknown.
        if html::select_text(card, "ul.property-tags").is_some() {
            let tags = html::select_all_text(card, "ul.property-tags li");
            let has_tag = |needle: &str| tags.iter().any(|t| t.contains(needle));
            record.insert(fields::AUTO_LOCK, if has_tag("オートロック") { "yes" } else { "no" });
            record.insert(
                fields::BATH_TOILET,
                if has_tag("バス・トイレ別") || has_tag("バストイレ別") { "yes" } else { "no" },
            );
        }

        record
    }

    fn next_page(document: &Html) -> Result<Option<PageToken>, ParseError> {
        let href = html::select_attr(&document.root_element(), "li.nextPage a", "href")
            .or_else(|| html::select_attr(&document.root_element(), "a[rel='next']", "href"));

        match href {
            None => Ok(None),
            Some(href) => html::page_number_from_href(&href)
                .map(|page| Some(PageToken(page)))
                .ok_or_else(|| ParseError::LayoutMismatch(format!("next-page link '{}' has no page number", href))),
        }
    }
}

impl Default for HomesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteAdapter for HomesAdapter {
    fn name(&self) -> &str {
        "homes"
    }

    fn build_query(&self, query: &SurveyQuery, page: Option<PageToken>) -> PageRequest {
        let mut request = PageRequest::new(SEARCH_URL).param("keyword", &query.station);

        if let Some(building_type) = &query.building_type {
            request = request.param("bukken_type", building_type);
        }
        if let Some(madori) = query.madori {
            request = request.param("madori", madori);
        }
        if let Some(minutes) = query.max_walk_minutes {
            request = request.param("minutes", minutes);
        }
        if let Some(area) = query.area {
            request = request
                .param("area_min", (area - query.area_tolerance).max(0.0))
                .param("area_max", area + query.area_tolerance);
        }
        if let Some(age) = query.age_max_years {
            request = request.param("age", age);
        }
        if query.auto_lock == Preference::Yes {
            request = request.param("equipment", "autolock");
        }
        if query.bath_toilet == Preference::Yes {
            request = request.param("bath_toilet", "separate");
        }
        if let Some(PageToken(page)) = page {
            if page > 1 {
                request = request.param("page", page);
            }
        }

        request
    }

    fn parse_page(&self, body: &str, collected_at: DateTime<Utc>) -> Result<ParsedPage, ParseError> {
        let document = Html::parse_document(body);

        if !html::has_match(&document, "div.mod-property-list") {
            if Self::is_empty_result(&document, body) {
                tracing::debug!("homes: no matching properties");
                return Ok(ParsedPage::empty());
            }
            if let Some(reason) = looks_like_block_page(body) {
                return Err(ParseError::BlockedPage(reason.to_string()));
            }
            tracing::debug!(
                "homes: result container missing, HTML preview: {}",
                body.chars().take(500).collect::<String>()
            );
            return Err(ParseError::LayoutMismatch("homes property list (div.mod-property-list) not found".to_string()));
        }

        let cards = html::select_elements(&document, "div.mod-property-list div.property");
        tracing::debug!("homes: {} property cards on page", cards.len());

        if cards.is_empty() {
            if Self::is_empty_result(&document, body) {
                return Ok(ParsedPage::empty());
            }
            return Err(ParseError::LayoutMismatch("homes property list has no div.property cards".to_string()));
        }

        let records = cards
            .iter()
            .map(|card| Self::parse_card(card, collected_at))
            .collect();

        Ok(ParsedPage {
            records,
            next_page: Self::next_page(&document)?,
        })
    }
}
