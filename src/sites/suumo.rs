use crate::adapter::{looks_like_block_page, PageRequest, PageToken, ParseError, ParsedPage, SiteAdapter};
use crate::models::{fields, Madori, RawRecord, SurveyQuery};
use crate::sites::html;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};

const ORIGIN: &str = "https://suumo.jp";
const SEARCH_URL: &str = "https://suumo.jp/jj/chintai/ichiran/FR301FC001/";

/// SUUMO rental search. Results are grouped per building ("cassette"),
/// with one table row per vacant unit.
pub struct SuumoAdapter;

impl SuumoAdapter {
    pub fn new() -> Self {
        Self
    }

    /// SUUMO floor-plan filter codes (01 = 1R ... in enum order)
    fn madori_code(madori: Madori) -> String {
        let index = Madori::ALL.iter().position(|m| *m == madori).unwrap_or(0);
        format!("{:02}", index + 1)
    }

    fn building_type_code(building_type: &str) -> Option<&'static str> {
        let lower = building_type.to_lowercase();
        if lower.contains("マンション") || lower.contains("mansion") {
            Some("1")
        } else if lower.contains("アパート") || lower.contains("apartment") {
            Some("2")
        } else if lower.contains("一戸建") || lower.contains("house") {
            Some("3")
        } else {
            None
        }
    }

    fn is_empty_result(document: &Html, body: &str) -> bool {
        html::has_match(document, ".error_pop-txt")
            || body.contains("該当する物件がありません")
            || body.contains("条件に該当する物件はありませんでした")
    }

    /// One record per unit row of a building cassette
    fn parse_cassette(cassette: &ElementRef, collected_at: DateTime<Utc>) -> Vec<RawRecord> {
        let title = html::select_text(cassette, ".cassetteitem_content-title");
        let access = html::select_text(cassette, ".cassetteitem_detail-col2 .cassetteitem_detail-text");
        let built = html::select_text(cassette, ".cassetteitem_detail-col3 div");
        let building_type = html::select_text(cassette, ".cassetteitem_content-label");

        let row_selector = match scraper::Selector::parse("table.cassetteitem_other tbody tr") {
            Ok(sel) => sel,
            Err(_) => return Vec::new(),
        };

        cassette
            .select(&row_selector)
            .map(|row| {
                let mut record = RawRecord::new("suumo", collected_at);
                if let Some(title) = &title {
                    record.insert(fields::NAME, title.as_str());
                }
                if let Some(access) = &access {
                    record.insert(fields::ACCESS, access.as_str());
                }
                if let Some(built) = &built {
                    record.insert(fields::BUILT, built.as_str());
                }
                if let Some(building_type) = &building_type {
                    record.insert(fields::BUILDING_TYPE, building_type.as_str());
                }

                let cells = [
                    (fields::RENT, ".cassetteitem_price--rent"),
                    (fields::FEE, ".cassetteitem_price--administration"),
                    (fields::DEPOSIT, ".cassetteitem_price--deposit"),
                    (fields::KEY_MONEY, ".cassetteitem_price--gratuity"),
                    (fields::MADORI, ".cassetteitem_madori"),
                    (fields::AREA, ".cassetteitem_menseki"),
                ];
                for (field, css) in cells {
                    if let Some(text) = html::select_text(&row, css) {
                        record.insert(field, text);
                    }
                }

                let href = html::select_attr(&row, "a.js-cassette_link_href", "href")
                    .or_else(|| html::select_attr(&row, "a[href*='/chintai/']", "href"));
                if let Some(href) = href {
                    record.insert(fields::URL, html::absolute_url(ORIGIN, &href));
                }

                record
            })
            .collect()
    }

    fn next_page(document: &Html) -> Result<Option<PageToken>, ParseError> {
        let next_link = html::select_elements(document, ".pagination-parts a")
            .into_iter()
            .find(|a| html::element_text(a).contains("次へ"));

        match next_link {
            None => Ok(None),
            Some(link) => link
                .value()
                .attr("href")
                .and_then(html::page_number_from_href)
                .map(|page| Some(PageToken(page)))
                .ok_or_else(|| ParseError::LayoutMismatch("next-page link without a page number".to_string())),
        }
    }
}

impl Default for SuumoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteAdapter for SuumoAdapter {
    fn name(&self) -> &str {
        "suumo"
    }

    fn build_query(&self, query: &SurveyQuery, page: Option<PageToken>) -> PageRequest {
        let mut request = PageRequest::new(SEARCH_URL)
            .param("ar", "030")
            .param("bs", "040")
            .param("fw", &query.station);

        if let Some(minutes) = query.max_walk_minutes {
            request = request.param("et", minutes);
        }
        if let Some(madori) = query.madori {
            request = request.param("md", Self::madori_code(madori));
        }
        if let Some(area) = query.area {
            request = request
                .param("mb", (area - query.area_tolerance).max(0.0).floor())
                .param("mt", (area + query.area_tolerance).ceil());
        }
        if let Some(age) = query.age_max_years {
            request = request.param("cn", age);
        }
        if let Some(code) = query.building_type.as_deref().and_then(Self::building_type_code) {
            request = request.param("ts", code);
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

        if !html::has_match(&document, "#js-bukkenList") {
            if Self::is_empty_result(&document, body) {
                tracing::debug!("suumo: no matching properties");
                return Ok(ParsedPage::empty());
            }
            if let Some(reason) = looks_like_block_page(body) {
                return Err(ParseError::BlockedPage(reason.to_string()));
            }
            tracing::debug!(
                "suumo: result container missing, HTML preview: {}",
                body.chars().take(500).collect::<String>()
            );
            return Err(ParseError::LayoutMismatch("suumo result list (#js-bukkenList) not found".to_string()));
        }

        let cassettes = html::select_elements(&document, "div.cassetteitem");
        tracing::debug!("suumo: {} building cassettes on page", cassettes.len());

        if cassettes.is_empty() {
            if Self::is_empty_result(&document, body) {
                return Ok(ParsedPage::empty());
            }
            return Err(ParseError::LayoutMismatch("suumo result list has no div.cassetteitem".to_string()));
        }

        let records: Vec<RawRecord> = cassettes
            .iter()
            .flat_map(|cassette| Self::parse_cassette(cassette, collected_at))
            .collect();

        if records.is_empty() {
            return Err(ParseError::LayoutMismatch("suumo cassettes contain no unit rows".to_string()));
        }

        Ok(ParsedPage {
            records,
            next_page: Self::next_page(&document)?,
        })
    }
}
