use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Whitespace-collapsed text of an element
pub fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first element matching `css` under `element`
pub fn select_text(element: &ElementRef, css: &str) -> Option<String> {
    Selector::parse(css)
        .ok()
        .and_then(|sel| element.select(&sel).next())
        .map(|el| element_text(&el))
        .filter(|text| !text.is_empty())
}

/// Texts of every element matching `css` under `element`
pub fn select_all_text(element: &ElementRef, css: &str) -> Vec<String> {
    match Selector::parse(css) {
        Ok(sel) => element
            .select(&sel)
            .map(|el| element_text(&el))
            .filter(|text| !text.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Attribute of the first element matching `css` under `element`
pub fn select_attr(element: &ElementRef, css: &str, attr: &str) -> Option<String> {
    Selector::parse(css)
        .ok()
        .and_then(|sel| element.select(&sel).find_map(|el| el.value().attr(attr)))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// All elements matching `css` in the document
pub fn select_elements<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => document.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

pub fn has_match(document: &Html, css: &str) -> bool {
    Selector::parse(css)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

/// Page number carried by a pagination link (`?page=3` / `&pn=3`)
pub fn page_number_from_href(href: &str) -> Option<u32> {
    let re = Regex::new(r"[?&](?:page|pn)=(\d+)").ok()?;
    re.captures(href)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// Converts a relative href into an absolute URL on `origin`
pub fn absolute_url(origin: &str, href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", origin, href)
    } else {
        format!("{}/{}", origin, href)
    }
}
