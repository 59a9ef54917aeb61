//! Listing page parser
//!
//! Turns the HTML body of a catalog or search results page into the item
//! identifiers it links to. Each result card holds one link of the form
//! `/catalog/{identifier}`.

use scraper::{Html, Selector};

const CARD_SELECTOR: &str = ".cards-results__item";
const LINK_SELECTOR: &str = "a.cards-results__link";
const CATALOG_PATH: &str = "/catalog/";

/// Extracts item identifiers from a listing page
///
/// Identifiers are returned in page order without duplicates. Cards whose
/// link does not point into the catalog are ignored. An empty result is the
/// end-of-catalog signal, not an error.
///
/// # Example
///
/// ```
/// use neb_harvest::crawler::parse_catalog_page;
///
/// let html = r#"<div class="cards-results__item">
///     <a class="cards-results__link" href="/catalog/000200_000018_RU_NLR_BIBL_A_012520083">Open</a>
/// </div>"#;
/// assert_eq!(parse_catalog_page(html), vec!["000200_000018_RU_NLR_BIBL_A_012520083"]);
/// ```
pub fn parse_catalog_page(html: &str) -> Vec<String> {
    let (card_selector, link_selector) =
        match (Selector::parse(CARD_SELECTOR), Selector::parse(LINK_SELECTOR)) {
            (Ok(card), Ok(link)) => (card, link),
            _ => return Vec::new(),
        };

    let document = Html::parse_document(html);
    let mut items: Vec<String> = Vec::new();

    for card in document.select(&card_selector) {
        let href = match card
            .select(&link_selector)
            .next()
            .and_then(|link| link.value().attr("href"))
        {
            Some(href) => href,
            None => continue,
        };

        if let Some(id) = identifier_from_href(href) {
            if !items.iter().any(|existing| existing == id) {
                items.push(id.to_string());
            }
        }
    }

    items
}

/// The path segment following `/catalog/` in a card link
fn identifier_from_href(href: &str) -> Option<&str> {
    let (_, rest) = href.split_once(CATALOG_PATH)?;
    let id = rest.split(['/', '?', '#']).next()?.trim();

    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}
