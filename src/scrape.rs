use log::trace;
use regex::Regex;
use reqwest::Method;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::{error::{Error, Result}, schemas::CollectionListing};

const WORKSHOP_ITEM_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=";

pub struct WorkshopPageClient {
    client: reqwest::Client,
}

impl WorkshopPageClient {
    pub fn new() -> WorkshopPageClient {
        WorkshopPageClient {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch a collection page and pull out both the item IDs and the owning app ID
    pub async fn fetch_collection(&self, collection_url: impl AsRef<str>) -> Result<CollectionListing> {
        let collection_url = collection_url.as_ref().trim();
        if collection_url.is_empty() {
            return Err(Error::BlankCollectionUrl());
        }
        let html = self.get_page(collection_url).await?;
        Ok(CollectionListing {
            app_id: parse_collection_app_id(&html),
            items: parse_collection_item_ids(&html),
        })
    }

    pub async fn fetch_item_app_id(&self, item_url: impl AsRef<str>) -> Result<Option<String>> {
        let html = self.get_page(item_url.as_ref().trim()).await?;
        Ok(parse_item_app_id(&html))
    }

    async fn get_page(&self, page_url: &str) -> Result<String> {
        let url = validate_page_url(page_url)?;
        let req = self.client.request(Method::GET, url).build()?;
        trace!("Request to Steam Community:");
        trace!("{}", req.url());
        let resp = self.client.execute(req).await?.error_for_status()?;
        let text = resp.text().await?;
        trace!("Response from Steam Community was {} bytes", text.len());
        Ok(text)
    }
}

fn validate_page_url(page_url: &str) -> Result<Url> {
    let url = Url::parse(page_url)?;
    if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() {
        Ok(url)
    } else {
        Err(Error::InvalidUrl(page_url.to_owned()))
    }
}

pub fn item_page_url(workshop_item_id: impl AsRef<str>) -> String {
    format!("{}{}", WORKSHOP_ITEM_URL, workshop_item_id.as_ref())
}

/// Item IDs from every `div.workshopItem` on a collection page, in page order
pub fn parse_collection_item_ids(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(item_selector) = Selector::parse("div.workshopItem") else {
        return vec![];
    };
    document
        .select(&item_selector)
        .filter_map(|item| first_link(&item))
        .filter_map(|href| id_after_last_marker(&href))
        .collect()
}

pub fn parse_collection_app_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let author_selector = Selector::parse("span.workshopItemAuthorName").ok()?;
    let author = document.select(&author_selector).next()?;
    capture_digits(&first_link(&author)?, r"appid=(\d+)")
}

pub fn parse_item_app_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let breadcrumbs_selector = Selector::parse("div.breadcrumbs").ok()?;
    let breadcrumbs = document.select(&breadcrumbs_selector).next()?;
    capture_digits(&first_link(&breadcrumbs)?, r"/app/(\d+)")
}

/// Workshop item ID from a bare ID or any link carrying `id=`
pub fn workshop_id_from_link(link: impl AsRef<str>) -> Option<String> {
    let link = link.as_ref().trim();
    if is_workshop_id(link) {
        return Some(link.to_owned());
    }
    // prefer a real query parameter so `appid=` can't shadow `id=`
    if let Ok(url) = Url::parse(link) {
        if let Some((_, id)) = url.query_pairs().find(|(k, _)| k == "id") {
            let id = id.trim();
            return is_workshop_id(id).then(|| id.to_owned());
        }
    }
    id_after_last_marker(link)
}

/// Lines of a link list that point at a workshop item page
pub fn workshop_links_in_text(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.contains(WORKSHOP_ITEM_URL))
        .map(|line| line.trim().to_owned())
        .collect()
}

fn first_link(element: &ElementRef<'_>) -> Option<String> {
    let link_selector = Selector::parse("a[href]").ok()?;
    element
        .select(&link_selector)
        .filter_map(|link| link.value().attr("href"))
        .map(str::to_owned)
        .next()
}

fn id_after_last_marker(link: &str) -> Option<String> {
    let (_, tail) = link.rsplit_once("id=")?;
    let id = tail.split('&').next()?.trim();
    is_workshop_id(id).then(|| id.to_owned())
}

fn is_workshop_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn capture_digits(haystack: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}
