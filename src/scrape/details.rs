// Detail pages are not very consistent between venues, so every field is extracted by trying a
// list of independent strategies in order, and taking the first one that gives anything.

use crate::{
    cache::Client,
    models::{Hours, Record, ScheduleEntry},
    scrape::{
        Endpoints, Enricher, Page,
        schedule::{fetch_schedule, occurrence_id},
    },
    util::{bounded_text, element_text, get_text, reduce_whitespace, sel, truncate_chars},
};
use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::{debug, trace};

pub type Strategy = fn(&Page) -> Option<String>;

static PHRASE_INGREDIENTS: &str = "What's on it...";
static DESCRIPTION_END_MARKERS: [&str; 4] =
    ["What they say", "Meat or Vegetarian", "Gluten Free", "\n\n"];
static EVENT_LOCATION: &str = "EVENT LOCATION";
const DESCRIPTION_MAX_CHARS: usize = 500;
const DESCRIPTION_MIN_CHARS: usize = 10;
const HOURS_TEXT_LIMIT: usize = 200;

lazy_static! {
    static ref SEL_EVENT_DESCRIPTION: Selector = sel(".event-description");
    static ref SEL_DESCRIPTION: Selector = sel(".description");
    static ref SEL_P: Selector = sel("p");
    static ref SEL_ANSWER_ADDRESS: Selector =
        sel(".answer-list > div > div:nth-of-type(2) > p:nth-of-type(2)");
    static ref SEL_TEXT_MUTED: Selector = sel("span.text-muted");
    static ref RE_INGREDIENTS: Regex = Regex::new(r"(?i)What's on it\.\.\.\s*([^<]+)").unwrap();
    static ref RE_STREET_NUMBER: Regex = Regex::new(r"^\d+\s+").unwrap();
    static ref RE_PARENTHETICAL: Regex = Regex::new(r"\([^)]+\)").unwrap();
    static ref RE_TRAILING_PARENTHETICAL: Regex = Regex::new(r"\s*\([^)]+\)\s*$").unwrap();
    static ref RE_TRAILING_PUNCT: Regex = Regex::new(r"[.,]+$").unwrap();
    static ref RE_CLOCK_TIME: Regex = Regex::new(r"(?i)\d{1,2}:\d{2}\s*(am|pm)").unwrap();
}

pub static DESCRIPTION_STRATEGIES: [Strategy; 3] = [
    description_from_source,
    description_from_text,
    description_from_markup,
];

pub static ADDRESS_STRATEGIES: [Strategy; 2] =
    [address_from_answer_list, address_near_event_location];

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// The first strategy giving a value wins
pub fn first_match(page: &Page, strategies: &[Strategy]) -> Option<String> {
    strategies.iter().find_map(|f| f(page))
}

/// Ingredients right after "What's on it..." in the raw source, up to the next tag
pub fn description_from_source(page: &Page) -> Option<String> {
    let caps = RE_INGREDIENTS.captures(&page.raw)?;
    non_empty(reduce_whitespace(&caps[1]))
}

/// Same as [`description_from_source`], but on the rendered text, for when the phrase and the
/// ingredients are in different elements.
pub fn description_from_text(page: &Page) -> Option<String> {
    let root = page.doc.root_element();
    if !element_text(&root).contains(PHRASE_INGREDIENTS) {
        return None;
    }
    root.descendants().filter_map(ElementRef::wrap).find_map(|e| {
        let text = element_text(&e);
        let idx = text.find(PHRASE_INGREDIENTS)?;
        let rest = &text[idx + PHRASE_INGREDIENTS.len()..];
        let end = DESCRIPTION_END_MARKERS
            .iter()
            .filter_map(|m| rest.find(m))
            .min()
            .unwrap_or(rest.len());
        let desc = reduce_whitespace(&rest[..end]);
        (desc.chars().count() > DESCRIPTION_MIN_CHARS).then_some(desc)
    })
}

pub fn description_from_markup(page: &Page) -> Option<String> {
    let root = page.doc.root_element();
    [&*SEL_EVENT_DESCRIPTION, &*SEL_DESCRIPTION, &*SEL_P]
        .into_iter()
        .find_map(|s| get_text(&root, s).and_then(non_empty))
}

pub fn extract_description(page: &Page) -> Option<String> {
    let desc = first_match(page, &DESCRIPTION_STRATEGIES)?;
    non_empty(
        truncate_chars(&reduce_whitespace(&desc), DESCRIPTION_MAX_CHARS)
            .trim()
            .into(),
    )
}

/// The second paragraph of the second answer block, minus the muted neighborhood label
pub fn address_from_answer_list(page: &Page) -> Option<String> {
    let p = page.doc.select(&SEL_ANSWER_ADDRESS).next()?;
    let mut text = element_text(&p).trim().to_string();
    if let Some(muted) = get_text(&p, &SEL_TEXT_MUTED).filter(|m| !m.is_empty()) {
        text = text.replacen(&muted, "", 1);
    }
    let text = reduce_whitespace(&text);
    non_empty(RE_TRAILING_PUNCT.replace(&text, "").trim().into())
}

/// A paragraph starting with a street number, close to the "EVENT LOCATION" label
pub fn address_near_event_location(page: &Page) -> Option<String> {
    let label = page.doc.root_element().descendants().find(|n| {
        n.value()
            .as_text()
            .is_some_and(|t| t.contains(EVENT_LOCATION))
    })?;

    // closest scope first, skipping the element holding the label itself
    label
        .ancestors()
        .filter_map(ElementRef::wrap)
        .skip(1)
        .find_map(|scope| {
            scope
                .select(&SEL_P)
                .map(|p| element_text(&p))
                .find(|t| RE_STREET_NUMBER.is_match(t.trim()))
        })
        .and_then(|t| non_empty(reduce_whitespace(&RE_PARENTHETICAL.replace_all(&t, ""))))
}

/// Canonical form of a street address: single spaces, no trailing "(Neighborhood)", no
/// trailing punctuation.
pub fn normalize_address(s: &str) -> Option<String> {
    let s = reduce_whitespace(s);
    let s = RE_TRAILING_PARENTHETICAL.replace(&s, "");
    non_empty(RE_TRAILING_PUNCT.replace(&s, "").trim().into())
}

pub fn extract_address(page: &Page) -> Option<String> {
    first_match(page, &ADDRESS_STRATEGIES).and_then(|a| normalize_address(&a))
}

/// First short element mentioning a clock time, like "Fri: 11:30 AM - 8 PM"
pub fn hours_from_text(page: &Page) -> Option<String> {
    page.doc
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find_map(|e| {
            let text = bounded_text(&e, HOURS_TEXT_LIMIT)?;
            RE_CLOCK_TIME
                .is_match(&text)
                .then(|| text.trim().to_string())
        })
}

/// Fills in description, address and hours from a record's detail page
#[derive(Clone)]
pub struct DetailEnricher {
    client: Client,
    endpoints: Endpoints,
}

impl DetailEnricher {
    pub fn new(client: Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    async fn schedule(&self, url: &str) -> Vec<ScheduleEntry> {
        let Some(id) = occurrence_id(url) else {
            trace!(url, "No occurrence id in url");
            return Vec::new();
        };
        match fetch_schedule(&self.client, &self.endpoints, id, url).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(err = %e, url, "Could not fetch schedule");
                Vec::new()
            }
        }
    }
}

impl Enricher for DetailEnricher {
    fn name(&self) -> &'static str {
        "details"
    }

    async fn enrich(&self, mut record: Record) -> Result<Record> {
        let Some(url) = record.burger_url.clone() else {
            return Ok(record);
        };
        trace!(url = %url, restaurant = %record.restaurant_name, "Fetching details...");
        let raw = self.client.get_as_string(&url).await?;

        // the parsed document can't be held across an await
        let (description, address, text_hours) = {
            let page = Page::parse(&url, raw);
            (
                extract_description(&page),
                extract_address(&page),
                hours_from_text(&page),
            )
        };
        if address.is_none() {
            debug!(restaurant = %record.restaurant_name, "No address found");
        }
        record.description = description;
        record.address = address;

        let schedule = self.schedule(&url).await;
        record.hours = if schedule.is_empty() {
            text_hours.map(Hours::Text)
        } else {
            Some(Hours::Schedule(schedule))
        };

        Ok(record)
    }
}
