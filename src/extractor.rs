use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::config::ExtractorSettings;

const MIN_NAME_CHARS: usize = 2;
const MAX_NAME_CHARS: usize = 60;

static SOUNDTRACK_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:[-*+][ \t]+)?(?:#{1,6}[^\n]*?|(?:\*\*|__)[^*_\n]*?)?\b(?:soundtrack|playlist)s?\b",
    )
    .expect("soundtrack marker regex")
});

// Headings may mention lodging anywhere; bold lines only count when the
// lodging phrase closes the bold span, so `**Hotel de Ville**` stays a venue.
static STAY_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:[-*+][ \t]+)?(?:#{1,6}[^\n]*?\b(?:where to (?:stay|sleep)|places to stay|accommodations?|lodging|hotels|stays?)\b|#{1,6}[^\n]*?\bhotel[ \t:]*$|\*\*[^*\n]{0,32}?\b(?:where to (?:stay|sleep)|places to stay|accommodations?|lodging|hotels|stays?)[ \t]*:?\*\*[ \t]*:?[ \t]*$)",
    )
    .expect("stay marker regex")
});

static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]\n]+)\]\(([^)\s]+)\)").expect("markdown link regex"));

static BOLD_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*([^*\n]+?)\*\*").expect("bold text regex"));

static TEMPERATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\d\s*°|\d+\s*(?:degrees|deg)\b").expect("temperature regex")
});

static DAY_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^day\s*\d+").expect("day heading regex"));

const MAP_QUERY_KEYS: &[&str] = &["q", "query", "destination"];

const NON_VENUE_LABELS: &[&str] = &[
    "here",
    "link",
    "website",
    "official website",
    "official site",
    "tickets",
    "book now",
    "book here",
    "reserve",
    "reservations",
    "menu",
    "map",
    "google maps",
    "directions",
    "more info",
    "read more",
    "listen",
    "watch",
    "reviews",
];

const NON_VENUE_DOMAINS: &[&str] = &[
    "spotify.com",
    "music.apple.com",
    "youtube.com",
    "youtu.be",
    "soundcloud.com",
    "tripadvisor.",
    "yelp.",
    "booking.com",
    "expedia.",
    "hotels.com",
    "airbnb.",
    "agoda.",
    "kayak.",
];

const NON_VENUE_PREFIXES: &[&str] = &[
    "tip",
    "tips",
    "pro tip",
    "note",
    "price",
    "prices",
    "cost",
    "budget",
    "total",
    "morning",
    "afternoon",
    "evening",
    "night",
    "late night",
    "breakfast",
    "brunch",
    "lunch",
    "dinner",
    "day",
    "getting",
    "take",
    "walk",
    "head",
    "ride",
    "transfer",
    "travel",
    "hours",
    "open",
    "closed",
    "tickets",
    "entry",
    "admission",
    "duration",
    "best time",
    "important",
    "warning",
    "option",
    "alternative",
    "address",
    "check-in",
    "check in",
    "check-out",
    "check out",
    "why",
    "what",
    "how",
    "$",
    "€",
    "£",
    "¥",
];

const SECTION_HEADINGS: &[&str] = &[
    "day",
    "morning",
    "afternoon",
    "evening",
    "night",
    "itinerary",
    "overview",
    "summary",
    "highlights",
    "notes",
    "tips",
    "travel tips",
    "local tips",
    "budget",
    "accommodation",
    "accommodations",
    "where to stay",
    "transportation",
    "getting around",
    "food",
    "dining",
    "breakfast",
    "brunch",
    "lunch",
    "dinner",
    "weather",
    "packing list",
    "day trip",
    "optional",
    "free time",
    "must see",
    "must-see",
    "soundtrack",
    "playlist",
];

/// Venue names harvested from one itinerary, split by section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPlaces {
    pub itinerary: Vec<String>,
    pub accommodation: Vec<String>,
}

impl ExtractedPlaces {
    /// Caps the itinerary names so that up to `accommodation_slots` lodging
    /// names always make it into the result.
    pub fn merge(&self, max_results: usize, accommodation_slots: usize) -> Vec<String> {
        let reserved = self.accommodation.len().min(accommodation_slots);
        let itinerary_budget = max_results.saturating_sub(reserved);

        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(itinerary_budget + reserved);
        for name in &self.itinerary {
            if merged.len() >= itinerary_budget {
                break;
            }
            if seen.insert(name.to_lowercase()) {
                merged.push(name.clone());
            }
        }

        let mut appended = 0;
        for name in &self.accommodation {
            if appended >= reserved {
                break;
            }
            if seen.insert(name.to_lowercase()) {
                merged.push(name.clone());
                appended += 1;
            }
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.itinerary.is_empty() && self.accommodation.is_empty()
    }
}

pub fn extract_candidates(text: &str, city: &str) -> ExtractedPlaces {
    let relevant = match SOUNDTRACK_MARKER.find(text) {
        Some(marker) => &text[..marker.start()],
        None => text,
    };

    let (itinerary_region, stay_region) = match stay_marker_start(relevant) {
        Some(start) => (&relevant[..start], &relevant[start..]),
        None => (relevant, ""),
    };

    let itinerary = harvest_region(itinerary_region, city);
    let accommodation = harvest_region(stay_region, city);
    trace!(
        itinerary = itinerary.len(),
        accommodation = accommodation.len(),
        "extracted candidate venues"
    );
    ExtractedPlaces {
        itinerary,
        accommodation,
    }
}

pub fn extract_place_names(
    text: &str,
    city: &str,
    max_results: usize,
    settings: ExtractorSettings,
) -> Vec<String> {
    extract_candidates(text, city).merge(max_results, settings.accommodation_slots)
}

/// First lodging marker that is not a day heading ("## Day 3: hotel check-in").
fn stay_marker_start(text: &str) -> Option<usize> {
    STAY_MARKER
        .find_iter(text)
        .find(|marker| {
            let heading = marker
                .as_str()
                .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, '#' | '-' | '*' | '+'));
            !DAY_HEADING.is_match(heading)
        })
        .map(|marker| marker.start())
}

fn harvest_region(region: &str, city: &str) -> Vec<String> {
    if region.trim().is_empty() {
        return Vec::new();
    }

    let mut map_names = Vec::new();
    let mut label_names = Vec::new();
    for captures in MARKDOWN_LINK.captures_iter(region) {
        let label = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let target = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        if is_map_link(target) {
            match map_query_name(target) {
                Some(name) => map_names.push(name),
                None => label_names.push(clean_name(label)),
            }
            continue;
        }
        if is_non_venue_link(label, target) {
            continue;
        }
        label_names.push(clean_name(label));
    }

    let bold_names = BOLD_TEXT
        .captures_iter(region)
        .filter_map(|captures| captures.get(1))
        .map(|m| m.as_str())
        .filter(|text| !text.contains(['[', ']', '(', ')']) && !text.contains("http"))
        .map(clean_name)
        .filter(|name| !has_non_venue_prefix(name));

    let mut seen = HashSet::new();
    map_names
        .into_iter()
        .chain(label_names)
        .chain(bold_names)
        .filter(|name| is_plausible_venue(name, city))
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

fn is_map_link(target: &str) -> bool {
    target.to_ascii_lowercase().contains("map")
}

fn map_query_name(target: &str) -> Option<String> {
    if let Some((_, query)) = target.split_once('?') {
        let query = query.split('#').next().unwrap_or_default();
        let value = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| MAP_QUERY_KEYS.contains(&key.as_ref()))
            .map(|(_, value)| value.into_owned());
        if let Some(name) = value.as_deref().and_then(first_segment) {
            return Some(name);
        }
    }

    let (_, rest) = target.split_once("/place/")?;
    let raw = rest.split(['/', '?', '#']).next()?;
    let decoded: String = url::form_urlencoded::parse(format!("p={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())?;
    first_segment(&decoded)
}

fn first_segment(value: &str) -> Option<String> {
    let head = value.split(',').next()?.trim();
    if head.is_empty() {
        None
    } else {
        Some(head.to_string())
    }
}

fn is_non_venue_link(label: &str, target: &str) -> bool {
    let label = label.trim().to_lowercase();
    if NON_VENUE_LABELS.contains(&label.as_str()) {
        return true;
    }
    let target = target.to_ascii_lowercase();
    NON_VENUE_DOMAINS.iter().any(|domain| target.contains(domain))
}

fn has_non_venue_prefix(name: &str) -> bool {
    let lower = name.to_lowercase();
    NON_VENUE_PREFIXES
        .iter()
        .any(|prefix| starts_with_word(&lower, prefix))
}

fn starts_with_word(text: &str, prefix: &str) -> bool {
    match text.strip_prefix(prefix) {
        Some(rest) => {
            let symbol_prefix = prefix.chars().all(|c| !c.is_alphanumeric());
            symbol_prefix || rest.chars().next().map_or(true, |c| !c.is_alphanumeric())
        }
        None => false,
    }
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '*' | '_' | '`'))
        .trim_end_matches(|c: char| matches!(c, ':' | '.' | ',' | ';' | '!'))
        .trim()
        .to_string()
}

fn is_plausible_venue(name: &str, city: &str) -> bool {
    let chars = name.chars().count();
    if chars <= MIN_NAME_CHARS || chars >= MAX_NAME_CHARS {
        return false;
    }
    let lower = name.to_lowercase();
    if lower == city.trim().to_lowercase() {
        return false;
    }
    if SECTION_HEADINGS.contains(&lower.as_str()) || DAY_HEADING.is_match(name) {
        return false;
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    if name.contains(" - ") || name.contains(" – ") || name.contains(" — ") {
        return false;
    }
    !TEMPERATURE.is_match(name)
}
