//! Reconciling freshly produced records with previously persisted ones.
//!
//! Records are matched on their identity key (restaurant name + burger name). Work done by the
//! slow stages (geocoding, image downloads) is carried over so a new scrape never regresses it.

use crate::models::{Key, Record};
use std::collections::HashMap;

fn index(records: &[Record]) -> HashMap<Key<'_>, &Record> {
    let mut m = HashMap::with_capacity(records.len());
    for r in records {
        // first occurrence wins, same as when persisting
        m.entry(r.key()).or_insert(r);
    }
    m
}

/// Sort by restaurant name, case insensitive, for stable diffs of the persisted file
pub fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.restaurant_name
            .to_lowercase()
            .cmp(&b.restaurant_name.to_lowercase())
            .then_with(|| a.restaurant_name.cmp(&b.restaurant_name))
            .then_with(|| a.burger_name.cmp(&b.burger_name))
    });
}

/// Prior coordinates always override whatever the new record has
pub fn merge_coordinates(mut new: Vec<Record>, prior: &[Record]) -> Vec<Record> {
    let prior = index(prior);
    for r in new.iter_mut() {
        if let Some(p) = prior.get(&r.key()).filter(|p| p.has_coordinates()) {
            r.copy_geocoding_from(p);
        }
    }
    sort_records(&mut new);
    new
}

/// Carry over downloaded images for records that don't have one
pub fn merge_images(mut new: Vec<Record>, prior: &[Record]) -> Vec<Record> {
    let prior = index(prior);
    for r in new.iter_mut().filter(|r| r.image.is_none()) {
        if let Some(p) = prior.get(&r.key()).filter(|p| p.image.is_some()) {
            r.copy_image_from(p);
        }
    }
    sort_records(&mut new);
    new
}

/// Replace records in `base` with their counterpart from `updates`. Updates without a
/// counterpart in `base` are appended.
pub fn apply_updates(mut base: Vec<Record>, updates: &[Record]) -> Vec<Record> {
    // owned keys, as entries are taken out while `base` is modified
    let mut pending: HashMap<(String, String), &Record> = HashMap::with_capacity(updates.len());
    for u in updates {
        pending
            .entry((u.restaurant_name.clone(), u.burger_name.clone()))
            .or_insert(u);
    }
    for r in base.iter_mut() {
        let key = (r.restaurant_name.clone(), r.burger_name.clone());
        if let Some(u) = pending.remove(&key) {
            *r = u.clone();
        }
    }
    let mut rest: Vec<Record> = pending.into_values().cloned().collect();
    base.append(&mut rest);
    sort_records(&mut base);
    base
}
