// One-off fixes to already persisted data, without running a full scrape.

use crate::{
    cache::Client,
    scrape::{Endpoints, details::normalize_address, listing::parse_neighborhoods},
    store::Store,
};
use anyhow::{Result, bail};
use tracing::{debug, info, warn};

/// Normalize all stored addresses. Returns the number of changed records.
#[tracing::instrument(skip_all)]
pub fn clean_addresses(store: &Store) -> Result<usize> {
    let mut records = store.load()?;
    let mut cleaned = 0;

    for r in records.iter_mut() {
        let Some(addr) = r.address.as_deref() else {
            continue;
        };
        let normalized = normalize_address(addr);
        if normalized.as_deref() != Some(addr) {
            debug!(from = addr, to = normalized.as_deref(), "Cleaned address");
            r.address = normalized;
            cleaned += 1;
        }
    }

    let summary = store.save(records)?;
    info!(
        cleaned,
        with_addresses = summary.with_addresses,
        total = summary.total_restaurants,
        "Address cleanup complete"
    );
    Ok(cleaned)
}

/// Re-read the neighborhoods from the listings page and update stored records by restaurant
/// name, leaving every other field alone. The data file is backed up first. Returns the number
/// of changed records.
#[tracing::instrument(skip_all)]
pub async fn refresh_neighborhoods(
    client: &Client,
    endpoints: &Endpoints,
    store: &Store,
) -> Result<usize> {
    let mut records = store.load()?;
    let html = client.get_as_string(&endpoints.listing_url).await?;
    let neighborhoods = parse_neighborhoods(&html);
    if neighborhoods.is_empty() {
        bail!("no neighborhoods found on listings page, not updating");
    }

    let mut updated = 0;
    for r in records.iter_mut() {
        match neighborhoods.get(&r.restaurant_name) {
            Some(n) if *n != r.neighborhood => {
                debug!(restaurant = %r.restaurant_name, from = %r.neighborhood, to = %n, "Updating neighborhood");
                r.neighborhood = n.clone();
                updated += 1;
            }
            Some(_) => {}
            None if r.neighborhood.contains('<') || r.neighborhood.contains('>') => {
                warn!(restaurant = %r.restaurant_name, "Broken neighborhood but no replacement found");
            }
            None => {}
        }
    }

    if let Some(backup) = store.backup()? {
        info!(path = %backup.display(), "Backup created");
    }
    let summary = store.save(records)?;
    info!(
        updated,
        neighborhoods = summary.neighborhoods.len(),
        "Neighborhood update complete"
    );
    Ok(updated)
}
