//! Загрузка объявлений из JSON-выгрузки (массив объектов [`Listing`]).

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::store::{Listing, ListingStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: usize,
    pub skipped: usize,
}

pub fn parse_listings(raw: &str) -> Result<Vec<Listing>> {
    serde_json::from_str(raw).context("Listings file must be a JSON array of listings")
}

/// Пропускает записи без ссылки на пост или с пустым районом
pub async fn import_listings(store: &dyn ListingStore, listings: &[Listing]) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for listing in listings {
        if listing.message_id().is_none() || listing.district.trim().is_empty() {
            warn!("Skipping listing with bad link or district: {}", listing.link);
            report.skipped += 1;
            continue;
        }
        store
            .insert_listing(listing)
            .await
            .with_context(|| format!("Failed to insert listing {}", listing.link))?;
        report.inserted += 1;
    }
    info!("Imported {} listings, skipped {}", report.inserted, report.skipped);
    Ok(report)
}

pub async fn import_file(store: &dyn ListingStore, path: &Path) -> Result<ImportReport> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let listings = parse_listings(&raw)?;
    import_listings(store, &listings).await
}
