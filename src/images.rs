use crate::{
    cache::Client,
    models::Record,
    scrape::{Enricher, Page},
    util::{absolutize, sel},
};
use anyhow::Result;
use lazy_static::lazy_static;
use scraper::Selector;
use slugify::slugify;
use std::path::PathBuf;
use tracing::{debug, trace};
use url::Url;

/// Downloaded images are referenced from the records with this prefix, relative to the
/// frontend root
static IMAGE_REF_PREFIX: &str = "./images";
static DEFAULT_EXTENSION: &str = "jpg";
static FALLBACK_NAME: &str = "image";
const SLUG_MAX_LEN: usize = 50;
const EXTENSION_MAX_LEN: usize = 5;

lazy_static! {
    static ref SEL_IMAGE: Selector = sel(".item-image img");
}

/// Absolute URL of the first image in the page's image region, lazy loaded or not
pub fn image_src(page: &Page) -> Option<String> {
    let img = page.doc.select(&SEL_IMAGE).next()?;
    let src = img
        .attr("src")
        .filter(|s| !s.trim().is_empty())
        .or_else(|| img.attr("data-src"))?;
    absolutize(&page.url, src)
}

fn extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            let name = u.path_segments()?.next_back()?.to_string();
            let (_, ext) = name.rsplit_once('.')?;
            (!ext.is_empty()
                && ext.len() <= EXTENSION_MAX_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .then(|| ext.to_ascii_lowercase())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.into())
}

/// File name for a record's image: a lowercase slug of restaurant and burger name joined by
/// underscores, with the extension of the image URL.
pub fn image_filename(restaurant: &str, burger: &str, url: &str) -> String {
    let slug = slugify!(
        &format!("{restaurant}_{burger}"),
        separator = "_",
        max_length = SLUG_MAX_LEN
    );
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { FALLBACK_NAME } else { slug };
    format!("{slug}.{}", extension(url))
}

/// Downloads the main image from a record's detail page
#[derive(Clone)]
pub struct ImageEnricher {
    client: Client,
    dir: PathBuf,
}

impl ImageEnricher {
    pub fn new(client: Client, dir: PathBuf) -> Self {
        Self { client, dir }
    }

    pub fn wants(record: &Record) -> bool {
        record.image.is_none() && record.burger_url.is_some()
    }
}

impl Enricher for ImageEnricher {
    fn name(&self) -> &'static str {
        "images"
    }

    async fn enrich(&self, mut record: Record) -> Result<Record> {
        if !Self::wants(&record) {
            return Ok(record);
        }
        let Some(url) = record.burger_url.clone() else {
            return Ok(record);
        };

        let raw = self.client.get_as_string(&url).await?;
        let src = image_src(&Page::parse(&url, raw));
        let Some(src) = src else {
            debug!(restaurant = %record.restaurant_name, url = %url, "No image found");
            return Ok(record);
        };

        let file = image_filename(&record.restaurant_name, &record.burger_name, &src);
        let path = self.dir.join(&file);
        if tokio::fs::try_exists(&path).await? {
            trace!(path = %path.display(), "Image already downloaded");
        } else {
            let bytes = self.client.download(&src, &path).await?;
            debug!(path = %path.display(), bytes, "Downloaded image");
        }

        record.image = Some(format!("{IMAGE_REF_PREFIX}/{file}"));
        record.image_url = Some(src);
        Ok(record)
    }
}
