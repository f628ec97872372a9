use anyhow::{Context, Result};
use http_cache_reqwest::{Cache, CacheMode, HttpCache, HttpCacheOptions, MokaManager};
use reqwest::IntoUrl;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

pub static BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

type MCache = moka::future::Cache<String, Arc<Vec<u8>>>;

/// On-disk form of the response cache: every live entry, in no particular order
#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<(String, Vec<u8>)>,
}

impl Snapshot {
    fn read(path: &Path) -> Result<Self> {
        let mut f = BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        );
        let entries = bincode::serde::decode_from_std_read(&mut f, bincode::config::standard())?;
        Ok(Self { entries })
    }

    fn write(&self, path: &Path) -> Result<()> {
        let mut f = BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        );
        bincode::serde::encode_into_std_write(&self.entries, &mut f, bincode::config::standard())?;
        f.flush()?;
        Ok(())
    }

    async fn capture(cache: &MCache) -> Self {
        // pending inserts and evictions are not visible to iter() until they have run
        cache.run_pending_tasks().await;
        let entries: Vec<_> = cache
            .iter()
            .map(|(k, v)| ((*k).clone(), (*v).clone()))
            .collect();
        trace!(entries = entries.len(), "Captured cache");
        Self { entries }
    }

    async fn restore(self, cache: &MCache) {
        let n = self.entries.len();
        for (k, v) in self.entries {
            cache.insert(k, Arc::new(v)).await;
        }
        trace!(entries = n, "Restored cache");
    }
}

#[derive(Clone, Debug, Default)]
pub struct Opts {
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub cache_path: Option<PathBuf>,
}

impl Opts {
    fn cache_mode(&self) -> CacheMode {
        if self.cache_ttl.is_zero() {
            return CacheMode::NoStore;
        }
        // Pages are re-fetched by both the detail and image stages, and ForceCache lets a
        // re-run work from the cache even when the site is unreachable.
        CacheMode::ForceCache
    }

    fn build_cache(&self) -> MCache {
        moka::future::Cache::builder()
            .name("BurgerWeekCache")
            .max_capacity(self.cache_capacity as u64)
            .time_to_live(self.cache_ttl.max(Duration::from_secs(1)))
            .build()
    }

    fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        let mut builder = reqwest::ClientBuilder::new().user_agent(BROWSER_USER_AGENT);
        if !self.request_timeout.is_zero() {
            builder = builder.timeout(self.request_timeout);
        }
        builder.build()
    }
}

/// HTTP client for the event site, with an optional response cache that can be persisted
/// between runs.
#[derive(Clone)]
pub struct Client {
    client: ClientWithMiddleware,
    cache: MCache,
    cache_path: Option<PathBuf>,
}

impl Client {
    pub async fn build(opts: Opts) -> reqwest::Result<Self> {
        let cache = opts.build_cache();
        if let Some(p) = opts.cache_path.as_deref() {
            match Snapshot::read(p) {
                Ok(snapshot) => snapshot.restore(&cache).await,
                // a missing or broken file only means a cold cache
                Err(err) => debug!(err = %err, "No usable cache file, starting empty"),
            }
        }
        Ok(Self {
            client: ClientBuilder::new(opts.build_client()?)
                .with(Cache(HttpCache {
                    mode: opts.cache_mode(),
                    manager: MokaManager::new(cache.clone()),
                    options: HttpCacheOptions::default(),
                }))
                .build(),
            cache,
            cache_path: opts.cache_path,
        })
    }

    /// Write the response cache to the configured file, if any
    pub async fn save(self) -> Result<()> {
        let Some(p) = self.cache_path else {
            debug!("No cache file configured, not saving");
            return Ok(());
        };
        Snapshot::capture(&self.cache).await.write(&p)
    }

    pub async fn get_as_string<U: IntoUrl>(&self, url: U) -> Result<String> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
            .map_err(anyhow::Error::from)
    }

    /// Stream the body at `url` into `path`. The body is written to a temporary sibling file
    /// first, so an interrupted download never leaves a truncated file under the final name.
    pub async fn download<U: IntoUrl>(&self, url: U, path: &Path) -> Result<u64> {
        // bodies are streamed to disk and never kept in the response cache
        let mut res = self
            .client
            .get(url)
            .with_extension(CacheMode::NoStore)
            .send()
            .await?
            .error_for_status()?;

        let part = path.with_extension("part");
        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("failed to create {}", part.display()))?;
        let mut written = 0u64;
        while let Some(chunk) = res.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, path).await?;
        trace!(path = %path.display(), bytes = written, "Download complete");
        Ok(written)
    }
}

impl Deref for Client {
    type Target = ClientWithMiddleware;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
