//! Source archive retrieval with checksum verification.
//!
//! Archives are looked up in the local cache first. On a miss, every
//! configured mirror is tried in order, then the file's own URL if it has
//! one. Downloads stream into a temporary file next to the final path and
//! are renamed into place only once the checksum matches, so the cache
//! never holds a partial or corrupt file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bolt_schema::{Sha256Digest, SourceFile};
use futures::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::config::Mirror;
use crate::error::FetchError;
use crate::paths::filename_from_url;
use crate::reporter::Reporter;
use crate::source::cache::SourceCache;

fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

#[derive(Clone)]
pub struct SourceFetcher {
    client: Client,
    cache: SourceCache,
    mirrors: Vec<Mirror>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for SourceFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFetcher")
            .field("cache", &self.cache)
            .field("mirrors", &self.mirrors)
            .finish_non_exhaustive()
    }
}

impl SourceFetcher {
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] if the HTTP client cannot be built.
    pub fn new(
        cache: SourceCache,
        mirrors: Vec<Mirror>,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        Ok(Self {
            client,
            cache,
            mirrors,
            reporter,
        })
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    /// Make `file` of source package `name` at `version` available locally.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Retrieval`] if neither the cache nor any mirror
    /// produced a file with the expected checksum, or an IO error if the
    /// cache directory cannot be created.
    pub async fn retrieve(
        &self,
        name: &str,
        version: &str,
        file: &SourceFile,
    ) -> Result<PathBuf, FetchError> {
        let filename = if is_url(&file.name) {
            filename_from_url(&file.name)
        } else {
            file.name.as_str()
        };
        let sha256 = file.sha256.as_ref();

        self.reporter.retrieving(name, version, filename);

        if let Some(path) = self.cache.lookup(name, version, filename, sha256)? {
            self.reporter.cached(name, version, filename);
            return Ok(path);
        }

        let target = self.cache.path_for(name, version, filename)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let rel_path = SourceCache::relative_path(name, version, filename)?;
        let mut urls: Vec<String> = self
            .mirrors
            .iter()
            .map(|m| format!("{}/{rel_path}", m.url.trim_end_matches('/')))
            .collect();
        if is_url(&file.name) {
            urls.push(file.name.clone());
        }

        for url in &urls {
            tracing::debug!("Trying {url}");
            match self.download(url, filename, &target, sha256).await {
                Ok(()) => {
                    tracing::info!("Retrieved {filename} from {url}");
                    return Ok(target);
                }
                Err(e) => tracing::warn!("Failed to retrieve {url}: {e}"),
            }
        }

        Err(FetchError::Retrieval {
            name: name.to_string(),
            version: version.to_string(),
            file: filename.to_string(),
        })
    }

    async fn download(
        &self,
        url: &str,
        filename: &str,
        target: &Path,
        expected: Option<&Sha256Digest>,
    ) -> Result<(), FetchError> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        let mut file = tokio::fs::File::from_std(tmp.reopen()?);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        self.reporter.downloading(filename, 0, total);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            self.reporter.downloading(filename, downloaded, total);
        }
        file.flush().await?;
        drop(file);

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = expected {
            if !expected.matches(&actual) {
                return Err(FetchError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        tmp.persist(target).map_err(|e| FetchError::Io(e.error))?;
        Ok(())
    }
}
