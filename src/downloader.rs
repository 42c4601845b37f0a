//! Drives selection and extraction across all archives of a record.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::io::{RangeFetcher, RangeTransport};
use crate::progress::ProgressSink;
use crate::sink::SafeSink;
use crate::zip::{
    ArchiveHandle, CentralDirectoryLocator, EntryExtractor, ExtractionResult, SelectionPlan,
};
use crate::{Error, Result};

/// One downloadable archive as listed by a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub name: String,
    pub url: String,
    /// Size reported by the record; probed with a HEAD request when absent.
    pub size: Option<u64>,
}

impl ArchiveSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            size,
        }
    }
}

/// What happened to one archive.
#[derive(Debug)]
pub struct ArchiveReport {
    pub archive: String,
    /// Per-entry results in selection order, or the error that prevented
    /// the archive's index from being read.
    pub results: Result<Vec<ExtractionResult>>,
}

impl ArchiveReport {
    /// Number of entries now present and verified on disk.
    pub fn succeeded(&self) -> usize {
        match &self.results {
            Ok(results) => results.iter().filter(|r| r.is_ok()).count(),
            Err(_) => 0,
        }
    }

    /// Number of failed entries, counting an unreadable archive as one.
    pub fn failed(&self) -> usize {
        match &self.results {
            Ok(results) => results.iter().filter(|r| !r.is_ok()).count(),
            Err(_) => 1,
        }
    }
}

/// Extracts the selected entries of many archives.
pub struct Downloader<T: RangeTransport> {
    fetcher: Arc<RangeFetcher<T>>,
    config: Config,
    sink: SafeSink,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl<T: RangeTransport> Downloader<T> {
    /// Create a downloader writing under `config.dest_root`.
    pub fn new(fetcher: Arc<RangeFetcher<T>>, config: Config) -> Result<Self> {
        let sink = SafeSink::new(&config.dest_root)?;
        Ok(Self {
            fetcher,
            config,
            sink,
            progress: None,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn fetcher(&self) -> &Arc<RangeFetcher<T>> {
        &self.fetcher
    }

    /// Archive and entry selection derived from the configuration.
    pub fn plan(&self) -> SelectionPlan {
        SelectionPlan::from_patterns(
            &self.config.zip_pattern,
            self.config.inner_pattern.as_deref(),
            self.config.max_archives,
            self.config.max_entries,
        )
    }

    /// Process every matching archive of `sources`.
    ///
    /// Reports come back in the order the archives are listed. A failing
    /// archive never stops the others.
    pub async fn run(&self, sources: &[ArchiveSource]) -> Vec<ArchiveReport> {
        let plan = self.plan();
        let selected = plan
            .archives
            .filter(sources, |s: &&ArchiveSource| s.name.as_str());
        if selected.is_empty() {
            info!(pattern = %self.config.zip_pattern, "no archives match");
            return Vec::new();
        }

        let concurrency = self.config.concurrency();
        let limiter = Arc::new(Semaphore::new(concurrency));
        stream::iter(selected)
            .map(|source| self.process(source, &plan, limiter.clone()))
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn process(
        &self,
        source: &ArchiveSource,
        plan: &SelectionPlan,
        limiter: Arc<Semaphore>,
    ) -> ArchiveReport {
        info!(archive = %source.name, "processing archive");
        let results = self.extract_archive(source, plan, limiter).await;

        match &results {
            Ok(results) => info!(
                archive = %source.name,
                selected = results.len(),
                failed = results.iter().filter(|r| !r.is_ok()).count(),
                "archive done"
            ),
            Err(e) => warn!(archive = %source.name, error = %e, "could not read archive index"),
        }

        ArchiveReport {
            archive: source.name.clone(),
            results,
        }
    }

    async fn extract_archive(
        &self,
        source: &ArchiveSource,
        plan: &SelectionPlan,
        limiter: Arc<Semaphore>,
    ) -> Result<Vec<ExtractionResult>> {
        let (handle, directory) = {
            let _permit = limiter.acquire().await.map_err(|_| Error::Cancelled)?;
            let handle = match source.size {
                Some(len) => ArchiveHandle::new(&source.name, &source.url, len),
                None => ArchiveHandle::probe(&self.fetcher, &source.name, &source.url).await?,
            };
            let directory = CentralDirectoryLocator::new(self.fetcher.clone())
                .locate(&handle)
                .await?;
            (handle, directory)
        };

        let selected = plan.entries.select(&directory.entries);
        if selected.is_empty() {
            info!(
                archive = %source.name,
                pattern = plan.entries.pattern().map(|p| p.as_str()).unwrap_or("*"),
                "no matching entries"
            );
            return Ok(Vec::new());
        }

        let mut extractor = EntryExtractor::new(self.fetcher.clone(), handle, self.sink.clone())
            .with_overwrite(self.config.overwrite)
            .with_segment_size(self.config.segment_size)
            .with_limiter(limiter);
        if let Some(progress) = &self.progress {
            extractor = extractor.with_progress(progress.clone());
        }

        Ok(extractor
            .extract_all(&selected, self.config.concurrency())
            .await)
    }
}
