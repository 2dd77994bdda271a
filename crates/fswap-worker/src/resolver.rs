//! Face mapping resolution.
//!
//! Many mode broadcasts the job's single source face to every detected
//! face; no mapping file is involved. Reference mode fetches the mapping
//! document, validates the bijection and cardinality, materializes every
//! referenced source face locally and writes a normalized mapping file for
//! the engine.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use fswap_media::{Fetcher, ScratchDir};
use fswap_models::{FaceMapping, Job, MappingError, SelectorMode};

use crate::error::{WorkerError, WorkerResult};

/// Locally materialized faces ready for the engine.
#[derive(Debug)]
pub struct ResolvedFaces {
    pub selector_mode: SelectorMode,
    pub source_paths: Vec<PathBuf>,
    pub mapping_path: Option<PathBuf>,
}

/// Entry shape of the normalized mapping file handed to the engine.
#[derive(Debug, Serialize)]
struct EngineMappingEntry<'a> {
    reference_face_id: u32,
    source_face_path: String,
    target_identity_selector: &'a str,
}

pub struct MappingResolver {
    fetcher: Fetcher,
}

impl MappingResolver {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Materialize the job's faces into the scratch directory.
    pub async fn resolve(&self, job: &Job, scratch: &ScratchDir) -> WorkerResult<ResolvedFaces> {
        match job.selector_mode {
            SelectorMode::Many => self.resolve_many(job, scratch).await,
            SelectorMode::Reference => self.resolve_reference(job, scratch).await,
        }
    }

    async fn resolve_many(&self, job: &Job, scratch: &ScratchDir) -> WorkerResult<ResolvedFaces> {
        let mut source_paths = Vec::with_capacity(job.sources.len());
        for (index, url) in job.sources.iter().enumerate() {
            let path = self
                .fetch_face(url, scratch, &format!("source_{index}"))
                .await?;
            source_paths.push(path);
        }
        debug!(job_id = %job.id, "Resolved {} source face(s) in many mode", source_paths.len());
        Ok(ResolvedFaces {
            selector_mode: SelectorMode::Many,
            source_paths,
            mapping_path: None,
        })
    }

    async fn resolve_reference(
        &self,
        job: &Job,
        scratch: &ScratchDir,
    ) -> WorkerResult<ResolvedFaces> {
        let mapping_url = job
            .mapping_url
            .as_deref()
            .ok_or_else(|| MappingError::malformed("reference mode without a mapping URL"))?;

        let raw = self
            .fetcher
            .fetch_text(mapping_url)
            .await
            .map_err(|e| MappingError::missing_file(format!("{mapping_url}: {e}")))?;

        let mapping = FaceMapping::from_json_str(&raw)?;
        if let Some(detected) = job.detected_faces {
            mapping.check_cardinality(detected as usize)?;
        }

        let mut source_paths = Vec::with_capacity(mapping.entries.len());
        let mut engine_entries = Vec::with_capacity(mapping.entries.len());
        for entry in &mapping.entries {
            let local = self
                .materialize_face(
                    &entry.source_face_path,
                    scratch,
                    &format!("mapped_{}", entry.reference_face_id),
                )
                .await?;
            engine_entries.push(EngineMappingEntry {
                reference_face_id: entry.reference_face_id,
                source_face_path: local.to_string_lossy().to_string(),
                target_identity_selector: &entry.target_identity_selector,
            });
            source_paths.push(local);
        }

        let mapping_path = scratch.file("mapping.json");
        let json = serde_json::to_string_pretty(&engine_entries)
            .map_err(|e| MappingError::malformed(e.to_string()))?;
        tokio::fs::write(&mapping_path, json).await?;

        info!(
            job_id = %job.id,
            entries = engine_entries.len(),
            "Resolved reference mapping to {}",
            mapping_path.display()
        );

        Ok(ResolvedFaces {
            selector_mode: SelectorMode::Reference,
            source_paths,
            mapping_path: Some(mapping_path),
        })
    }

    /// A mapping entry may point at a URL or at a file already on disk.
    async fn materialize_face(
        &self,
        reference: &str,
        scratch: &ScratchDir,
        stem: &str,
    ) -> WorkerResult<PathBuf> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            return self.fetch_face(reference, scratch, stem).await;
        }
        let path = Path::new(reference);
        if !path.exists() {
            return Err(MappingError::missing_file(reference.to_string()).into());
        }
        Ok(path.to_path_buf())
    }

    async fn fetch_face(
        &self,
        url: &str,
        scratch: &ScratchDir,
        stem: &str,
    ) -> WorkerResult<PathBuf> {
        let extension = url
            .rsplit('.')
            .next()
            .filter(|ext| ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("jpg");
        let file_name = format!("{stem}.{extension}");
        let path = self.fetcher.fetch_media(url, scratch, &file_name).await?;
        Ok(path)
    }
}
