//! JSON spectra writer

use crate::error::{SlitredError, SlitredResult};
use crate::exposure::ExposureState;
use crate::frame::Spectrum1D;
use crate::reduce::calibrator::SpectraSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

/// Output document for one exposure
#[derive(Debug, Serialize)]
struct SpectraFile<'a> {
    filename: &'a str,
    target: &'a str,
    written_at: DateTime<Utc>,
    /// Instrument configuration per reduced detector
    configs: Vec<(usize, &'a str)>,
    spectra: Vec<&'a Spectrum1D>,
}

/// Writes `spec1d_<stem>.json` per exposure into a directory
#[derive(Debug, Clone)]
pub struct JsonSpectraWriter {
    directory: PathBuf,
}

impl JsonSpectraWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Output path for a raw file name
    pub fn output_path(&self, filename: &str) -> PathBuf {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("exposure");
        self.directory.join(format!("spec1d_{}.json", stem))
    }
}

#[async_trait]
impl SpectraSink for JsonSpectraWriter {
    async fn persist(&self, exposure: &ExposureState) -> SlitredResult<Option<PathBuf>> {
        let spectra = exposure.spectra();
        if spectra.is_empty() {
            return Ok(None);
        }

        let document = SpectraFile {
            filename: &exposure.metadata.filename,
            target: &exposure.metadata.target,
            written_at: Utc::now(),
            configs: exposure
                .detectors()
                .map(|d| (d.detector, d.config.as_str()))
                .collect(),
            spectra,
        };
        let content = serde_json::to_string_pretty(&document)?;

        fs::create_dir_all(&self.directory).await.map_err(|e| SlitredError::Persist {
            exposure: exposure.index(),
            reason: format!("creating {}: {}", self.directory.display(), e),
        })?;

        let path = self.output_path(&exposure.metadata.filename);
        fs::write(&path, content)
            .await
            .map_err(|e| SlitredError::Persist {
                exposure: exposure.index(),
                reason: format!("writing {}: {}", path.display(), e),
            })?;

        info!("Wrote spectra of {} to {}", exposure.metadata.filename, path.display());
        Ok(Some(path))
    }
}
