//! Exposure manifests
//!
//! The exposure metadata table is read from TOML or JSON:
//!
//! ```toml
//! [[exposure]]
//! filename = "b0042.fits"
//! target = "SDSS J1204+0211"
//!
//! [exposure.metadata]
//! slitwid = "1.0 arcsec"
//! dichroic = "d55"
//! disperser = "600/4000"
//! cdangle = 23.5
//! ```

use crate::error::{SlitredError, SlitredResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Header metadata of one science exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureMetadata {
    /// Position in the manifest (assigned on load)
    #[serde(skip)]
    pub index: usize,

    /// Raw file name
    pub filename: String,

    /// Target name
    #[serde(default)]
    pub target: String,

    /// Frame type from the observing log, e.g. "science"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frametype: Option<String>,

    /// Header keywords
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ExposureMetadata {
    pub fn new(filename: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            index: 0,
            filename: filename.into(),
            target: target.into(),
            frametype: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Set a header keyword
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Textual form of a header value; strings are taken verbatim
    pub fn value_text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Numeric header value, parsing strings when needed
    pub fn value_f64(&self, key: &str) -> Option<f64> {
        match self.metadata.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Ordered list of science exposures to reduce
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExposureManifest {
    #[serde(rename = "exposure", default)]
    pub exposures: Vec<ExposureMetadata>,
}

impl ExposureManifest {
    /// Load a manifest, choosing the format from the file extension
    pub async fn load(path: &Path) -> SlitredResult<Self> {
        if !path.exists() {
            return Err(SlitredError::PathNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            SlitredError::io(format!("reading manifest {}", path.display()), e)
        })?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let mut manifest = Self::parse(&content, is_json).map_err(|reason| {
            SlitredError::ManifestInvalid {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        if manifest.exposures.is_empty() {
            return Err(SlitredError::ManifestEmpty(path.to_path_buf()));
        }

        manifest.assign_indices();
        debug!(
            "Loaded {} exposures from {}",
            manifest.exposures.len(),
            path.display()
        );
        Ok(manifest)
    }

    fn parse(content: &str, is_json: bool) -> Result<Self, String> {
        if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            toml::from_str(content).map_err(|e| e.to_string())
        }
    }

    /// Number exposures in input order
    pub fn assign_indices(&mut self) {
        for (index, exposure) in self.exposures.iter_mut().enumerate() {
            exposure.index = index;
        }
    }
}

impl From<Vec<ExposureMetadata>> for ExposureManifest {
    fn from(exposures: Vec<ExposureMetadata>) -> Self {
        let mut manifest = Self { exposures };
        manifest.assign_indices();
        manifest
    }
}
