//! Detector frames and the calibration products carried between stages

use serde::{Deserialize, Serialize};

/// A 2-D detector frame stored row-major, spectral axis first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame2D {
    /// Number of pixels along the dispersion direction
    pub nspec: usize,
    /// Number of pixels along the slit
    pub nspat: usize,
    /// Pixel values, `nspec * nspat` long
    pub data: Vec<f64>,
}

impl Frame2D {
    /// Frame filled with a constant value
    pub fn filled(nspec: usize, nspat: usize, value: f64) -> Self {
        Self {
            nspec,
            nspat,
            data: vec![value; nspec * nspat],
        }
    }

    /// Frame filled with zeros
    pub fn zeros(nspec: usize, nspat: usize) -> Self {
        Self::filled(nspec, nspat, 0.0)
    }

    /// Build a frame by evaluating `f(spec, spat)` at every pixel
    pub fn from_fn(nspec: usize, nspat: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(nspec * nspat);
        for i in 0..nspec {
            for j in 0..nspat {
                data.push(f(i, j));
            }
        }
        Self { nspec, nspat, data }
    }

    /// (nspec, nspat)
    pub fn shape(&self) -> (usize, usize) {
        (self.nspec, self.nspat)
    }

    pub fn get(&self, spec: usize, spat: usize) -> f64 {
        self.data[spec * self.nspat + spat]
    }

    /// Swap the spectral and spatial axes
    pub fn transposed(&self) -> Self {
        Self::from_fn(self.nspat, self.nspec, |i, j| self.get(j, i))
    }

    /// Mean pixel value, 0 for an empty frame
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    /// Pixel-wise `self - other`; shapes must match
    pub fn subtract(&self, other: &Frame2D) -> Option<Frame2D> {
        if self.shape() != other.shape() {
            return None;
        }
        Some(Self {
            nspec: self.nspec,
            nspat: self.nspat,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| a - b)
                .collect(),
        })
    }
}

/// Trimmed data sections of the detector amplifiers, as
/// `[spec_start, spec_end, spat_start, spat_end]` (end exclusive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmplifierSections {
    pub sections: Vec<[usize; 4]>,
}

/// Orientation of the dispersion axis on a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispersion {
    /// Raw frames must be transposed so the spectral axis comes first
    pub transpose: bool,
    pub nspec: usize,
    pub nspat: usize,
}

/// Slit edges in physical (fractional pixel) coordinates, one value per
/// spectral row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEdges {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    /// Number of orders (slits) found
    pub orders: usize,
}

/// Slit trace converted to detector pixel indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlitGeometry {
    pub center: Vec<usize>,
    pub width: usize,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

/// Spectral tilt model and the mask of saturated arc pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiltModel {
    pub tilts: Frame2D,
    pub saturation: Frame2D,
}

/// Arc line identification setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcParams {
    /// Lamps used for the line list
    pub lamps: Vec<String>,
    /// Wavelength at the central spectral pixel (Angstrom)
    pub central_wavelength: f64,
    /// Approximate dispersion (Angstrom per pixel)
    pub dispersion: f64,
}

/// Polynomial wavelength solution in spectral pixel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveSolution {
    pub coefficients: Vec<f64>,
    pub rms: f64,
}

impl WaveSolution {
    /// Evaluate the solution at a spectral pixel
    pub fn wavelength(&self, pixel: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * pixel + c)
    }
}

/// Sensitivity function derived from a standard star
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardResponse {
    /// Name of the standard star
    pub name: String,
    /// Flux per count, one value per spectral pixel
    pub sensitivity: Vec<f64>,
}

/// An extracted 1-D spectrum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum1D {
    pub detector: usize,
    pub wavelength: Vec<f64>,
    pub counts: Vec<f64>,
    /// Flux-calibrated values, set by fluxing
    pub flux: Option<Vec<f64>>,
}
