//! Extents, volumes and rotation checks shared by items and boxes.
//!
//! Everything the packer measures goes through [`Extent`]: a depth/width/height
//! triple in a single length unit. Boxes are always expressed in centimetres;
//! items are converted to centimetres before they reach the packer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Global numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-6;

/// The six axis permutations an item can be turned through.
const ROTATIONS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// Validation error for dimension and weight data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),
    #[error("Invalid weight: {0}")]
    InvalidWeight(String),
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}

/// Depth, width and height of an item or a box interior.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Extent {
    pub depth: f64,
    pub width: f64,
    pub height: f64,
}

impl Extent {
    #[inline]
    pub const fn new(depth: f64, width: f64, height: f64) -> Self {
        Self {
            depth,
            width,
            height,
        }
    }

    #[inline]
    pub const fn as_array(&self) -> [f64; 3] {
        [self.depth, self.width, self.height]
    }

    /// Calculates the volume (product of all components).
    #[inline]
    pub fn volume(&self) -> f64 {
        self.depth * self.width * self.height
    }

    /// Multiplies every component with the same factor.
    #[inline]
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.depth * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    /// Checks if all components are positive and finite.
    #[inline]
    pub fn is_valid_dimension(&self) -> bool {
        self.as_array()
            .iter()
            .all(|value| *value > 0.0 && value.is_finite())
    }

    /// Component-wise comparison without turning the extent.
    #[inline]
    pub fn fits_within(&self, container: &Self, tolerance: f64) -> bool {
        self.depth <= container.depth + tolerance
            && self.width <= container.width + tolerance
            && self.height <= container.height + tolerance
    }

    /// Checks whether any of the six 90° axis-aligned rotations fits the container.
    ///
    /// # Examples
    /// ```
    /// use ship_it_now::geometry::{Extent, EPSILON_GENERAL};
    ///
    /// let item = Extent::new(10.0, 20.0, 5.0);
    /// assert!(item.fits_rotated(&Extent::new(20.0, 10.0, 6.0), EPSILON_GENERAL));
    /// assert!(!item.fits_rotated(&Extent::new(9.0, 9.0, 9.0), EPSILON_GENERAL));
    /// ```
    pub fn fits_rotated(&self, container: &Self, tolerance: f64) -> bool {
        self.rotations()
            .any(|rotated| rotated.fits_within(container, tolerance))
    }

    /// Iterates over all six rotations, starting with the unrotated extent.
    pub fn rotations(&self) -> impl Iterator<Item = Extent> + use<> {
        let dims = self.as_array();
        ROTATIONS
            .into_iter()
            .map(move |[a, b, c]| Extent::new(dims[a], dims[b], dims[c]))
    }

    /// Compact textual form, used when two layouts are compared by their dimensions.
    pub fn signature(&self) -> String {
        format!("{}x{}x{}", self.depth, self.width, self.height)
    }
}

impl From<(f64, f64, f64)> for Extent {
    #[inline]
    fn from(tuple: (f64, f64, f64)) -> Self {
        Self::new(tuple.0, tuple.1, tuple.2)
    }
}

/// Trait for objects with a spatial extent in centimetres.
pub trait Dimensional {
    /// Returns the extent in centimetres.
    fn extent_cm(&self) -> Extent;

    /// Volume in cubic centimetres.
    fn volume_cm3(&self) -> f64 {
        self.extent_cm().volume()
    }
}

/// Trait for objects with weight.
pub trait Weighted {
    /// Returns the weight in kg.
    fn weight_kg(&self) -> f64;
}

/// Validates a single dimension.
pub fn validate_dimension(value: f64, name: &str) -> Result<(), ValidationError> {
    if value <= 0.0 || value.is_nan() || value.is_infinite() {
        return Err(ValidationError::InvalidDimension(format!(
            "{} must be positive, got: {}",
            name, value
        )));
    }
    Ok(())
}

/// Validates a weight.
pub fn validate_weight(value: f64) -> Result<(), ValidationError> {
    if value <= 0.0 || value.is_nan() || value.is_infinite() {
        return Err(ValidationError::InvalidWeight(format!(
            "Weight must be positive, got: {}",
            value
        )));
    }
    Ok(())
}

/// Validates all three components of an extent.
pub fn validate_extent(extent: &Extent) -> Result<(), ValidationError> {
    validate_dimension(extent.depth, "Depth")?;
    validate_dimension(extent.width, "Width")?;
    validate_dimension(extent.height, "Height")?;
    Ok(())
}
