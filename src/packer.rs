//! Bin packing of items into carrier boxes.
//!
//! The packer is an adapted First-Fit-Decreasing heuristic:
//! - items are expanded to single units and sorted largest volume first
//! - each unit goes into the already opened box with the least headroom left after adding it
//! - a new box is opened only when no open box can take the unit, smallest volume first
//! - volume and weight are capped by safety buffers so quotes never ask for an exactly full box
//!
//! Boxes are compared in centimetres and kilograms; items are converted on the fly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::catalog::{BoxCatalog, BoxDefinition, BoxSource, CatalogSet};
use crate::geometry::{Dimensional, Extent, Weighted};
use crate::model::{ItemKey, ItemToShip};

/// Configuration for the packing algorithm.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PackingConfig {
    /// Share of a box's volume that may be filled (0.0 to 1.0)
    pub volume_buffer: f64,
    /// Share of a box's maximum weight that may be loaded (0.0 to 1.0)
    pub weight_buffer: f64,
    /// General numerical tolerance
    pub general_epsilon: f64,
}

impl PackingConfig {
    pub const DEFAULT_VOLUME_BUFFER: f64 = 0.95;
    pub const DEFAULT_WEIGHT_BUFFER: f64 = 0.95;
    pub const DEFAULT_GENERAL_EPSILON: f64 = 1e-6;

    /// Creates a builder for a custom configuration.
    pub fn builder() -> PackingConfigBuilder {
        PackingConfigBuilder::default()
    }
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            volume_buffer: Self::DEFAULT_VOLUME_BUFFER,
            weight_buffer: Self::DEFAULT_WEIGHT_BUFFER,
            general_epsilon: Self::DEFAULT_GENERAL_EPSILON,
        }
    }
}

/// Builder for PackingConfig.
#[derive(Clone, Debug, Default)]
pub struct PackingConfigBuilder {
    config: PackingConfig,
}

impl PackingConfigBuilder {
    /// Sets the usable share of a box's volume.
    pub fn volume_buffer(mut self, buffer: f64) -> Self {
        self.config.volume_buffer = buffer;
        self
    }

    /// Sets the usable share of a box's maximum weight.
    pub fn weight_buffer(mut self, buffer: f64) -> Self {
        self.config.weight_buffer = buffer;
        self
    }

    /// Sets the general tolerance.
    pub fn general_epsilon(mut self, epsilon: f64) -> Self {
        self.config.general_epsilon = epsilon;
        self
    }

    /// Builds the final configuration.
    pub fn build(self) -> PackingConfig {
        self.config
    }
}

/// A box from a catalog, filled with items.
///
/// `items` holds one entry per product/partition/variant with its quantity;
/// single-unit records never leave the packer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PackedBox {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub code: String,
    pub source: BoxSource,
    pub definition: BoxDefinition,
    pub items: Vec<ItemToShip>,
    /// Used volume in cm³
    pub used_volume: f64,
    /// Used weight in kg
    pub used_weight: f64,
}

impl PackedBox {
    /// Number of physical units in the box.
    pub fn unit_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Volume utilization in percent of the full box volume.
    pub fn utilization_percent(&self) -> f64 {
        let total = self.definition.volume();
        if total <= 0.0 {
            return 0.0;
        }
        (self.used_volume / total) * 100.0
    }
}

/// Why an item could not be placed in any box of a catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnfitReason {
    NoBoxes,
    TooHeavyForEveryBox,
    ExceedsEveryBox,
    /// Every box is either too small or too weak, but not all for the same reason.
    TooLargeOrTooHeavy,
    NoBoxWithinBuffers,
}

impl UnfitReason {
    pub fn code(&self) -> &'static str {
        match self {
            UnfitReason::NoBoxes => "no_boxes",
            UnfitReason::TooHeavyForEveryBox => "too_heavy_for_every_box",
            UnfitReason::ExceedsEveryBox => "exceeds_every_box",
            UnfitReason::TooLargeOrTooHeavy => "too_large_or_too_heavy",
            UnfitReason::NoBoxWithinBuffers => "no_box_within_buffers",
        }
    }
}

impl std::fmt::Display for UnfitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnfitReason::NoBoxes => write!(f, "the catalog contains no boxes"),
            UnfitReason::TooHeavyForEveryBox => {
                write!(f, "item exceeds the weight limit of every box")
            }
            UnfitReason::ExceedsEveryBox => {
                write!(f, "item does not fit any box in any orientation")
            }
            UnfitReason::TooLargeOrTooHeavy => {
                write!(f, "every box is either too small or too weak for the item")
            }
            UnfitReason::NoBoxWithinBuffers => {
                write!(f, "item only fits boxes beyond their safety buffers")
            }
        }
    }
}

/// Errors of a single packing run.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PackError {
    #[error("no box in {catalog} fits item {sku} (order line {order_line_id}): {reason}")]
    NoFittingBox {
        catalog: BoxSource,
        sku: String,
        order_line_id: String,
        reason: UnfitReason,
    },
}

/// Outcome of packing one item list against every available box source.
#[derive(Clone, Debug, Default)]
pub struct PackingResult {
    pub outcomes: BTreeMap<BoxSource, Result<Vec<PackedBox>, PackError>>,
}

impl PackingResult {
    /// Box sources that packed every item, with their boxes.
    pub fn successful(&self) -> impl Iterator<Item = (BoxSource, &Vec<PackedBox>)> {
        self.outcomes
            .iter()
            .filter_map(|(source, outcome)| outcome.as_ref().ok().map(|boxes| (*source, boxes)))
    }

    /// Box sources that could not take every item.
    pub fn failures(&self) -> impl Iterator<Item = (BoxSource, &PackError)> {
        self.outcomes
            .iter()
            .filter_map(|(source, outcome)| outcome.as_ref().err().map(|err| (*source, err)))
    }

    pub fn get(&self, source: BoxSource) -> Option<&Result<Vec<PackedBox>, PackError>> {
        self.outcomes.get(&source)
    }

    pub fn source_count(&self) -> usize {
        self.outcomes.len()
    }
}

/// Events emitted while packing, for live visualization.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum PackEvent {
    /// A new box was opened.
    BoxOpened {
        source: BoxSource,
        box_index: usize,
        code: String,
        name: String,
        dims: Extent,
        max_weight: f64,
    },
    /// A unit was placed into a box.
    ItemPlaced {
        source: BoxSource,
        box_index: usize,
        sku: String,
        order_line_id: String,
        used_volume: f64,
        used_weight: f64,
    },
    /// A unit fits no box of the source; the source is abandoned.
    Failed {
        source: BoxSource,
        sku: String,
        reason_code: String,
        reason_text: String,
    },
    /// Packing of the source completed.
    Finished { source: BoxSource, boxes: usize },
}

/// A box that is still being filled, holding single-unit records.
struct OpenBox {
    definition: BoxDefinition,
    units: Vec<ItemToShip>,
    used_volume: f64,
    used_weight: f64,
}

impl OpenBox {
    fn new(definition: BoxDefinition) -> Self {
        Self {
            definition,
            units: Vec::new(),
            used_volume: 0.0,
            used_weight: 0.0,
        }
    }

    fn volume_capacity(definition: &BoxDefinition, config: &PackingConfig) -> f64 {
        definition.volume() * config.volume_buffer
    }

    fn weight_capacity(definition: &BoxDefinition, config: &PackingConfig) -> f64 {
        definition.max_weight * config.weight_buffer
    }

    /// Checks whether an empty box of this definition can take the unit.
    fn fits_empty(
        definition: &BoxDefinition,
        extent: &Extent,
        weight: f64,
        config: &PackingConfig,
    ) -> bool {
        extent.fits_rotated(&definition.dimensions, config.general_epsilon)
            && extent.volume() <= Self::volume_capacity(definition, config) + config.general_epsilon
            && weight <= Self::weight_capacity(definition, config) + config.general_epsilon
    }

    fn accepts(&self, extent: &Extent, weight: f64, config: &PackingConfig) -> bool {
        extent.fits_rotated(&self.definition.dimensions, config.general_epsilon)
            && self.used_volume + extent.volume()
                <= Self::volume_capacity(&self.definition, config) + config.general_epsilon
            && self.used_weight + weight
                <= Self::weight_capacity(&self.definition, config) + config.general_epsilon
    }

    /// Volume left below the buffer once a unit of `volume` has been added.
    fn headroom_after(&self, volume: f64, config: &PackingConfig) -> f64 {
        Self::volume_capacity(&self.definition, config) - (self.used_volume + volume)
    }

    fn place(&mut self, unit: ItemToShip, volume: f64, weight: f64) {
        self.units.push(unit);
        self.used_volume += volume;
        self.used_weight += weight;
    }

    /// Collapses unit records into one entry per item key, in order of first appearance.
    fn into_packed(self, source: BoxSource, index: usize) -> PackedBox {
        let mut positions: HashMap<ItemKey, usize> = HashMap::new();
        let mut items: Vec<ItemToShip> = Vec::new();

        for unit in self.units {
            match positions.get(&unit.key()) {
                Some(&pos) => items[pos].quantity += unit.quantity,
                None => {
                    positions.insert(unit.key(), items.len());
                    items.push(unit);
                }
            }
        }

        PackedBox {
            id: Uuid::new_v4(),
            code: box_code(source, index),
            source,
            definition: self.definition,
            items,
            used_volume: self.used_volume,
            used_weight: self.used_weight,
        }
    }
}

fn box_code(source: BoxSource, index: usize) -> String {
    format!("{}-{}", source.code_prefix(), index + 1)
}

fn determine_unfit_reason(
    candidates: &[BoxDefinition],
    extent: &Extent,
    weight: f64,
    config: &PackingConfig,
) -> UnfitReason {
    if candidates.is_empty() {
        return UnfitReason::NoBoxes;
    }

    let carries = |definition: &BoxDefinition| {
        weight <= OpenBox::weight_capacity(definition, config) + config.general_epsilon
    };
    let holds = |definition: &BoxDefinition| {
        extent.fits_rotated(&definition.dimensions, config.general_epsilon)
    };

    if !candidates.iter().any(carries) {
        return UnfitReason::TooHeavyForEveryBox;
    }
    if !candidates.iter().any(holds) {
        return UnfitReason::ExceedsEveryBox;
    }
    // Only the volume buffer can stop a box that both holds and carries the item.
    if candidates.iter().any(|definition| carries(definition) && holds(definition)) {
        return UnfitReason::NoBoxWithinBuffers;
    }
    UnfitReason::TooLargeOrTooHeavy
}

/// Packs items into boxes of one catalog using the default buffers.
pub fn pack(items: &[ItemToShip], catalog: &BoxCatalog) -> Result<Vec<PackedBox>, PackError> {
    pack_with_config(items, catalog, &PackingConfig::default())
}

/// Like `pack`, but with explicit buffers and tolerances.
pub fn pack_with_config(
    items: &[ItemToShip],
    catalog: &BoxCatalog,
    config: &PackingConfig,
) -> Result<Vec<PackedBox>, PackError> {
    pack_with_progress(items, catalog, config, |_| {})
}

/// Packing with a progress callback for every opened box and placed unit.
///
/// Fails with `PackError::NoFittingBox` for the first unit that no box of the
/// catalog can take, even empty.
pub fn pack_with_progress(
    items: &[ItemToShip],
    catalog: &BoxCatalog,
    config: &PackingConfig,
    mut on_event: impl FnMut(&PackEvent),
) -> Result<Vec<PackedBox>, PackError> {
    let source = catalog.source;
    let candidates = catalog.sorted_by_volume();

    // Largest units first; equal volumes keep input order
    let mut units: Vec<ItemToShip> = items.iter().flat_map(ItemToShip::expand).collect();
    units.sort_by(|a, b| {
        b.volume_cm3()
            .partial_cmp(&a.volume_cm3())
            .unwrap_or(Ordering::Equal)
    });

    let mut open: Vec<OpenBox> = Vec::new();

    for unit in units {
        let extent = unit.extent_cm();
        let volume = extent.volume();
        let weight = unit.weight_kg();

        let tightest = open
            .iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.accepts(&extent, weight, config))
            .min_by(|(_, a), (_, b)| {
                a.headroom_after(volume, config)
                    .partial_cmp(&b.headroom_after(volume, config))
                    .unwrap_or(Ordering::Equal)
            })
            .map(|(idx, _)| idx);

        let idx = match tightest {
            Some(idx) => idx,
            None => {
                let Some(definition) = candidates
                    .iter()
                    .find(|definition| OpenBox::fits_empty(definition, &extent, weight, config))
                else {
                    let reason = determine_unfit_reason(&candidates, &extent, weight, config);
                    on_event(&PackEvent::Failed {
                        source,
                        sku: unit.sku().to_string(),
                        reason_code: reason.code().to_string(),
                        reason_text: reason.to_string(),
                    });
                    return Err(PackError::NoFittingBox {
                        catalog: source,
                        sku: unit.sku().to_string(),
                        order_line_id: unit.order_line_id.clone(),
                        reason,
                    });
                };

                tracing::debug!(
                    source = %source,
                    box_name = %definition.name,
                    sku = unit.sku(),
                    "opening new box"
                );
                open.push(OpenBox::new(definition.clone()));
                let idx = open.len() - 1;
                on_event(&PackEvent::BoxOpened {
                    source,
                    box_index: idx + 1,
                    code: box_code(source, idx),
                    name: definition.name.clone(),
                    dims: definition.dimensions,
                    max_weight: definition.max_weight,
                });
                idx
            }
        };

        let sku = unit.sku().to_string();
        let order_line_id = unit.order_line_id.clone();
        let target = &mut open[idx];
        target.place(unit, volume, weight);
        on_event(&PackEvent::ItemPlaced {
            source,
            box_index: idx + 1,
            sku,
            order_line_id,
            used_volume: target.used_volume,
            used_weight: target.used_weight,
        });
    }

    on_event(&PackEvent::Finished {
        source,
        boxes: open.len(),
    });

    Ok(open
        .into_iter()
        .enumerate()
        .map(|(index, filled)| filled.into_packed(source, index))
        .collect())
}

/// Packs the same items once per box source; each source succeeds or fails on its own.
pub fn pack_all_sources(
    items: &[ItemToShip],
    catalogs: &CatalogSet,
    config: &PackingConfig,
) -> PackingResult {
    pack_all_sources_with_progress(items, catalogs, config, |_| {})
}

/// Multi-source packing with a progress callback shared by all sources.
pub fn pack_all_sources_with_progress(
    items: &[ItemToShip],
    catalogs: &CatalogSet,
    config: &PackingConfig,
    mut on_event: impl FnMut(&PackEvent),
) -> PackingResult {
    let mut outcomes = BTreeMap::new();

    for catalog in catalogs.iter() {
        let outcome = pack_with_progress(items, catalog, config, &mut on_event);
        match &outcome {
            Ok(boxes) => {
                tracing::debug!(source = %catalog.source, boxes = boxes.len(), "box source packed")
            }
            Err(err) => tracing::warn!(source = %catalog.source, error = %err, "box source failed"),
        }
        outcomes.insert(catalog.source, outcome);
    }

    PackingResult { outcomes }
}
