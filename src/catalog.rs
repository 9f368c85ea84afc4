//! Box catalogs ("box sources") the packer can draw boxes from.
//!
//! A box source is one of a closed set of names: the carrier box lineups the
//! service knows about, plus `custom` for merchant-specific sizes. Every box is
//! stored in centimetres and kilograms regardless of how it was authored.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use utoipa::ToSchema;

use crate::geometry::{Extent, ValidationError, validate_extent, validate_weight};
use crate::units::{LengthUnit, WeightUnit};

/// Errors raised while building or loading box catalogs.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("box source {0} is configured more than once")]
    DuplicateSource(BoxSource),
    #[error("box source {0} contains a box without a name")]
    EmptyName(BoxSource),
    #[error("box {box_name} in {catalog} is invalid: {reason}")]
    InvalidBox {
        catalog: BoxSource,
        box_name: String,
        reason: ValidationError,
    },
    #[error("unknown box source: {0}")]
    UnknownSource(String),
    #[error("could not read box catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse box catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The closed set of box sources.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum BoxSource {
    UspsPriority,
    UpsExpress,
    FedexOneRate,
    DhlExpress,
    StandardCartons,
    Custom,
}

impl BoxSource {
    pub const ALL: [BoxSource; 6] = [
        BoxSource::UspsPriority,
        BoxSource::UpsExpress,
        BoxSource::FedexOneRate,
        BoxSource::DhlExpress,
        BoxSource::StandardCartons,
        BoxSource::Custom,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BoxSource::UspsPriority => "usps_priority",
            BoxSource::UpsExpress => "ups_express",
            BoxSource::FedexOneRate => "fedex_one_rate",
            BoxSource::DhlExpress => "dhl_express",
            BoxSource::StandardCartons => "standard_cartons",
            BoxSource::Custom => "custom",
        }
    }

    /// Prefix of the human-readable code given to packed boxes.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            BoxSource::UspsPriority => "USPS",
            BoxSource::UpsExpress => "UPS",
            BoxSource::FedexOneRate => "FDX",
            BoxSource::DhlExpress => "DHL",
            BoxSource::StandardCartons => "STD",
            BoxSource::Custom => "CUS",
        }
    }
}

impl fmt::Display for BoxSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BoxSource {
    type Err = CatalogError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        BoxSource::ALL
            .into_iter()
            .find(|source| source.name() == wanted)
            .ok_or_else(|| CatalogError::UnknownSource(raw.to_string()))
    }
}

/// One box size: interior dimensions in centimetres and the maximum load in kilograms.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "name": "Medium Flat Rate Box",
        "dimensions": { "depth": 27.94, "width": 21.59, "height": 13.97 },
        "max_weight": 31.75
    })
)]
pub struct BoxDefinition {
    pub name: String,
    pub dimensions: Extent,
    pub max_weight: f64,
}

impl BoxDefinition {
    pub fn new(
        name: impl Into<String>,
        dimensions: Extent,
        max_weight: f64,
    ) -> Result<Self, ValidationError> {
        validate_extent(&dimensions)?;
        validate_weight(max_weight)?;
        Ok(Self {
            name: name.into(),
            dimensions,
            max_weight,
        })
    }

    pub fn volume(&self) -> f64 {
        self.dimensions.volume()
    }

    fn metric(name: &str, dims: (f64, f64, f64), max_kg: f64) -> Self {
        Self {
            name: name.to_string(),
            dimensions: Extent::from(dims),
            max_weight: max_kg,
        }
    }

    fn imperial(name: &str, dims: (f64, f64, f64), max_lb: f64) -> Self {
        let to_cm = |inches: f64| LengthUnit::In.convert(inches, LengthUnit::Cm);
        Self {
            name: name.to_string(),
            dimensions: Extent::new(to_cm(dims.0), to_cm(dims.1), to_cm(dims.2)),
            max_weight: WeightUnit::Lb.convert(max_lb, WeightUnit::Kg),
        }
    }
}

/// An ordered list of boxes belonging to one box source.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxCatalog {
    pub source: BoxSource,
    pub boxes: Vec<BoxDefinition>,
}

impl BoxCatalog {
    /// Creates a catalog after validating every box.
    pub fn new(source: BoxSource, boxes: Vec<BoxDefinition>) -> Result<Self, CatalogError> {
        for definition in &boxes {
            if definition.name.trim().is_empty() {
                return Err(CatalogError::EmptyName(source));
            }
            validate_extent(&definition.dimensions)
                .and_then(|_| validate_weight(definition.max_weight))
                .map_err(|reason| CatalogError::InvalidBox {
                    catalog: source,
                    box_name: definition.name.clone(),
                    reason,
                })?;
        }
        Ok(Self { source, boxes })
    }

    /// Boxes ordered smallest volume first; equal volumes keep catalog order.
    pub fn sorted_by_volume(&self) -> Vec<BoxDefinition> {
        let mut boxes = self.boxes.clone();
        boxes.sort_by(|a, b| a.volume().partial_cmp(&b.volume()).unwrap_or(Ordering::Equal));
        boxes
    }
}

/// The resolved set of catalogs one packing run is allowed to use.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogSet {
    catalogs: Vec<BoxCatalog>,
}

impl CatalogSet {
    /// Creates a set, rejecting a box source that appears twice.
    pub fn new(catalogs: Vec<BoxCatalog>) -> Result<Self, CatalogError> {
        let mut seen = BTreeSet::new();
        for catalog in &catalogs {
            if !seen.insert(catalog.source) {
                return Err(CatalogError::DuplicateSource(catalog.source));
            }
        }
        Ok(Self { catalogs })
    }

    /// Carrier box lineups and generic cartons shipped with the service.
    pub fn builtin() -> Self {
        Self {
            catalogs: vec![
                BoxCatalog {
                    source: BoxSource::UspsPriority,
                    boxes: vec![
                        BoxDefinition::imperial("Small Flat Rate Box", (8.625, 5.375, 1.625), 70.0),
                        BoxDefinition::imperial("Medium Flat Rate Box 1", (11.0, 8.5, 5.5), 70.0),
                        BoxDefinition::imperial(
                            "Medium Flat Rate Box 2",
                            (13.625, 11.875, 3.375),
                            70.0,
                        ),
                        BoxDefinition::imperial("Large Flat Rate Box", (12.0, 12.0, 5.5), 70.0),
                    ],
                },
                BoxCatalog {
                    source: BoxSource::UpsExpress,
                    boxes: vec![
                        BoxDefinition::imperial("Express Box Small", (13.0, 11.0, 2.0), 30.0),
                        BoxDefinition::imperial("Express Box Medium", (16.0, 11.0, 3.0), 30.0),
                        BoxDefinition::imperial("Express Box Large", (18.0, 13.0, 3.0), 30.0),
                    ],
                },
                BoxCatalog {
                    source: BoxSource::FedexOneRate,
                    boxes: vec![
                        BoxDefinition::imperial("Small Box", (12.375, 10.875, 1.5), 50.0),
                        BoxDefinition::imperial("Medium Box", (13.25, 11.5, 2.375), 50.0),
                        BoxDefinition::imperial("Large Box", (17.5, 12.375, 3.0), 50.0),
                        BoxDefinition::imperial("Extra Large Box", (11.875, 11.0, 10.75), 50.0),
                    ],
                },
                BoxCatalog {
                    source: BoxSource::DhlExpress,
                    boxes: vec![
                        BoxDefinition::metric("Box 2 Small", (33.7, 18.2, 10.0), 5.0),
                        BoxDefinition::metric("Box 3 Shoe", (33.6, 32.0, 5.2), 10.0),
                        BoxDefinition::metric("Box 4 Medium", (33.7, 32.2, 18.0), 15.0),
                        BoxDefinition::metric("Box 5 Large", (33.7, 32.2, 34.5), 20.0),
                        BoxDefinition::metric("Box 6 Extra Large", (41.7, 35.9, 36.9), 25.0),
                        BoxDefinition::metric("Box 7 Jumbo Small", (48.1, 40.4, 38.9), 30.0),
                        BoxDefinition::metric("Box 8 Jumbo", (54.2, 44.4, 40.9), 30.0),
                    ],
                },
                BoxCatalog {
                    source: BoxSource::StandardCartons,
                    boxes: vec![
                        BoxDefinition::metric("Carton XS", (20.0, 15.0, 10.0), 5.0),
                        BoxDefinition::metric("Carton S", (30.0, 20.0, 15.0), 10.0),
                        BoxDefinition::metric("Carton M", (40.0, 30.0, 20.0), 20.0),
                        BoxDefinition::metric("Carton L", (60.0, 40.0, 40.0), 30.0),
                    ],
                },
            ],
        }
    }

    /// Parses a catalog map of the form `{ "<box source>": [box, ...], ... }`.
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let parsed: BTreeMap<BoxSource, Vec<BoxDefinition>> = serde_json::from_str(raw)?;
        let catalogs = parsed
            .into_iter()
            .map(|(source, boxes)| BoxCatalog::new(source, boxes))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(catalogs)
    }

    /// Reads a catalog map from a JSON file.
    pub fn load_from_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoxCatalog> {
        self.catalogs.iter()
    }

    pub fn get(&self, source: BoxSource) -> Option<&BoxCatalog> {
        self.catalogs.iter().find(|catalog| catalog.source == source)
    }

    pub fn len(&self) -> usize {
        self.catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalogs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalogs_are_valid() {
        let builtin = CatalogSet::builtin();
        assert_eq!(builtin.len(), 5);
        for catalog in builtin.iter() {
            let rebuilt = BoxCatalog::new(catalog.source, catalog.boxes.clone());
            assert!(rebuilt.is_ok(), "catalog {} is invalid", catalog.source);
        }
        assert!(CatalogSet::new(builtin.iter().cloned().collect()).is_ok());
    }

    #[test]
    fn imperial_boxes_are_stored_in_centimetres() {
        let builtin = CatalogSet::builtin();
        let usps = builtin.get(BoxSource::UspsPriority).unwrap();
        let large = usps
            .boxes
            .iter()
            .find(|b| b.name == "Large Flat Rate Box")
            .unwrap();
        assert!((large.dimensions.depth - 30.48).abs() < 1e-9);
        assert!((large.max_weight - 31.751_465_9).abs() < 1e-6);
    }

    #[test]
    fn sorted_by_volume_keeps_catalog_order_on_ties() {
        let catalog = BoxCatalog::new(
            BoxSource::Custom,
            vec![
                BoxDefinition::new("big", Extent::new(30.0, 30.0, 30.0), 10.0).unwrap(),
                BoxDefinition::new("flat", Extent::new(20.0, 10.0, 5.0), 10.0).unwrap(),
                BoxDefinition::new("cube", Extent::new(10.0, 10.0, 10.0), 10.0).unwrap(),
            ],
        )
        .unwrap();

        let names: Vec<_> = catalog
            .sorted_by_volume()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["flat", "cube", "big"]);
    }

    #[test]
    fn duplicate_sources_are_rejected() {
        let catalog = BoxCatalog::new(BoxSource::Custom, Vec::new()).unwrap();
        let result = CatalogSet::new(vec![catalog.clone(), catalog]);
        assert!(matches!(
            result,
            Err(CatalogError::DuplicateSource(BoxSource::Custom))
        ));
    }

    #[test]
    fn parses_catalog_json() {
        let json = r#"{
            "custom": [
                { "name": "Mailer", "dimensions": { "depth": 30.0, "width": 30.0, "height": 30.0 }, "max_weight": 10.0 }
            ],
            "dhl_express": []
        }"#;
        let set = CatalogSet::from_json_str(json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(BoxSource::Custom).unwrap().boxes[0].name, "Mailer");
    }

    #[test]
    fn rejects_invalid_box_in_json() {
        let json = r#"{
            "custom": [
                { "name": "Broken", "dimensions": { "depth": -1.0, "width": 30.0, "height": 30.0 }, "max_weight": 10.0 }
            ]
        }"#;
        assert!(matches!(
            CatalogSet::from_json_str(json),
            Err(CatalogError::InvalidBox { .. })
        ));
    }

    #[test]
    fn rejects_unknown_source() {
        assert!(matches!(
            CatalogSet::from_json_str(r#"{ "pigeon_post": [] }"#),
            Err(CatalogError::Parse(_))
        ));
        assert!("ups_express".parse::<BoxSource>().is_ok());
        assert!("pigeon_post".parse::<BoxSource>().is_err());
    }
}
