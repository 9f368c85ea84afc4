//! Comparison of a suggested packing against the packing that was actually finalized.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::geometry::Extent;
use crate::packer::PackedBox;

/// Tolerance in kilograms before a weight difference counts.
pub const WEIGHT_TOLERANCE_KG: f64 = 0.1;

/// An item line inside a snapshot box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SnapshotItem {
    #[serde(default)]
    pub variant_id: Option<String>,
    pub name: String,
    pub quantity: u32,
}

impl SnapshotItem {
    /// Variant id, falling back to the item name.
    pub fn sku(&self) -> &str {
        self.variant_id.as_deref().unwrap_or(&self.name)
    }
}

/// A box as recorded in a packing snapshot; dimensions in cm, weight in kg.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SnapshotBox {
    pub dimensions: Extent,
    pub used_weight: f64,
    pub items: Vec<SnapshotItem>,
}

impl From<&PackedBox> for SnapshotBox {
    fn from(packed: &PackedBox) -> Self {
        Self {
            dimensions: packed.definition.dimensions,
            used_weight: packed.used_weight,
            items: packed
                .items
                .iter()
                .map(|item| SnapshotItem {
                    variant_id: item.variant_id.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

/// Primary reason of a deviation, in decreasing priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviationType {
    BoxCountChanged,
    DimensionsDiffer,
    WeightDiffered,
    SkusMoved,
    SkusMissingOrAdded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviationDiff {
    pub box_count_changed: bool,
    pub dimensions_differ: bool,
    pub weight_differed: bool,
    pub skus_moved: bool,
    pub skus_added_or_missing: bool,
}

impl DeviationDiff {
    /// The highest-priority flag that is set.
    pub fn primary(&self) -> Option<DeviationType> {
        [
            (self.box_count_changed, DeviationType::BoxCountChanged),
            (self.dimensions_differ, DeviationType::DimensionsDiffer),
            (self.weight_differed, DeviationType::WeightDiffered),
            (self.skus_moved, DeviationType::SkusMoved),
            (self.skus_added_or_missing, DeviationType::SkusMissingOrAdded),
        ]
        .into_iter()
        .find_map(|(set, kind)| set.then_some(kind))
    }

    pub fn any(&self) -> bool {
        self.primary().is_some()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviationReport {
    pub was_deviated: bool,
    pub deviation_type: Option<DeviationType>,
    pub diff: DeviationDiff,
}

/// Box indices per sku, sorted; an sku listed twice in one box appears twice.
fn sku_positions(boxes: &[SnapshotBox]) -> BTreeMap<&str, Vec<usize>> {
    let mut positions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, packed) in boxes.iter().enumerate() {
        for item in &packed.items {
            positions.entry(item.sku()).or_default().push(index);
        }
    }
    for indices in positions.values_mut() {
        indices.sort_unstable();
    }
    positions
}

/// Compares the finalized packing with the suggested one.
///
/// Boxes are compared pairwise by index, so both snapshots must list their
/// boxes in the same order. A missing snapshot is never a deviation.
pub fn detect_deviation(
    actual: Option<&[SnapshotBox]>,
    suggested: Option<&[SnapshotBox]>,
) -> DeviationReport {
    let (Some(actual), Some(suggested)) = (actual, suggested) else {
        return DeviationReport::default();
    };

    let mut diff = DeviationDiff {
        box_count_changed: actual.len() != suggested.len(),
        ..DeviationDiff::default()
    };

    for (left, right) in actual.iter().zip(suggested) {
        if left.dimensions.signature() != right.dimensions.signature() {
            diff.dimensions_differ = true;
        }
        if (left.used_weight - right.used_weight).abs() > WEIGHT_TOLERANCE_KG {
            diff.weight_differed = true;
        }
    }

    let actual_positions = sku_positions(actual);
    let suggested_positions = sku_positions(suggested);
    let skus: BTreeSet<&str> = actual_positions
        .keys()
        .chain(suggested_positions.keys())
        .copied()
        .collect();

    for sku in skus {
        match (actual_positions.get(sku), suggested_positions.get(sku)) {
            (Some(left), Some(right)) => {
                if left != right {
                    diff.skus_moved = true;
                }
            }
            _ => diff.skus_added_or_missing = true,
        }
    }

    let deviation_type = diff.primary();
    DeviationReport {
        was_deviated: deviation_type.is_some(),
        deviation_type,
        diff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(dims: (f64, f64, f64), weight: f64, items: &[(&str, u32)]) -> SnapshotBox {
        SnapshotBox {
            dimensions: dims.into(),
            used_weight: weight,
            items: items
                .iter()
                .map(|(sku, quantity)| SnapshotItem {
                    variant_id: Some(sku.to_string()),
                    name: format!("Item {sku}"),
                    quantity: *quantity,
                })
                .collect(),
        }
    }

    #[test]
    fn identical_snapshots_do_not_deviate() {
        let packing = vec![
            snapshot((30.0, 30.0, 30.0), 3.0, &[("A", 2), ("B", 1)]),
            snapshot((20.0, 20.0, 10.0), 1.0, &[("C", 1)]),
        ];
        let report = detect_deviation(Some(packing.as_slice()), Some(packing.as_slice()));
        assert!(!report.was_deviated);
        assert_eq!(report.deviation_type, None);
        assert_eq!(report.diff, DeviationDiff::default());
    }

    #[test]
    fn missing_side_is_not_a_deviation() {
        let packing = vec![snapshot((30.0, 30.0, 30.0), 3.0, &[("A", 1)])];
        assert!(!detect_deviation(None, Some(packing.as_slice())).was_deviated);
        assert!(!detect_deviation(Some(packing.as_slice()), None).was_deviated);
        assert!(!detect_deviation(None, None).was_deviated);
    }

    #[test]
    fn merged_box_reports_count_change_and_missing_sku() {
        let actual = vec![snapshot((30.0, 30.0, 30.0), 2.0, &[("A", 2)])];
        let suggested = vec![
            snapshot((30.0, 30.0, 30.0), 2.0, &[("A", 1)]),
            snapshot((30.0, 30.0, 30.0), 1.0, &[("B", 1)]),
        ];

        let report = detect_deviation(Some(actual.as_slice()), Some(suggested.as_slice()));
        assert!(report.was_deviated);
        assert_eq!(report.deviation_type, Some(DeviationType::BoxCountChanged));
        assert!(report.diff.box_count_changed);
        assert!(report.diff.skus_added_or_missing);
        assert!(!report.diff.skus_moved);
    }

    #[test]
    fn box_count_outranks_weight() {
        let actual = vec![
            snapshot((30.0, 30.0, 30.0), 5.0, &[("A", 1)]),
            snapshot((30.0, 30.0, 30.0), 1.0, &[("B", 1)]),
        ];
        let suggested = vec![snapshot((30.0, 30.0, 30.0), 2.0, &[("A", 1)])];

        let report = detect_deviation(Some(actual.as_slice()), Some(suggested.as_slice()));
        assert!(report.diff.weight_differed);
        assert_eq!(report.deviation_type, Some(DeviationType::BoxCountChanged));
    }

    #[test]
    fn weight_within_tolerance_is_ignored() {
        let actual = vec![snapshot((30.0, 30.0, 30.0), 2.05, &[("A", 1)])];
        let suggested = vec![snapshot((30.0, 30.0, 30.0), 2.0, &[("A", 1)])];
        assert!(!detect_deviation(Some(actual.as_slice()), Some(suggested.as_slice())).was_deviated);

        let heavier = vec![snapshot((30.0, 30.0, 30.0), 2.5, &[("A", 1)])];
        let report = detect_deviation(Some(heavier.as_slice()), Some(suggested.as_slice()));
        assert_eq!(report.deviation_type, Some(DeviationType::WeightDiffered));
    }

    #[test]
    fn rotated_dimensions_count_as_different() {
        let actual = vec![snapshot((20.0, 30.0, 10.0), 1.0, &[("A", 1)])];
        let suggested = vec![snapshot((30.0, 20.0, 10.0), 1.0, &[("A", 1)])];
        let report = detect_deviation(Some(actual.as_slice()), Some(suggested.as_slice()));
        assert_eq!(report.deviation_type, Some(DeviationType::DimensionsDiffer));
    }

    #[test]
    fn swapped_items_are_moved() {
        let actual = vec![
            snapshot((30.0, 30.0, 30.0), 1.0, &[("B", 1)]),
            snapshot((30.0, 30.0, 30.0), 1.0, &[("A", 1)]),
        ];
        let suggested = vec![
            snapshot((30.0, 30.0, 30.0), 1.0, &[("A", 1)]),
            snapshot((30.0, 30.0, 30.0), 1.0, &[("B", 1)]),
        ];
        let report = detect_deviation(Some(actual.as_slice()), Some(suggested.as_slice()));
        assert!(report.diff.skus_moved);
        assert!(!report.diff.skus_added_or_missing);
        assert_eq!(report.deviation_type, Some(DeviationType::SkusMoved));
    }

    #[test]
    fn sku_falls_back_to_name() {
        let item = SnapshotItem {
            variant_id: None,
            name: "Mug".to_string(),
            quantity: 1,
        };
        assert_eq!(item.sku(), "Mug");
    }

    #[test]
    fn packed_boxes_convert_to_snapshots() {
        use crate::catalog::{BoxCatalog, BoxDefinition, BoxSource};
        use crate::model::fixtures::item;
        use crate::packer::pack;

        let catalog = BoxCatalog::new(
            BoxSource::Custom,
            vec![BoxDefinition::new("Cube", Extent::new(30.0, 30.0, 30.0), 10.0).unwrap()],
        )
        .unwrap();
        let boxes = pack(&[item("A", (10.0, 10.0, 10.0), 1.0, 3)], &catalog).unwrap();
        let snapshots: Vec<SnapshotBox> = boxes.iter().map(SnapshotBox::from).collect();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].items[0].sku(), "A");
        assert_eq!(snapshots[0].items[0].quantity, 3);
        assert!((snapshots[0].used_weight - 3.0).abs() < 1e-9);
        assert!(!detect_deviation(Some(snapshots.as_slice()), Some(snapshots.as_slice())).was_deviated);
    }
}
