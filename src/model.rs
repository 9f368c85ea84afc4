//! Data model for items moving through the packing and rate-shopping pipeline.
//!
//! - `OrderLine`: what the order workflow hands over, with a possibly unresolved product reference
//! - `ItemToShip`: a packable item with a concrete product reference
//! - `Money`, `CustomsInfo`, `Address`: carried through to the carrier unchanged

use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use utoipa::ToSchema;

use crate::geometry::{
    Dimensional, Extent, ValidationError, Weighted, validate_extent, validate_weight,
};
use crate::units::{LengthUnit, UnitError, WeightUnit, normalize_length, normalize_weight};

/// Monetary amount in minor currency units (e.g. cents) with an ISO currency code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Money {
    pub amount: i64,
    #[schema(example = "USD")]
    pub currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().to_ascii_uppercase(),
        }
    }
}

/// Customs metadata, passed through to the carrier manifest untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CustomsInfo {
    #[serde(default)]
    pub country_of_origin: Option<String>,
    #[serde(default)]
    pub country_of_manufacture: Option<String>,
    #[serde(default)]
    pub hs_code: Option<String>,
}

/// Concrete reference to the product an order line was bought for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct ProductRef {
    pub id: String,
    pub partition: String,
}

/// Product reference on an order line, which may still point at its parent.
///
/// `Inherit` lines take their product from elsewhere in the order and must be
/// resolved before they can be shipped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForObject {
    Inherit,
    Resolved(ProductRef),
}

impl ForObject {
    pub fn resolved(&self) -> Option<&ProductRef> {
        match self {
            ForObject::Inherit => None,
            ForObject::Resolved(product) => Some(product),
        }
    }
}

/// Dimensions of an item in the unit they were recorded in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Dimensions {
    pub depth: f64,
    pub width: f64,
    pub height: f64,
    pub unit: LengthUnit,
}

impl Dimensions {
    pub fn new(depth: f64, width: f64, height: f64, unit: LengthUnit) -> Self {
        Self {
            depth,
            width,
            height,
            unit,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.depth, self.width, self.height)
    }

    /// Converts all three components into `target`.
    pub fn convert(&self, target: LengthUnit) -> Self {
        Self::new(
            self.unit.convert(self.depth, target),
            self.unit.convert(self.width, target),
            self.unit.convert(self.height, target),
            target,
        )
    }
}

/// Weight of an item in the unit it was recorded in.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Weight {
    pub amount: f64,
    pub unit: WeightUnit,
}

impl Weight {
    pub fn new(amount: f64, unit: WeightUnit) -> Self {
        Self { amount, unit }
    }

    pub fn convert(&self, target: WeightUnit) -> Self {
        Self::new(self.unit.convert(self.amount, target), target)
    }
}

/// Most units a single item line may ask for.
pub const MAX_UNITS_PER_ITEM: u32 = 1_000;

/// Most units one packing request or origin group may ask for in total.
pub const MAX_UNITS_PER_REQUEST: u64 = 10_000;

/// Key under which unit items are collapsed back into quantity-bearing groups.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub product_id: String,
    pub partition: String,
    pub variant_id: Option<String>,
}

/// A physical item ready for packing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "order_line_id": "line-1",
        "product": { "id": "prod-1", "partition": "shop-1" },
        "variant_id": "A",
        "name": "Mug",
        "quantity": 3,
        "dimensions": { "depth": 10.0, "width": 10.0, "height": 10.0, "unit": "cm" },
        "weight": { "amount": 1.0, "unit": "kg" },
        "value": { "amount": 1500, "currency": "EUR" },
        "customs": { "country_of_origin": "DE", "hs_code": "6912.00" }
    })
)]
pub struct ItemToShip {
    pub order_line_id: String,
    pub product: ProductRef,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub dimensions: Dimensions,
    pub weight: Weight,
    pub value: Money,
    #[serde(default)]
    pub customs: CustomsInfo,
}

impl ItemToShip {
    /// Checks that dimensions, weight and quantity describe a real object.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_extent(&self.dimensions.extent())?;
        validate_weight(self.weight.amount)?;
        if self.quantity == 0 {
            return Err(ValidationError::InvalidQuantity(format!(
                "Quantity of {} must be at least 1",
                self.name
            )));
        }
        if self.quantity > MAX_UNITS_PER_ITEM {
            return Err(ValidationError::InvalidQuantity(format!(
                "Quantity of {} must not exceed {MAX_UNITS_PER_ITEM}",
                self.name
            )));
        }
        Ok(())
    }

    /// Identifier shown to people: the variant id, or the item name without one.
    pub fn sku(&self) -> &str {
        self.variant_id.as_deref().unwrap_or(&self.name)
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            product_id: self.product.id.clone(),
            partition: self.product.partition.clone(),
            variant_id: self.variant_id.clone(),
        }
    }

    /// Splits an item of quantity N into N records of quantity 1.
    pub fn expand(&self) -> Vec<ItemToShip> {
        (0..self.quantity)
            .map(|_| ItemToShip {
                quantity: 1,
                ..self.clone()
            })
            .collect()
    }

    /// Re-expresses dimensions and weight in the unit system of the origin country.
    pub fn normalized_for(&self, country: &str) -> Result<ItemToShip, UnitError> {
        let (depth, unit) = normalize_length(self.dimensions.depth, self.dimensions.unit, country)?;
        let (width, _) = normalize_length(self.dimensions.width, self.dimensions.unit, country)?;
        let (height, _) = normalize_length(self.dimensions.height, self.dimensions.unit, country)?;
        let (weight, weight_unit) = normalize_weight(self.weight.amount, self.weight.unit, country)?;

        Ok(ItemToShip {
            dimensions: Dimensions::new(depth, width, height, unit),
            weight: Weight::new(weight, weight_unit),
            ..self.clone()
        })
    }
}

/// Rejects item lists whose quantities add up to more than `MAX_UNITS_PER_REQUEST` units.
pub fn validate_unit_total<'a>(
    items: impl IntoIterator<Item = &'a ItemToShip>,
) -> Result<(), ValidationError> {
    let total: u64 = items.into_iter().map(|item| u64::from(item.quantity)).sum();
    if total > MAX_UNITS_PER_REQUEST {
        return Err(ValidationError::InvalidQuantity(format!(
            "Total quantity of {total} units must not exceed {MAX_UNITS_PER_REQUEST}"
        )));
    }
    Ok(())
}

impl Dimensional for ItemToShip {
    fn extent_cm(&self) -> Extent {
        self.dimensions.convert(LengthUnit::Cm).extent()
    }
}

impl Weighted for ItemToShip {
    fn weight_kg(&self) -> f64 {
        self.weight.convert(WeightUnit::Kg).amount
    }
}

/// Postal address of a shipping origin or destination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Address {
    #[serde(default)]
    pub name: Option<String>,
    pub street1: String,
    #[serde(default)]
    pub street2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub postal_code: String,
    #[schema(example = "US")]
    pub country: String,
}

/// The merchant location an order line ships from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingOrigin {
    pub location_id: String,
    pub address: Address,
}

/// One line of an order, with dimensions and weight already resolved from the catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderLine {
    pub id: String,
    #[schema(value_type = Object)]
    pub for_object: ForObject,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    pub origin: ShippingOrigin,
    pub dimensions: Dimensions,
    pub weight: Weight,
    pub value: Money,
    #[serde(default)]
    pub customs: CustomsInfo,
}

impl OrderLine {
    /// Builds the packable item, or `None` while the product reference is unresolved.
    pub fn to_item(&self) -> Option<ItemToShip> {
        let product = self.for_object.resolved()?.clone();
        Some(ItemToShip {
            order_line_id: self.id.clone(),
            product,
            variant_id: self.variant_id.clone(),
            name: self.name.clone(),
            quantity: self.quantity,
            dimensions: self.dimensions,
            weight: self.weight,
            value: self.value.clone(),
            customs: self.customs.clone(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::item;
    use super::*;

    #[test]
    fn expand_yields_unit_records_with_metadata() {
        let mut original = item("A", (10.0, 10.0, 10.0), 1.0, 3);
        original.customs.hs_code = Some("6912.00".to_string());

        let units = original.expand();
        assert_eq!(units.len(), 3);
        for unit in &units {
            assert_eq!(unit.quantity, 1);
            assert_eq!(unit.customs.hs_code.as_deref(), Some("6912.00"));
            assert_eq!(unit.value, original.value);
        }
    }

    #[test]
    fn sku_falls_back_to_name() {
        let mut unit = item("A", (1.0, 1.0, 1.0), 1.0, 1);
        assert_eq!(unit.sku(), "A");
        unit.variant_id = None;
        assert_eq!(unit.sku(), "Item A");
    }

    #[test]
    fn canonical_measures_convert_to_cm_and_kg() {
        let mut unit = item("A", (1.0, 2.0, 3.0), 1.0, 1);
        unit.dimensions.unit = LengthUnit::In;
        unit.weight = Weight::new(2.0, WeightUnit::Lb);

        let extent = unit.extent_cm();
        assert!((extent.depth - 2.54).abs() < 1e-9);
        assert!((extent.height - 7.62).abs() < 1e-9);
        assert!((unit.weight_kg() - 0.907_184_74).abs() < 1e-9);
    }

    #[test]
    fn normalized_for_us_uses_imperial_units() {
        let unit = item("A", (25.4, 2.54, 0.1), 0.2, 1);
        let normalized = unit.normalized_for("US").unwrap();
        assert_eq!(normalized.dimensions.unit, LengthUnit::In);
        assert!((normalized.dimensions.depth - 10.0).abs() < 1e-9);
        assert!((normalized.dimensions.width - 1.0).abs() < 1e-9);
        // 0.1 cm is clamped up to 1 cm
        assert!((normalized.dimensions.height - 1.0 / 2.54).abs() < 1e-9);
        assert_eq!(normalized.weight.unit, WeightUnit::Lb);
    }

    #[test]
    fn validate_rejects_zero_quantity_and_bad_dimensions() {
        assert!(item("A", (1.0, 1.0, 1.0), 1.0, 1).validate().is_ok());
        assert!(item("A", (1.0, 1.0, 1.0), 1.0, 0).validate().is_err());
        assert!(item("A", (0.0, 1.0, 1.0), 1.0, 1).validate().is_err());
        assert!(item("A", (1.0, 1.0, 1.0), -1.0, 1).validate().is_err());
    }

    #[test]
    fn validate_caps_the_quantity_of_one_line() {
        assert!(item("A", (1.0, 1.0, 1.0), 1.0, MAX_UNITS_PER_ITEM).validate().is_ok());
        assert!(matches!(
            item("A", (1.0, 1.0, 1.0), 1.0, MAX_UNITS_PER_ITEM + 1).validate(),
            Err(ValidationError::InvalidQuantity(_))
        ));
        assert!(matches!(
            item("A", (1.0, 1.0, 1.0), 1.0, u32::MAX).validate(),
            Err(ValidationError::InvalidQuantity(message)) if message.contains("Item A")
        ));
    }

    #[test]
    fn unit_total_is_capped_across_lines() {
        let lines: Vec<ItemToShip> = (0..10)
            .map(|n| item(&format!("S{n}"), (1.0, 1.0, 1.0), 1.0, MAX_UNITS_PER_ITEM))
            .collect();
        assert!(validate_unit_total(&lines).is_ok());

        let mut crowded = lines.clone();
        crowded.push(item("extra", (1.0, 1.0, 1.0), 1.0, 1));
        assert!(matches!(
            validate_unit_total(&crowded),
            Err(ValidationError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn order_line_with_inherit_reference_is_not_packable() {
        let json = r#"{
            "id": "line-9",
            "for_object": { "kind": "inherit" },
            "name": "Gift wrap",
            "quantity": 1,
            "origin": {
                "location_id": "loc-1",
                "address": { "street1": "1 Main St", "city": "Austin", "postal_code": "78701", "country": "US" }
            },
            "dimensions": { "depth": 1.0, "width": 1.0, "height": 1.0, "unit": "in" },
            "weight": { "amount": 1.0, "unit": "oz" },
            "value": { "amount": 100, "currency": "USD" }
        }"#;
        let line: OrderLine = serde_json::from_str(json).expect("valid order line");
        assert_eq!(line.for_object, ForObject::Inherit);
        assert!(line.to_item().is_none());

        let resolved = OrderLine {
            for_object: ForObject::Resolved(ProductRef {
                id: "prod-1".to_string(),
                partition: "shop".to_string(),
            }),
            ..line
        };
        let item = resolved.to_item().expect("resolved line is packable");
        assert_eq!(item.product.id, "prod-1");
        assert_eq!(item.order_line_id, "line-9");
    }
}
