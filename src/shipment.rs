//! Shipment assembly: order lines in, one rate-shopped shipment candidate per origin out.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::{BoxSource, CatalogSet};
use crate::geometry::ValidationError;
use crate::model::{Address, ItemToShip, OrderLine, ShippingOrigin, validate_unit_total};
use crate::packer::pack_all_sources;
use crate::rates::{CheapestOffers, RateProvider, RateShopConfig, shop_rates};
use crate::units::UnitError;

/// Faults that abort one origin group.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GroupError {
    #[error("order line {order_line_id} still inherits its product reference")]
    Unresolved { order_line_id: String },
    #[error("order line {order_line_id} is invalid: {source}")]
    InvalidItem {
        order_line_id: String,
        source: ValidationError,
    },
    #[error("origin group is too large: {0}")]
    TooManyUnits(ValidationError),
    #[error("unit normalization failed: {0}")]
    Normalization(#[from] UnitError),
}

/// A box source that could not pack the group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SourceFailure {
    pub source: BoxSource,
    pub reason: String,
}

/// One physical shipment with its cheapest carrier options.
///
/// An empty offer table means no shipping rate is available for this origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ShipmentCandidate {
    pub origin: ShippingOrigin,
    pub destination: Address,
    pub offers: CheapestOffers,
    pub packing_failures: Vec<SourceFailure>,
    /// Set when the group could not be packed at all.
    pub failure: Option<String>,
}

impl ShipmentCandidate {
    fn empty(origin: ShippingOrigin, destination: &Address) -> Self {
        Self {
            origin,
            destination: destination.clone(),
            offers: CheapestOffers::default(),
            packing_failures: Vec::new(),
            failure: None,
        }
    }

    pub fn has_rates(&self) -> bool {
        !self.offers.is_empty()
    }
}

/// Groups order lines by origin location, keeping the order of first appearance.
pub fn group_by_origin(lines: &[OrderLine]) -> Vec<(ShippingOrigin, Vec<&OrderLine>)> {
    let mut groups: Vec<(ShippingOrigin, Vec<&OrderLine>)> = Vec::new();
    for line in lines {
        match groups
            .iter_mut()
            .find(|(origin, _)| origin.location_id == line.origin.location_id)
        {
            Some((_, members)) => members.push(line),
            None => groups.push((line.origin.clone(), vec![line])),
        }
    }
    groups
}

/// Resolves, validates and normalizes the lines of one origin group.
fn prepare_items(origin: &ShippingOrigin, lines: &[&OrderLine]) -> Result<Vec<ItemToShip>, GroupError> {
    let items = lines
        .iter()
        .map(|line| {
            let item = line.to_item().ok_or_else(|| GroupError::Unresolved {
                order_line_id: line.id.clone(),
            })?;
            item.validate().map_err(|source| GroupError::InvalidItem {
                order_line_id: line.id.clone(),
                source,
            })?;
            Ok(item.normalized_for(&origin.address.country)?)
        })
        .collect::<Result<Vec<_>, GroupError>>()?;
    validate_unit_total(&items).map_err(GroupError::TooManyUnits)?;
    Ok(items)
}

async fn assemble_group(
    origin: ShippingOrigin,
    lines: Vec<&OrderLine>,
    destination: &Address,
    catalogs: &CatalogSet,
    provider: &dyn RateProvider,
    config: &RateShopConfig,
) -> ShipmentCandidate {
    let mut candidate = ShipmentCandidate::empty(origin, destination);

    let items = match prepare_items(&candidate.origin, &lines) {
        Ok(items) => items,
        Err(err) => {
            tracing::error!(location = %candidate.origin.location_id, error = %err, "origin group aborted");
            candidate.failure = Some(err.to_string());
            return candidate;
        }
    };

    let packing = pack_all_sources(&items, catalogs, &config.buffers);
    candidate.packing_failures = packing
        .failures()
        .map(|(source, err)| SourceFailure {
            source,
            reason: err.to_string(),
        })
        .collect();

    candidate.offers = shop_rates(
        &packing,
        &candidate.origin.address,
        destination,
        provider,
        config,
    )
    .await;

    if candidate.offers.is_empty() {
        tracing::warn!(location = %candidate.origin.location_id, "no shipping rate available");
    }
    candidate
}

/// Builds one shipment candidate per origin group.
///
/// Groups are processed concurrently and independently; a failing group yields
/// a candidate without offers instead of failing the whole call.
pub async fn assemble_shipments(
    lines: &[OrderLine],
    destination: &Address,
    catalogs: &CatalogSet,
    provider: &dyn RateProvider,
    config: &RateShopConfig,
) -> Vec<ShipmentCandidate> {
    let groups = group_by_origin(lines);
    let candidates = join_all(groups.into_iter().map(|(origin, members)| {
        assemble_group(origin, members, destination, catalogs, provider, config)
    }))
    .await;

    tracing::info!(
        groups = candidates.len(),
        offers = candidates.iter().map(|c| c.offers.len()).sum::<usize>(),
        "shipments assembled"
    );
    candidates
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::catalog::{BoxCatalog, BoxDefinition};
    use crate::geometry::Extent;
    use crate::model::{CustomsInfo, Dimensions, ForObject, Money, ProductRef, Weight};
    use crate::model::MAX_UNITS_PER_ITEM;
    use crate::rates::fakes::{FailingProvider, Reply, ScriptedProvider, StaticProvider, provider_quote};
    use crate::units::{LengthUnit, WeightUnit};

    fn address(country: &str) -> Address {
        Address {
            street1: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            country: country.to_string(),
            ..Address::default()
        }
    }

    fn line(id: &str, location: &str, country: &str) -> OrderLine {
        OrderLine {
            id: id.to_string(),
            for_object: ForObject::Resolved(ProductRef {
                id: format!("prod-{id}"),
                partition: "shop-1".to_string(),
            }),
            variant_id: Some(format!("sku-{id}")),
            name: format!("Item {id}"),
            quantity: 2,
            origin: ShippingOrigin {
                location_id: location.to_string(),
                address: address(country),
            },
            dimensions: Dimensions::new(10.0, 10.0, 10.0, LengthUnit::Cm),
            weight: Weight::new(1.0, WeightUnit::Kg),
            value: Money::new(2500, "eur"),
            customs: CustomsInfo::default(),
        }
    }

    fn catalogs() -> CatalogSet {
        let catalog = BoxCatalog::new(
            BoxSource::StandardCartons,
            vec![BoxDefinition::new("Carton", Extent::new(40.0, 40.0, 40.0), 20.0).unwrap()],
        )
        .unwrap();
        CatalogSet::new(vec![catalog]).unwrap()
    }

    /// UPS Express cartons hold one unit each, the standard carton holds many.
    fn two_source_catalogs() -> CatalogSet {
        let small = BoxCatalog::new(
            BoxSource::UpsExpress,
            vec![BoxDefinition::new("Small", Extent::new(12.0, 12.0, 12.0), 10.0).unwrap()],
        )
        .unwrap();
        let large = BoxCatalog::new(
            BoxSource::StandardCartons,
            vec![BoxDefinition::new("Carton", Extent::new(40.0, 40.0, 40.0), 20.0).unwrap()],
        )
        .unwrap();
        CatalogSet::new(vec![small, large]).unwrap()
    }

    fn provider() -> StaticProvider {
        StaticProvider::new(vec![provider_quote("dhl", "express", Decimal::new(1999, 2))])
    }

    #[test]
    fn groups_follow_first_appearance() {
        let lines = vec![
            line("1", "berlin", "DE"),
            line("2", "austin", "US"),
            line("3", "berlin", "DE"),
        ];
        let groups = group_by_origin(&lines);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.location_id, "berlin");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0.location_id, "austin");
    }

    #[tokio::test]
    async fn one_candidate_per_origin() {
        let lines = vec![
            line("1", "berlin", "DE"),
            line("2", "austin", "US"),
            line("3", "berlin", "DE"),
        ];
        let provider = provider();
        let candidates = assemble_shipments(
            &lines,
            &address("DE"),
            &catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].origin.location_id, "berlin");
        assert_eq!(candidates[1].origin.location_id, "austin");
        for candidate in &candidates {
            assert!(candidate.has_rates());
            assert!(candidate.failure.is_none());
            assert_eq!(
                candidate.offers.get("dhl|express").unwrap().quote.total,
                Money::new(1999, "USD")
            );
        }
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn items_are_expressed_in_origin_units() {
        let lines = vec![line("1", "austin", "US")];
        let provider = provider();
        let candidates = assemble_shipments(
            &lines,
            &address("US"),
            &catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        let offer = candidates[0].offers.get("dhl|express").unwrap();
        let packed = &offer.boxes[0].items[0];
        assert_eq!(packed.dimensions.unit, LengthUnit::In);
        assert_eq!(packed.weight.unit, WeightUnit::Lb);
        assert_eq!(packed.quantity, 2);
    }

    #[tokio::test]
    async fn unresolved_line_only_fails_its_group() {
        let mut unresolved = line("1", "berlin", "DE");
        unresolved.for_object = ForObject::Inherit;
        let lines = vec![unresolved, line("2", "austin", "US")];
        let provider = provider();

        let candidates = assemble_shipments(
            &lines,
            &address("DE"),
            &catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        assert_eq!(candidates.len(), 2);
        assert!(!candidates[0].has_rates());
        assert!(candidates[0].failure.as_deref().unwrap().contains("order line 1"));
        assert!(candidates[1].has_rates());
    }

    #[tokio::test]
    async fn unsupported_country_is_reported() {
        let lines = vec![line("1", "atlantis", "XX")];
        let provider = provider();
        let candidates = assemble_shipments(
            &lines,
            &address("DE"),
            &catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].has_rates());
        assert!(candidates[0].failure.is_some());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_provider_keeps_empty_candidate() {
        let lines = vec![line("1", "berlin", "DE")];
        let candidates = assemble_shipments(
            &lines,
            &address("FR"),
            &catalogs(),
            &FailingProvider,
            &RateShopConfig::default(),
        )
        .await;

        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].has_rates());
        assert!(candidates[0].failure.is_none());
    }

    #[tokio::test]
    async fn oversized_item_is_listed_as_packing_failure() {
        let mut bulky = line("1", "berlin", "DE");
        bulky.dimensions = Dimensions::new(100.0, 10.0, 10.0, LengthUnit::Cm);
        let provider = provider();

        let candidates = assemble_shipments(
            &[bulky],
            &address("DE"),
            &catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        assert!(!candidates[0].has_rates());
        assert_eq!(candidates[0].packing_failures.len(), 1);
        assert_eq!(candidates[0].packing_failures[0].source, BoxSource::StandardCartons);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn outage_for_one_box_source_keeps_the_rest() {
        // Two units: two UPS Express boxes or one standard carton
        let provider = ScriptedProvider::default()
            .on(2, Reply::Fail)
            .on(1, Reply::Quotes(vec![provider_quote("dhl", "express", Decimal::new(2450, 2))]));

        let candidates = assemble_shipments(
            &[line("1", "berlin", "DE")],
            &address("FR"),
            &two_source_catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].failure.is_none());
        assert!(candidates[0].packing_failures.is_empty());
        let offer = candidates[0].offers.get("dhl|express").unwrap();
        assert_eq!(offer.source, BoxSource::StandardCartons);
        assert_eq!(offer.quote.total, Money::new(2450, "USD"));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_box_source_keeps_the_rest() {
        let config = RateShopConfig {
            provider_timeout: std::time::Duration::from_millis(50),
            ..RateShopConfig::default()
        };
        let provider = ScriptedProvider::default()
            .on(2, Reply::Quotes(vec![provider_quote("ups", "saver", Decimal::new(1800, 2))]))
            .on(1, Reply::Hang);

        let candidates = assemble_shipments(
            &[line("1", "berlin", "DE")],
            &address("FR"),
            &two_source_catalogs(),
            &provider,
            &config,
        )
        .await;

        assert_eq!(candidates[0].offers.len(), 1);
        let offer = candidates[0].offers.get("ups|saver").unwrap();
        assert_eq!(offer.source, BoxSource::UpsExpress);
        assert_eq!(offer.boxes.len(), 2);
    }

    #[tokio::test]
    async fn excessive_quantities_fail_only_their_group() {
        let mut huge = line("1", "berlin", "DE");
        huge.quantity = u32::MAX;
        let crowded: Vec<OrderLine> = (0..11)
            .map(|n| {
                let mut many = line(&format!("c{n}"), "vienna", "AT");
                many.quantity = MAX_UNITS_PER_ITEM;
                many
            })
            .collect();
        let mut lines = vec![huge, line("2", "austin", "US")];
        lines.extend(crowded);
        let provider = provider();

        let candidates = assemble_shipments(
            &lines,
            &address("DE"),
            &catalogs(),
            &provider,
            &RateShopConfig::default(),
        )
        .await;

        assert_eq!(candidates.len(), 3);
        assert!(!candidates[0].has_rates());
        assert!(candidates[0].failure.as_deref().unwrap().contains("order line 1"));
        assert!(candidates[1].has_rates());
        assert!(!candidates[2].has_rates());
        assert!(candidates[2].failure.as_deref().unwrap().contains("too large"));
        assert_eq!(provider.calls(), vec![1]);
    }
}
