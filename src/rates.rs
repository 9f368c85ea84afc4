//! Rate shopping across box sources.
//!
//! Every box source that packed successfully is priced with one call to the
//! rate provider covering all of its boxes. The quotes of all sources are then
//! reduced to the cheapest offer per carrier/service pair, so different pairs
//! may end up with packings from different box sources.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::catalog::BoxSource;
use crate::geometry::Extent;
use crate::model::{Address, Money};
use crate::packer::{PackedBox, PackingConfig, PackingResult};

/// Package type code sent for boxes chosen by the packer.
pub const GENERIC_PACKAGE_CODE: &str = "custom_box";

/// Errors reported by a rate provider.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateProviderError {
    #[error("rate provider request failed: {0}")]
    Transport(String),
    #[error("rate provider answered with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode rate provider response: {0}")]
    Decode(String),
    #[error("rate provider did not answer within {0:?}")]
    Timeout(Duration),
    #[error("quote contains an unusable amount: {amount} {currency}")]
    InvalidAmount { amount: String, currency: String },
}

/// An amount as the provider reports it: decimal, native precision, any case currency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderMoney {
    pub amount: Decimal,
    pub currency: String,
}

/// One priced offer as returned by the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuote {
    pub carrier_code: String,
    pub service_code: String,
    #[serde(default)]
    pub service_name: Option<String>,
    pub shipping: ProviderMoney,
    #[serde(default)]
    pub insurance: Option<ProviderMoney>,
    #[serde(default)]
    pub tax: Option<ProviderMoney>,
    pub total: ProviderMoney,
    #[serde(default)]
    pub delivery_days: Option<u32>,
    #[serde(default)]
    pub estimated_delivery_date: Option<String>,
}

/// A carrier quote with every amount in minor units and upper-case currency codes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RateQuote {
    pub carrier_code: String,
    pub service_code: String,
    pub service_name: Option<String>,
    pub shipping: Money,
    pub insurance: Option<Money>,
    pub tax: Option<Money>,
    pub total: Money,
    pub delivery_days: Option<u32>,
    pub estimated_delivery_date: Option<String>,
}

impl RateQuote {
    /// Converts a provider quote into minor units.
    pub fn from_provider(quote: ProviderQuote) -> Result<Self, RateProviderError> {
        Ok(Self {
            shipping: to_minor_units(&quote.shipping)?,
            insurance: quote.insurance.as_ref().map(to_minor_units).transpose()?,
            tax: quote.tax.as_ref().map(to_minor_units).transpose()?,
            total: to_minor_units(&quote.total)?,
            carrier_code: quote.carrier_code,
            service_code: quote.service_code,
            service_name: quote.service_name,
            delivery_days: quote.delivery_days,
            estimated_delivery_date: quote.estimated_delivery_date,
        })
    }

    /// Key of the cheapest-offer table: `carrier_code|service_code`.
    pub fn key(&self) -> String {
        format!("{}|{}", self.carrier_code, self.service_code)
    }
}

/// Number of decimal places of an ISO 4217 currency.
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "UYI" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

/// Converts a provider amount into integer minor units, rounding half away from zero.
pub fn to_minor_units(money: &ProviderMoney) -> Result<Money, RateProviderError> {
    let currency = money.currency.trim().to_ascii_uppercase();
    let factor = Decimal::from(10_i64.pow(minor_unit_exponent(&currency)));

    money
        .amount
        .checked_mul(factor)
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_i64())
        .map(|amount| Money {
            amount,
            currency: currency.clone(),
        })
        .ok_or_else(|| RateProviderError::InvalidAmount {
            amount: money.amount.to_string(),
            currency,
        })
}

/// One line of a package's content manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub sku: String,
    pub description: String,
    pub quantity: u32,
    /// Declared value per unit
    pub value: Money,
    pub country_of_origin: Option<String>,
    pub country_of_manufacture: Option<String>,
    pub hs_code: Option<String>,
}

/// A physical package as the rate provider sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub package_code: String,
    pub weight_kg: f64,
    pub dimensions_cm: Extent,
    pub items: Vec<ManifestItem>,
}

impl Package {
    /// Declares a packed box, scaled by the packing buffers.
    ///
    /// Dimensions are the box interior times the volume buffer; the weight is
    /// the packed weight divided by the weight buffer.
    pub fn from_packed(packed: &PackedBox, config: &PackingConfig) -> Self {
        let weight_kg = if config.weight_buffer > 0.0 {
            packed.used_weight / config.weight_buffer
        } else {
            packed.used_weight
        };

        Self {
            package_code: GENERIC_PACKAGE_CODE.to_string(),
            weight_kg,
            dimensions_cm: packed.definition.dimensions.scaled(config.volume_buffer),
            items: packed
                .items
                .iter()
                .map(|item| ManifestItem {
                    sku: item.sku().to_string(),
                    description: item.name.clone(),
                    quantity: item.quantity,
                    value: item.value.clone(),
                    country_of_origin: item.customs.country_of_origin.clone(),
                    country_of_manufacture: item.customs.country_of_manufacture.clone(),
                    hs_code: item.customs.hs_code.clone(),
                })
                .collect(),
        }
    }
}

/// The rate-provider collaborator.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Prices one set of packages travelling together from `from` to `to`.
    async fn get_estimate(
        &self,
        from: &Address,
        to: &Address,
        packages: &[Package],
    ) -> Result<Vec<ProviderQuote>, RateProviderError>;
}

/// A quote together with the packing it was priced against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricedOffer {
    pub quote: RateQuote,
    pub source: BoxSource,
    pub boxes: Vec<PackedBox>,
}

impl PricedOffer {
    /// Total ordering used by the reduction: price, then box source, then box count.
    ///
    /// Offers in different currencies never beat each other.
    fn beats(&self, other: &PricedOffer) -> bool {
        self.quote.total.currency == other.quote.total.currency
            && (self.quote.total.amount, self.source, self.boxes.len())
                < (other.quote.total.amount, other.source, other.boxes.len())
    }
}

/// Cheapest offer per `carrier_code|service_code` across all box sources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheapestOffers {
    pub offers: BTreeMap<String, PricedOffer>,
}

impl CheapestOffers {
    /// Currency of the offer held under the same key, if it differs from `offer`'s.
    pub fn conflicting_currency(&self, offer: &PricedOffer) -> Option<&str> {
        self.offers
            .get(&offer.quote.key())
            .map(|current| current.quote.total.currency.as_str())
            .filter(|held| *held != offer.quote.total.currency)
    }

    /// Keeps `offer` if its key is new or it undercuts the offer held so far.
    ///
    /// An offer in another currency than the held one is never kept.
    pub fn consider(&mut self, offer: PricedOffer) -> bool {
        let key = offer.quote.key();
        match self.offers.get(&key) {
            Some(current) if !offer.beats(current) => false,
            _ => {
                self.offers.insert(key, offer);
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&PricedOffer> {
        self.offers.get(key)
    }

    /// The cheapest offer in `currency` over all carrier/service pairs.
    pub fn cheapest(&self, currency: &str) -> Option<&PricedOffer> {
        self.offers
            .values()
            .filter(|offer| offer.quote.total.currency.eq_ignore_ascii_case(currency))
            .fold(None, |best, offer| match best {
                Some(current) if !offer.beats(current) => Some(current),
                _ => Some(offer),
            })
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

/// Reduces any number of offers to the cheapest per carrier/service pair.
pub fn reduce_cheapest(offers: impl IntoIterator<Item = PricedOffer>) -> CheapestOffers {
    let mut table = CheapestOffers::default();
    for offer in offers {
        table.consider(offer);
    }
    table
}

/// Settings of one rate-shopping pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateShopConfig {
    pub buffers: PackingConfig,
    pub provider_timeout: Duration,
}

impl RateShopConfig {
    pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);
}

impl Default for RateShopConfig {
    fn default() -> Self {
        Self {
            buffers: PackingConfig::default(),
            provider_timeout: Self::DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

/// Prices every successful box source and keeps the cheapest offer per carrier/service.
///
/// Sources are priced concurrently, one provider call each. A provider error or
/// timeout excludes only the affected source.
pub async fn shop_rates(
    packing: &PackingResult,
    from: &Address,
    to: &Address,
    provider: &dyn RateProvider,
    config: &RateShopConfig,
) -> CheapestOffers {
    let requests = packing.successful().map(|(source, boxes)| async move {
        let packages: Vec<Package> = boxes
            .iter()
            .map(|packed| Package::from_packed(packed, &config.buffers))
            .collect();
        let outcome = tokio::time::timeout(
            config.provider_timeout,
            provider.get_estimate(from, to, &packages),
        )
        .await
        .unwrap_or(Err(RateProviderError::Timeout(config.provider_timeout)));
        (source, boxes, outcome)
    });

    let mut offers = CheapestOffers::default();
    for (source, boxes, outcome) in join_all(requests).await {
        let quotes = match outcome {
            Ok(quotes) => quotes,
            Err(err) => {
                tracing::warn!(source = %source, error = %err, "excluding box source from rate shopping");
                continue;
            }
        };

        tracing::debug!(source = %source, quotes = quotes.len(), "received quotes");
        for quote in quotes {
            match RateQuote::from_provider(quote) {
                Ok(quote) => {
                    let offer = PricedOffer {
                        quote,
                        source,
                        boxes: boxes.clone(),
                    };
                    if let Some(held) = offers.conflicting_currency(&offer) {
                        tracing::warn!(
                            source = %source,
                            key = %offer.quote.key(),
                            held = %held,
                            offered = %offer.quote.total.currency,
                            "skipping quote in a different currency"
                        );
                        continue;
                    }
                    offers.consider(offer);
                }
                Err(err) => tracing::warn!(source = %source, error = %err, "skipping quote"),
            }
        }
    }

    offers
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    /// Provider returning the same quotes for every request.
    pub struct StaticProvider {
        pub quotes: Vec<ProviderQuote>,
        pub calls: Mutex<Vec<usize>>,
    }

    impl StaticProvider {
        pub fn new(quotes: Vec<ProviderQuote>) -> Self {
            Self {
                quotes,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Number of packages seen per call.
        pub fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RateProvider for StaticProvider {
        async fn get_estimate(
            &self,
            _from: &Address,
            _to: &Address,
            packages: &[Package],
        ) -> Result<Vec<ProviderQuote>, RateProviderError> {
            self.calls.lock().unwrap().push(packages.len());
            Ok(self.quotes.clone())
        }
    }

    /// Provider pricing by package count: each package costs `per_package`.
    pub struct PerPackageProvider {
        pub per_package: Decimal,
    }

    #[async_trait]
    impl RateProvider for PerPackageProvider {
        async fn get_estimate(
            &self,
            _from: &Address,
            _to: &Address,
            packages: &[Package],
        ) -> Result<Vec<ProviderQuote>, RateProviderError> {
            let total = self.per_package * Decimal::from(packages.len() as i64);
            Ok(vec![provider_quote("ups", "ground", total)])
        }
    }

    /// Provider that always fails.
    pub struct FailingProvider;

    #[async_trait]
    impl RateProvider for FailingProvider {
        async fn get_estimate(
            &self,
            _from: &Address,
            _to: &Address,
            _packages: &[Package],
        ) -> Result<Vec<ProviderQuote>, RateProviderError> {
            Err(RateProviderError::Status {
                status: 503,
                body: "carrier unavailable".to_string(),
            })
        }
    }

    /// Provider that never answers in time.
    pub struct SlowProvider;

    #[async_trait]
    impl RateProvider for SlowProvider {
        async fn get_estimate(
            &self,
            _from: &Address,
            _to: &Address,
            _packages: &[Package],
        ) -> Result<Vec<ProviderQuote>, RateProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    /// What a `ScriptedProvider` does for one package count.
    #[derive(Clone)]
    pub enum Reply {
        Quotes(Vec<ProviderQuote>),
        Fail,
        Hang,
    }

    /// Provider whose answer depends on how many packages it is asked to price.
    ///
    /// Box sources usually differ in package count, so this can fail one source
    /// while another succeeds. Unscripted counts fail.
    #[derive(Default)]
    pub struct ScriptedProvider {
        replies: Vec<(usize, Reply)>,
    }

    impl ScriptedProvider {
        pub fn on(mut self, packages: usize, reply: Reply) -> Self {
            self.replies.push((packages, reply));
            self
        }
    }

    #[async_trait]
    impl RateProvider for ScriptedProvider {
        async fn get_estimate(
            &self,
            _from: &Address,
            _to: &Address,
            packages: &[Package],
        ) -> Result<Vec<ProviderQuote>, RateProviderError> {
            let reply = self
                .replies
                .iter()
                .find(|(count, _)| *count == packages.len())
                .map(|(_, reply)| reply.clone())
                .unwrap_or(Reply::Fail);
            match reply {
                Reply::Quotes(quotes) => Ok(quotes),
                Reply::Fail => Err(RateProviderError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn provider_quote(carrier: &str, service: &str, total: Decimal) -> ProviderQuote {
        provider_quote_in(carrier, service, total, "usd")
    }

    pub fn provider_quote_in(
        carrier: &str,
        service: &str,
        total: Decimal,
        currency: &str,
    ) -> ProviderQuote {
        ProviderQuote {
            carrier_code: carrier.to_string(),
            service_code: service.to_string(),
            service_name: None,
            shipping: ProviderMoney {
                amount: total,
                currency: currency.to_string(),
            },
            insurance: None,
            tax: None,
            total: ProviderMoney {
                amount: total,
                currency: currency.to_string(),
            },
            delivery_days: Some(3),
            estimated_delivery_date: None,
        }
    }
}
