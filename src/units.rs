//! Unit conversion and origin-country normalization.
//!
//! Items arrive with whatever unit of measure the merchant catalog used. Before
//! packing, each dimension and weight is converted into the unit system used at
//! the shipping origin (imperial for a handful of countries, metric everywhere
//! else) and clamped up to a minimum measurable value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Smallest distance that is still measured: 1 cm.
pub const MIN_DISTANCE_CM: f64 = 1.0;
/// Smallest weight that is still measured: 0.1 kg.
pub const MIN_WEIGHT_KG: f64 = 0.1;

/// Countries shipping in inches and pounds.
const IMPERIAL_COUNTRIES: &[&str] = &["US", "LR", "MM"];

/// Countries shipping in centimetres and kilograms.
const METRIC_COUNTRIES: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX",
    "AZ", "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ",
    "BR", "BS", "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK",
    "CL", "CM", "CN", "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM",
    "DO", "DZ", "EC", "EE", "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR",
    "GA", "GB", "GD", "GE", "GF", "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS",
    "GT", "GU", "GW", "GY", "HK", "HM", "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN",
    "IO", "IQ", "IR", "IS", "IT", "JE", "JM", "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN",
    "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC", "LI", "LK", "LS", "LT", "LU", "LV", "LY",
    "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK", "ML", "MN", "MO", "MP", "MQ", "MR", "MS",
    "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA", "NC", "NE", "NF", "NG", "NI", "NL", "NO",
    "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG", "PH", "PK", "PL", "PM", "PN", "PR",
    "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW", "SA", "SB", "SC", "SD", "SE",
    "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS", "ST", "SV", "SX", "SY",
    "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO", "TR", "TT", "TV",
    "TW", "TZ", "UA", "UG", "UM", "UY", "UZ", "VA", "VC", "VE", "VG", "VI", "VN", "VU", "WF",
    "WS", "XK", "YE", "YT", "ZA", "ZM", "ZW",
];

/// Errors raised while converting or normalizing units.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("unsupported country for unit normalization: {0}")]
    UnsupportedCountry(String),
    #[error("unsupported measurement kind: {0}")]
    UnsupportedKind(String),
    #[error("unknown unit of measure: {0}")]
    UnknownUnit(String),
}

/// What is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Distance,
    Weight,
}

impl FromStr for UnitKind {
    type Err = UnitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "distance" => Ok(UnitKind::Distance),
            "weight" => Ok(UnitKind::Weight),
            _ => Err(UnitError::UnsupportedKind(raw.to_string())),
        }
    }
}

/// The two unit systems a shipping origin can use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitSystem {
    Metric,
    Imperial,
}

impl UnitSystem {
    /// Looks up the unit system of an ISO 3166-1 alpha-2 country code.
    ///
    /// Lengths and weights of a country always share one system.
    pub fn for_country(country: &str) -> Result<Self, UnitError> {
        let code = country.trim().to_ascii_uppercase();
        if IMPERIAL_COUNTRIES.contains(&code.as_str()) {
            Ok(UnitSystem::Imperial)
        } else if METRIC_COUNTRIES.contains(&code.as_str()) {
            Ok(UnitSystem::Metric)
        } else {
            Err(UnitError::UnsupportedCountry(country.to_string()))
        }
    }

    pub fn length_unit(&self) -> LengthUnit {
        match self {
            UnitSystem::Metric => LengthUnit::Cm,
            UnitSystem::Imperial => LengthUnit::In,
        }
    }

    pub fn weight_unit(&self) -> WeightUnit {
        match self {
            UnitSystem::Metric => WeightUnit::Kg,
            UnitSystem::Imperial => WeightUnit::Lb,
        }
    }
}

/// Supported length units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    Mm,
    Cm,
    M,
    In,
    Ft,
}

impl LengthUnit {
    /// Millimetres per unit.
    fn millimetres(&self) -> f64 {
        match self {
            LengthUnit::Mm => 1.0,
            LengthUnit::Cm => 10.0,
            LengthUnit::M => 1000.0,
            LengthUnit::In => 25.4,
            LengthUnit::Ft => 304.8,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LengthUnit::Mm => "mm",
            LengthUnit::Cm => "cm",
            LengthUnit::M => "m",
            LengthUnit::In => "in",
            LengthUnit::Ft => "ft",
        }
    }

    /// Converts `amount` from this unit into `target`.
    pub fn convert(&self, amount: f64, target: LengthUnit) -> f64 {
        if *self == target {
            return amount;
        }
        amount * self.millimetres() / target.millimetres()
    }
}

impl FromStr for LengthUnit {
    type Err = UnitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mm" => Ok(LengthUnit::Mm),
            "cm" => Ok(LengthUnit::Cm),
            "m" => Ok(LengthUnit::M),
            "in" | "inch" | "inches" => Ok(LengthUnit::In),
            "ft" | "foot" | "feet" => Ok(LengthUnit::Ft),
            _ => Err(UnitError::UnknownUnit(raw.to_string())),
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Supported weight units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    G,
    Kg,
    Oz,
    Lb,
}

impl WeightUnit {
    /// Grams per unit.
    fn grams(&self) -> f64 {
        match self {
            WeightUnit::G => 1.0,
            WeightUnit::Kg => 1000.0,
            WeightUnit::Oz => 28.349_523_125,
            WeightUnit::Lb => 453.592_37,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            WeightUnit::G => "g",
            WeightUnit::Kg => "kg",
            WeightUnit::Oz => "oz",
            WeightUnit::Lb => "lb",
        }
    }

    /// Converts `amount` from this unit into `target`.
    pub fn convert(&self, amount: f64, target: WeightUnit) -> f64 {
        if *self == target {
            return amount;
        }
        amount * self.grams() / target.grams()
    }
}

impl FromStr for WeightUnit {
    type Err = UnitError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "g" => Ok(WeightUnit::G),
            "kg" => Ok(WeightUnit::Kg),
            "oz" => Ok(WeightUnit::Oz),
            "lb" | "lbs" => Ok(WeightUnit::Lb),
            _ => Err(UnitError::UnknownUnit(raw.to_string())),
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A normalized amount together with the unit it is now expressed in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Measurement {
    pub amount: f64,
    pub unit: String,
}

/// Converts a length into the origin country's unit, clamped to at least 1 cm.
pub fn normalize_length(
    amount: f64,
    from: LengthUnit,
    country: &str,
) -> Result<(f64, LengthUnit), UnitError> {
    let target = UnitSystem::for_country(country)?.length_unit();
    let floor = LengthUnit::Cm.convert(MIN_DISTANCE_CM, target);
    Ok((from.convert(amount, target).max(floor), target))
}

/// Converts a weight into the origin country's unit, clamped to at least 0.1 kg.
pub fn normalize_weight(
    amount: f64,
    from: WeightUnit,
    country: &str,
) -> Result<(f64, WeightUnit), UnitError> {
    let target = UnitSystem::for_country(country)?.weight_unit();
    let floor = WeightUnit::Kg.convert(MIN_WEIGHT_KG, target);
    Ok((from.convert(amount, target).max(floor), target))
}

/// Normalizes a raw measurement for the given origin country.
///
/// `kind` is either `"distance"` or `"weight"`; the floor is applied after the
/// conversion, in the target unit.
///
/// # Examples
/// ```
/// use ship_it_now::units::normalize;
///
/// let lb = normalize(0.2, "kg", "US", "weight").unwrap();
/// assert_eq!(lb.unit, "lb");
/// assert!((lb.amount - 0.440_924).abs() < 1e-5);
/// ```
pub fn normalize(
    amount: f64,
    from_unit: &str,
    country: &str,
    kind: &str,
) -> Result<Measurement, UnitError> {
    match kind.parse::<UnitKind>()? {
        UnitKind::Distance => {
            let from = from_unit.parse::<LengthUnit>()?;
            let (amount, unit) = normalize_length(amount, from, country)?;
            Ok(Measurement {
                amount,
                unit: unit.code().to_string(),
            })
        }
        UnitKind::Weight => {
            let from = from_unit.parse::<WeightUnit>()?;
            let (amount, unit) = normalize_weight(amount, from, country)?;
            Ok(Measurement {
                amount,
                unit: unit.code().to_string(),
            })
        }
    }
}
