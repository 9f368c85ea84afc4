//! Packing and rate shopping for physical shipments.
//!
//! Order lines are grouped by origin, normalized into the origin's unit system,
//! packed against every box source and priced with an external rate provider.
//! The cheapest offer per carrier and service wins. After a label is bought the
//! finalized packing can be checked against the suggested one.

pub mod api;
pub mod catalog;
pub mod config;
pub mod deviation;
pub mod geometry;
pub mod model;
pub mod packer;
pub mod provider;
pub mod rates;
pub mod shipment;
pub mod units;
