//! Maps loosely shaped webhook payloads onto destination contact schemas.

mod crm;
mod lookup;
mod marketing;
mod tags;

pub use crm::normalize_for_crm;
pub use marketing::{EmailLookup, MarketingSchema, PropertyMapping, normalize_for_marketing};
