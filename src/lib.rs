//! Query-analytics profiles: ranked query classes and their sparklines over
//! pre-aggregated metric buckets.

mod bucket;
mod config;
mod error;
mod filter;
mod memory;
mod profile;
mod query;
mod scope;
mod stats;
mod store;
mod window;

#[cfg(test)]
mod fixtures;

pub use bucket::*;
pub use config::*;
pub use error::*;
pub use filter::*;
pub use memory::*;
pub use profile::*;
pub use query::*;
pub use scope::*;
pub use stats::*;
pub use store::*;
pub use window::*;
