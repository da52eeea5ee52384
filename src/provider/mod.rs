//! Provider core.
//!
//! - [`Resource`] and [`DataSource`]: the CRUD and read contracts every
//!   type implements
//! - [`Provider`]: the registry of types and the provider settings schema
//! - [`ProviderConfiguration`]: the configured client handed to every call

mod configure;
mod registry;
mod resource;
#[cfg(test)]
pub(crate) mod testing;

pub use configure::{validate_api_url, ProviderConfiguration, ResolvedSettings};
pub use registry::Provider;
pub use resource::{DataSource, Resource};
