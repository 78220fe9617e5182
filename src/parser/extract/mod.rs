//! Category extractors. Each one owns its selector cascade and its facts type.

pub mod portfolio;
pub mod price;
pub mod pricing;
pub mod services;
