pub mod contract;
pub mod metrics;
pub mod plan;
pub mod portfolio;
pub mod profile;
