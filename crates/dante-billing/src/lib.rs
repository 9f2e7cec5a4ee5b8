//! Client for the metering service that debits a renter's balance while a
//! task holds one of this provider's GPUs.

mod config;
pub use config::BillingConfig;

mod error;
pub use error::BillingError;

mod types;
pub use types::{SessionEnd, SessionStatus, UsageSample};

mod client;
pub use client::{BillingApi, BillingClient, NoopBilling};
