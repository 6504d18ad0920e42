//! Billing Engine library crate.
//!
//! This crate exposes the billing period calculation and finalization
//! engine and its API components as reusable modules.  External
//! applications may depend on the `billing_engine` crate and call into
//! [`engine::BillingEngine`] directly with their own store
//! implementations, or embed the API via `api::router`.

pub mod models;
pub mod error;
pub mod store;
pub mod memory;
pub mod aggregate;
pub mod rate;
pub mod finalize;
pub mod engine;
pub mod config;
pub mod api;

#[cfg(test)]
mod testutil;
