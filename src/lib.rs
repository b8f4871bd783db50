pub mod adapters;
pub mod api;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod effects;
pub mod error;
pub mod ledger;
pub mod reconcile;
pub mod server;
pub mod settlement;

#[cfg(test)]
mod testing;
