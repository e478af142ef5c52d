#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod api;
pub mod broker;
pub mod config;
pub mod db;
pub mod drinks;
pub mod error;
pub mod events;
pub mod invite;
pub mod ledger;
pub mod models;
pub mod publisher;
pub mod reconciler;
pub mod schema;
pub mod session;

#[cfg(test)]
mod testing;
