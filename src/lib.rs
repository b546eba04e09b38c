pub mod cache;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod server;
pub mod services;
pub mod web;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{CatalogError, ErrorKind};
