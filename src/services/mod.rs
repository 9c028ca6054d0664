//! Airtable API service implementations.

mod table;

pub use table::*;
