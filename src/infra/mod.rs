//! Concrete clients for external catalogs.

pub mod hdx;
