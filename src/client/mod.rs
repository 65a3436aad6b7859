//! License server client.

pub mod http;

pub use http::{HttpLicenseServer, LicenseServer};
