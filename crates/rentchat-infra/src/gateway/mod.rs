//! Remote Reservation Gateway over HTTP.
//!
//! Reservation data comes from a REST API; chat traffic goes through an
//! ntfy-style pub/sub server that speaks newline-delimited JSON.

pub mod http;
pub mod ndjson;

pub use http::HttpReservationGateway;
