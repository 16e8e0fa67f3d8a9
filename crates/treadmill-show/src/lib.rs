//! Treadmill state inspection
//!
//! Client side of the cell state API:
//! - Failover across the cell's state API instances
//! - Endpoint queries and table output

pub mod endpoints;
pub mod error;
pub mod restclient;

pub use endpoints::{fetch_endpoints, print_endpoints, EndpointQuery, EndpointRecord, Port};
pub use error::{ShowError, ShowResult};
