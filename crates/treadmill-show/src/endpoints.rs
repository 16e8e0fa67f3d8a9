//! Endpoint listing
//!
//! Queries `/endpoint/<pattern>[/<proto>/<endpoint>]` and prints the
//! result as a table.

use std::fmt;
use std::io::{self, Write};

use reqwest::Client;
use serde::Deserialize;
use tabwriter::TabWriter;

use crate::error::ShowResult;
use crate::restclient;

pub const DEFAULT_PROTO: &str = "tcp";

/// Which endpoints to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointQuery {
    /// App name pattern, e.g. `proid.app*`
    pub pattern: String,
    pub endpoint: Option<String>,
    /// Only used together with `endpoint`
    pub proto: String,
}

impl EndpointQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            endpoint: None,
            proto: DEFAULT_PROTO.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, proto: Option<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        if let Some(proto) = proto {
            self.proto = proto;
        }
        self
    }

    pub fn path_segments(&self) -> Vec<&str> {
        match &self.endpoint {
            Some(endpoint) => vec![
                "endpoint",
                self.pattern.as_str(),
                self.proto.as_str(),
                endpoint.as_str(),
            ],
            None => vec!["endpoint", self.pattern.as_str()],
        }
    }
}

/// The state API reports ports either as strings or as numbers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Port {
    Number(u64),
    Text(String),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Number(n) => write!(f, "{}", n),
            Port::Text(s) => f.write_str(s),
        }
    }
}

/// One running endpoint as reported by the state API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointRecord {
    /// Instance name, e.g. `proid.app#0000000012`
    pub name: String,
    pub endpoint: String,
    pub proto: String,
    pub host: String,
    pub port: Port,
}

impl EndpointRecord {
    pub fn hostport(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub async fn fetch_endpoints(
    client: &Client,
    apis: &[String],
    query: &EndpointQuery,
) -> ShowResult<Vec<EndpointRecord>> {
    restclient::get(client, apis, &query.path_segments()).await
}

/// Print `records` as an aligned table
pub fn print_endpoints_into(writer: &mut impl Write, records: &[EndpointRecord]) -> io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "name\tproto\tendpoint\thostport")?;
    for record in records {
        writeln!(
            t,
            "{}\t{}\t{}\t{}",
            record.name,
            record.proto,
            record.endpoint,
            record.hostport()
        )?;
    }
    t.flush()
}

pub fn print_endpoints(records: &[EndpointRecord]) -> io::Result<()> {
    print_endpoints_into(&mut io::stdout(), records)
}
