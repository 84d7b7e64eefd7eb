//! A mock DNS server for test suites.
//!
//! Declare the records your code under test should see, start a
//! server on a fixed or OS-assigned UDP port, point the code under
//! test at it, and assert deterministically.  There is no recursion,
//! no forwarding, and no caching: every answer comes from the
//! declared dictionary, with a TTL of 1 second.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), mockdns::Error> {
//! let mut records = mockdns::Records::new();
//! records.host("example.com").a = vec!["1.2.3.4".into()];
//!
//! let server = mockdns::start_server(&records, 0, false).await?;
//! // resolve A example.com against 127.0.0.1:{server.port()} ...
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Owner names may be UTF-8 (stored in punycode form) or IP literals
//! (stored under their `in-addr.arpa` / `ip6.arpa` reverse names, for
//! PTR lookups).  In strict mode, a query that finds no record still
//! gets an empty NOERROR answer, and the miss is surfaced to the
//! hosting process via [`MockServer::stop`] and
//! [`MockServer::unmatched_queries`].

#![warn(clippy::pedantic)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod hostname;
pub mod protocol;
pub mod records;
pub mod registry;
pub mod server;

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::protocol::types::{DomainName, QueryType, RecordType};

pub use crate::records::{HostEntry, MxEntry, Records, SoaEntry, TTL};
pub use crate::registry::{running_servers, stop_running_servers};
pub use crate::server::MockServer;

/// The port served when the caller does not pick one.  Pass 0 to
/// request an OS-assigned ephemeral port instead.
pub const DEFAULT_PORT: u16 = 5300;

/// Build the record dictionary, bind a UDP socket on `127.0.0.1`, and
/// start serving.  The server is registered process-wide until
/// stopped.
///
/// With `exception_if_not_found`, queries that find no record are
/// recorded and surfaced when the server is stopped; the querying
/// client still receives an empty NOERROR response either way.
///
/// # Errors
///
/// Record build errors and socket bind errors; no server is
/// registered on failure.
pub async fn start_server(
    records: &Records,
    port: u16,
    exception_if_not_found: bool,
) -> Result<Arc<MockServer>, Error> {
    MockServer::start(records, port, exception_if_not_found).await
}

/// Everything that can go wrong building a dictionary, starting a
/// server, or (in strict mode) serving a query nobody declared.
#[derive(Debug)]
pub enum Error {
    /// A hostname contains a label that cannot be encoded.
    InvalidHostname { hostname: String },

    /// A hostname contains a label over 63 octets once encoded.
    LabelTooLong { label: String },

    /// An A / AAAA value or PTR owner is not a valid IP literal of
    /// the right family.
    InvalidIpAddress { address: String },

    /// A record value cannot be interpreted as its record type.
    InvalidRecordContext { value: String, rtype: RecordType },

    /// A query found no record and the server is strict.
    RecordNotFound { name: DomainName, qtype: QueryType },

    /// The UDP socket could not be bound.
    Bind(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidHostname { hostname } => {
                write!(f, "cannot interpret as hostname: {hostname}")
            }
            Error::LabelTooLong { label } => {
                write!(f, "hostname label is over 63 octets once encoded: {label}")
            }
            Error::InvalidIpAddress { address } => {
                write!(f, "cannot interpret as IP address: {address}")
            }
            Error::InvalidRecordContext { value, rtype } => {
                write!(
                    f,
                    "cannot interpret as DNS name: {value}. Invalid {rtype} record context"
                )
            }
            Error::RecordNotFound { name, qtype } => {
                write!(f, "no record found for query: {name} {qtype}")
            }
            Error::Bind(error) => {
                write!(f, "could not bind UDP socket: {error}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(error) => Some(error),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Error::InvalidHostname { hostname: a },
                Error::InvalidHostname { hostname: b },
            ) => a == b,
            (Error::LabelTooLong { label: a }, Error::LabelTooLong { label: b }) => a == b,
            (
                Error::InvalidIpAddress { address: a },
                Error::InvalidIpAddress { address: b },
            ) => a == b,
            (
                Error::InvalidRecordContext {
                    value: a,
                    rtype: a_rtype,
                },
                Error::InvalidRecordContext {
                    value: b,
                    rtype: b_rtype,
                },
            ) => a == b && a_rtype == b_rtype,
            (
                Error::RecordNotFound {
                    name: a,
                    qtype: a_qtype,
                },
                Error::RecordNotFound {
                    name: b,
                    qtype: b_qtype,
                },
            ) => a == b && a_qtype == b_qtype,
            (Error::Bind(a), Error::Bind(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}
