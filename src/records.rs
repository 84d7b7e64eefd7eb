//! The record dictionary.
//!
//! Loose, declarative input (`Records`) is walked by the
//! `RecordSet` builder, which normalizes owner names, dispatches each
//! value to the factory for its record type, and produces the
//! immutable owner-and-type-keyed map the query handler consults.  The build fails on the first bad value; a partial
//! dictionary is never observable.

use serde::Deserialize;
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::hostname;
use crate::protocol::types::{
    DomainName, RecordClass, RecordType, RecordTypeWithData, ResourceRecord,
};
use crate::Error;

/// TTL of every served record.  Tests want freshness, not caching.
pub const TTL: u32 = 1;

/// The user-supplied record declarations: a mapping from owner name
/// (hostname, UTF-8 hostname, or IP literal) to the records served
/// under it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Records {
    pub hosts: HashMap<String, HostEntry>,
}

impl Records {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// The entry for an owner name, created empty if absent.
    pub fn host(&mut self, owner: &str) -> &mut HostEntry {
        self.hosts.entry(owner.to_string()).or_default()
    }
}

/// The declarations for a single owner name.  Lists are served in
/// declaration order; CNAME and SOA are scalar because only a single
/// record of those types makes sense for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostEntry {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub cname: Option<String>,
    pub mx: Vec<MxEntry>,
    pub ns: Vec<String>,
    pub ptr: Vec<String>,
    pub soa: Option<SoaEntry>,
    pub txt: Vec<String>,
}

/// One MX declaration: either the `"exchange"` /
/// `"exchange:preference"` shorthand, or the two fields spelled out.
/// `".:0"` declares the RFC 7505 null MX.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MxEntry {
    Shorthand(String),
    Full { preference: u16, exchange: String },
}

impl From<&str> for MxEntry {
    fn from(s: &str) -> Self {
        MxEntry::Shorthand(s.to_string())
    }
}

/// One SOA declaration.  All seven fields are required.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoaEntry {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// The built dictionary: every stored owner name is in lowercase
/// ASCII-compatible form (IP-literal owners under their reverse
/// name), so lookups are plain map reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    records: HashMap<DomainName, HashMap<RecordType, Vec<ResourceRecord>>>,
}

impl RecordSet {
    /// Walk the declarations and build the dictionary.
    ///
    /// # Errors
    ///
    /// The first factory failure aborts the build.
    pub fn build(records: &Records) -> Result<Self, Error> {
        let mut set = Self::default();

        for (owner, entry) in &records.hosts {
            let name = if hostname::is_ip_literal(owner) {
                hostname::reverse_literal(owner)?
            } else {
                hostname::domain(owner)?
            };
            set.insert_host(&name, entry)?;
        }

        Ok(set)
    }

    fn insert_host(&mut self, name: &DomainName, entry: &HostEntry) -> Result<(), Error> {
        for value in &entry.a {
            self.push(name, a_record(value)?);
        }
        for value in &entry.aaaa {
            self.push(name, aaaa_record(value)?);
        }
        if let Some(value) = &entry.cname {
            self.push(name, cname_record(value)?);
        }
        for (position, value) in entry.mx.iter().enumerate() {
            self.push(name, mx_record(value, position)?);
        }
        for value in &entry.ns {
            self.push(name, ns_record(value)?);
        }
        for value in &entry.ptr {
            self.push(name, ptr_record(value)?);
        }
        if let Some(value) = &entry.soa {
            self.push(name, soa_record(value)?);
        }
        for value in &entry.txt {
            self.push(name, txt_record(value)?);
        }

        Ok(())
    }

    fn push(&mut self, name: &DomainName, rtype_with_data: RecordTypeWithData) {
        let rtype = rtype_with_data.rtype();
        self.records
            .entry(name.clone())
            .or_default()
            .entry(rtype)
            .or_default()
            .push(ResourceRecord {
                name: name.clone(),
                rtype_with_data,
                rclass: RecordClass::IN,
                ttl: TTL,
            });
    }

    /// The records for `(name, rtype)`, in declaration order.
    pub fn get(&self, name: &DomainName, rtype: RecordType) -> Option<&[ResourceRecord]> {
        self.records
            .get(name)
            .and_then(|by_type| by_type.get(&rtype))
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn a_record(value: &str) -> Result<RecordTypeWithData, Error> {
    match Ipv4Addr::from_str(value) {
        Ok(address) => Ok(RecordTypeWithData::A { address }),
        Err(_) => Err(Error::InvalidIpAddress {
            address: value.to_string(),
        }),
    }
}

fn aaaa_record(value: &str) -> Result<RecordTypeWithData, Error> {
    match Ipv6Addr::from_str(value) {
        Ok(address) => Ok(RecordTypeWithData::AAAA { address }),
        Err(_) => Err(Error::InvalidIpAddress {
            address: value.to_string(),
        }),
    }
}

fn cname_record(value: &str) -> Result<RecordTypeWithData, Error> {
    Ok(RecordTypeWithData::CNAME {
        cname: name_in_context(value, RecordType::CNAME)?,
    })
}

fn ns_record(value: &str) -> Result<RecordTypeWithData, Error> {
    Ok(RecordTypeWithData::NS {
        nsdname: name_in_context(value, RecordType::NS)?,
    })
}

fn ptr_record(value: &str) -> Result<RecordTypeWithData, Error> {
    Ok(RecordTypeWithData::PTR {
        ptrdname: name_in_context(value, RecordType::PTR)?,
    })
}

/// MX values carry their list position so implicit preferences can be
/// assigned: `10 × (position + 1)`.  An explicit preference overrides
/// its own position only.
fn mx_record(value: &MxEntry, position: usize) -> Result<RecordTypeWithData, Error> {
    let (preference, exchange) = match value {
        MxEntry::Full {
            preference,
            exchange,
        } => (*preference, exchange.as_str()),
        MxEntry::Shorthand(s) => match s.rsplit_once(':') {
            Some((exchange, preference)) => {
                let preference = preference.parse::<u16>().map_err(|_| {
                    Error::InvalidRecordContext {
                        value: s.clone(),
                        rtype: RecordType::MX,
                    }
                })?;
                (preference, exchange)
            }
            None => (auto_preference(s, position)?, s.as_str()),
        },
    };

    Ok(RecordTypeWithData::MX {
        preference,
        exchange: name_in_context(exchange, RecordType::MX)?,
    })
}

fn auto_preference(value: &str, position: usize) -> Result<u16, Error> {
    u16::try_from(10 * (position + 1)).map_err(|_| Error::InvalidRecordContext {
        value: value.to_string(),
        rtype: RecordType::MX,
    })
}

fn soa_record(value: &SoaEntry) -> Result<RecordTypeWithData, Error> {
    Ok(RecordTypeWithData::SOA {
        mname: name_in_context(&value.mname, RecordType::SOA)?,
        rname: name_in_context(&value.rname, RecordType::SOA)?,
        serial: value.serial,
        refresh: value.refresh,
        retry: value.retry,
        expire: value.expire,
        minimum: value.minimum,
    })
}

fn txt_record(value: &str) -> Result<RecordTypeWithData, Error> {
    if value.len() > 255 {
        return Err(Error::InvalidRecordContext {
            value: value.to_string(),
            rtype: RecordType::TXT,
        });
    }

    Ok(RecordTypeWithData::TXT {
        content: value.as_bytes().to_vec(),
    })
}

/// Normalize a domain-name value, wrapping failures with the record
/// type being built so the surfaced error names its context.
fn name_in_context(value: &str, rtype: RecordType) -> Result<DomainName, Error> {
    hostname::domain(value).map_err(|_| Error::InvalidRecordContext {
        value: value.to_string(),
        rtype,
    })
}
