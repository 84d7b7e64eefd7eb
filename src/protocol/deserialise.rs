//! Deserialisation of DNS messages from the network.  See the `types`
//! module for details of the format.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        Self::decode(&mut Decoder::over(octets))
    }

    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn decode(dec: &mut Decoder) -> Result<Self, Error> {
        let id = dec.u16().ok_or(Error::NoId)?;
        let flags = dec.u16().ok_or(Error::HeaderTooShort(id))?;
        let header = Header::unpack(id, flags);

        let mut counts = [0_u16; 4];
        for count in &mut counts {
            *count = dec.u16().ok_or(Error::HeaderTooShort(id))?;
        }
        let [qdcount, ancount, nscount, arcount] = counts;

        let questions = (0..qdcount)
            .map(|_| Question::decode(id, dec))
            .collect::<Result<_, _>>()?;
        let answers = (0..ancount)
            .map(|_| ResourceRecord::decode(id, dec))
            .collect::<Result<_, _>>()?;
        let authority = (0..nscount)
            .map(|_| ResourceRecord::decode(id, dec))
            .collect::<Result<_, _>>()?;
        let additional = (0..arcount)
            .map(|_| ResourceRecord::decode(id, dec))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn decode(id: u16, dec: &mut Decoder) -> Result<Self, Error> {
        let name = DomainName::decode(id, dec)?;
        let short = Error::QuestionTooShort(id);

        Ok(Self {
            name,
            qtype: dec.u16().ok_or(short)?.into(),
            qclass: dec.u16().ok_or(short)?.into(),
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn decode(id: u16, dec: &mut Decoder) -> Result<Self, Error> {
        let name = DomainName::decode(id, dec)?;
        let short = Error::ResourceRecordTooShort(id);

        let rtype = RecordType::from(dec.u16().ok_or(short)?);
        let rclass = RecordClass::from(dec.u16().ok_or(short)?);
        let ttl = dec.u32().ok_or(short)?;
        let rdlength = usize::from(dec.u16().ok_or(short)?);

        // RDATA is parsed field by field (expanding any compression
        // pointers), and must consume exactly what RDLENGTH claims
        let rdata_end = dec.position() + rdlength;
        let rtype_with_data = RecordTypeWithData::decode_rdata(id, rtype, rdlength, dec)?;
        if dec.position() != rdata_end {
            return Err(Error::ResourceRecordInvalid(id));
        }

        Ok(Self {
            name,
            rtype_with_data,
            rclass,
            ttl,
        })
    }
}

impl RecordTypeWithData {
    fn decode_rdata(
        id: u16,
        rtype: RecordType,
        rdlength: usize,
        dec: &mut Decoder,
    ) -> Result<Self, Error> {
        let short = Error::ResourceRecordTooShort(id);

        Ok(match rtype {
            RecordType::A => RecordTypeWithData::A {
                address: Ipv4Addr::from(dec.u32().ok_or(short)?),
            },
            RecordType::NS => RecordTypeWithData::NS {
                nsdname: DomainName::decode(id, dec)?,
            },
            RecordType::CNAME => RecordTypeWithData::CNAME {
                cname: DomainName::decode(id, dec)?,
            },
            RecordType::SOA => {
                let mname = DomainName::decode(id, dec)?;
                let rname = DomainName::decode(id, dec)?;

                let mut counters = [0_u32; 5];
                for counter in &mut counters {
                    *counter = dec.u32().ok_or(short)?;
                }
                let [serial, refresh, retry, expire, minimum] = counters;

                RecordTypeWithData::SOA {
                    mname,
                    rname,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                }
            }
            RecordType::PTR => RecordTypeWithData::PTR {
                ptrdname: DomainName::decode(id, dec)?,
            },
            RecordType::MX => RecordTypeWithData::MX {
                preference: dec.u16().ok_or(short)?,
                exchange: DomainName::decode(id, dec)?,
            },
            RecordType::TXT => {
                let len = dec.u8().ok_or(short)?;
                RecordTypeWithData::TXT {
                    content: dec.slice(len.into()).ok_or(short)?.to_vec(),
                }
            }
            RecordType::AAAA => {
                let mut segments = [0_u16; 8];
                for segment in &mut segments {
                    *segment = dec.u16().ok_or(short)?;
                }
                let [a, b, c, d, e, f, g, h] = segments;

                RecordTypeWithData::AAAA {
                    address: Ipv6Addr::new(a, b, c, d, e, f, g, h),
                }
            }
            RecordType::Unknown(tag) => RecordTypeWithData::Unknown {
                tag,
                octets: dec.slice(rdlength).ok_or(short)?.to_vec(),
            },
        })
    }
}

impl DomainName {
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    #[allow(clippy::missing_panics_doc)]
    pub fn decode(id: u16, dec: &mut Decoder) -> Result<Self, Error> {
        let mut labels = Vec::with_capacity(5);
        let mut len = 0;
        let start = dec.position();

        loop {
            let size = dec.u8().ok_or(Error::DomainTooShort(id))?;

            match size {
                0 => {
                    labels.push(Label::new());
                    len += 1;
                    break;
                }

                1..=63 => {
                    let octets = dec.slice(size.into()).ok_or(Error::DomainTooShort(id))?;
                    len += 1 + octets.len();
                    if len > DOMAINNAME_MAX_LEN {
                        return Err(Error::DomainTooLong(id));
                    }

                    // infallible: 63 octets is also the label limit
                    labels.push(Label::try_from(octets).unwrap());
                }

                size if size & 0b1100_0000 == 0b1100_0000 => {
                    let lo = dec.u8().ok_or(Error::DomainTooShort(id))?;
                    let target = usize::from(u16::from_be_bytes([size & 0b0011_1111, lo]));

                    // a pointer must lead to an earlier part of the
                    // message (not merely a different one: an earlier
                    // one: RFC 1035 section 4.1.4), so chasing them
                    // always terminates
                    if target >= start {
                        return Err(Error::DomainPointerInvalid(id));
                    }

                    let tail = DomainName::decode(id, &mut dec.rewound_to(target))?;
                    len += tail.len;
                    if len > DOMAINNAME_MAX_LEN {
                        return Err(Error::DomainTooLong(id));
                    }

                    labels.extend(tail.labels);
                    break;
                }

                _ => return Err(Error::DomainLabelInvalid(id)),
            }
        }

        Ok(DomainName { labels, len })
    }
}

/// Errors encountered when parsing a datagram.  The `u16` each
/// variant carries is the ID from the header, for logging the failure
/// against the query it came from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// The datagram ends before the ID, so there is nothing to even
    /// log the failure against.
    NoId,

    /// The header is missing one or more required fields.
    HeaderTooShort(u16),

    /// A question ends with an incomplete field.
    QuestionTooShort(u16),

    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(u16),

    /// A resource record's RDATA does not match its RDLENGTH.
    ResourceRecordInvalid(u16),

    /// A domain is incomplete.
    DomainTooShort(u16),

    /// A domain is over 255 octets in size.
    DomainTooLong(u16),

    /// A domain pointer points at or after the current record.
    DomainPointerInvalid(u16),

    /// A domain label is longer than 63 octets, but not a pointer.
    DomainLabelInvalid(u16),
}

/// A read cursor over a datagram.  Every accessor bounds-checks by
/// slicing, returning `None` past the end; `rewound_to` gives a
/// second cursor into the same datagram for chasing compression
/// pointers.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn over(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn rewound_to(&self, offset: usize) -> Decoder<'a> {
        Self {
            bytes: self.bytes,
            offset,
        }
    }

    fn read<const N: usize>(&mut self) -> Option<[u8; N]> {
        let chunk = self.bytes.get(self.offset..self.offset + N)?;
        self.offset += N;
        // infallible: the slice is exactly N bytes
        Some(chunk.try_into().unwrap())
    }

    pub fn u8(&mut self) -> Option<u8> {
        self.read().map(u8::from_be_bytes)
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.read().map(u16::from_be_bytes)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.read().map(u32::from_be_bytes)
    }

    pub fn slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let chunk = self.bytes.get(self.offset..self.offset + len)?;
        self.offset += len;
        Some(chunk)
    }
}
