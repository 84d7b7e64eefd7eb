//! Serialisation of DNS messages to the wire format.  See the `types`
//! module for details of the format.

use bytes::{BufMut, BytesMut};

use crate::protocol::types::*;

impl Message {
    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn to_octets(&self) -> Result<BytesMut, Error> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes())
    }

    /// # Errors
    ///
    /// If the message is invalid (the `Message` type permits more
    /// states than strictly allowed).
    pub fn encode(&self, enc: &mut Encoder) -> Result<(), Error> {
        enc.u16(self.header.id);
        enc.u16(self.header.flags());

        for section_len in [
            self.questions.len(),
            self.answers.len(),
            self.authority.len(),
            self.additional.len(),
        ] {
            enc.u16(fit_u16(section_len)?);
        }

        for question in &self.questions {
            question.encode(enc);
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            rr.encode(enc)?;
        }

        Ok(())
    }
}

impl Question {
    pub fn encode(&self, enc: &mut Encoder) {
        self.name.encode(enc, true);
        enc.u16(self.qtype.into());
        enc.u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn encode(&self, enc: &mut Encoder) -> Result<(), Error> {
        self.name.encode(enc, true);
        enc.u16(self.rtype_with_data.rtype().into());
        enc.u16(self.rclass.into());
        enc.u32(self.ttl);

        // RDLENGTH is not known until the RDATA is written, so a
        // placeholder goes in first and is patched afterwards
        let placeholder = enc.position();
        enc.u16(0);
        self.rtype_with_data.encode_rdata(enc)?;

        let rdlength = fit_u16(enc.position() - placeholder - 2)?;
        enc.patch_u16(placeholder, rdlength);

        Ok(())
    }
}

impl RecordTypeWithData {
    fn encode_rdata(&self, enc: &mut Encoder) -> Result<(), Error> {
        match self {
            RecordTypeWithData::A { address } => enc.bytes(&address.octets()),
            RecordTypeWithData::NS { nsdname } => nsdname.encode(enc, false),
            RecordTypeWithData::CNAME { cname } => cname.encode(enc, false),
            RecordTypeWithData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.encode(enc, false);
                rname.encode(enc, false);
                for counter in [serial, refresh, retry, expire, minimum] {
                    enc.u32(*counter);
                }
            }
            RecordTypeWithData::PTR { ptrdname } => ptrdname.encode(enc, false),
            RecordTypeWithData::MX {
                preference,
                exchange,
            } => {
                enc.u16(*preference);
                exchange.encode(enc, false);
            }
            RecordTypeWithData::TXT { content } => {
                // the builder length-checks the character-string, but
                // nothing stops a caller constructing one by hand
                let len = u8::try_from(content.len()).map_err(|_| {
                    Error::CharacterStringTooLong {
                        length: content.len(),
                    }
                })?;
                enc.u8(len);
                enc.bytes(content);
            }
            RecordTypeWithData::AAAA { address } => enc.bytes(&address.octets()),
            RecordTypeWithData::Unknown { octets, .. } => enc.bytes(octets),
        }

        Ok(())
    }
}

impl DomainName {
    pub fn encode(&self, enc: &mut Encoder, compress: bool) {
        if compress {
            if let Some(pointer) = enc.pointer_to(self) {
                enc.u16(pointer);
                return;
            }
        }

        enc.remember(self);
        for label in &self.labels {
            enc.u8(label.len());
            enc.bytes(label.octets());
        }
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A section count or RDATA length does not fit in 16 bits.
    LengthOverflow { value: usize },

    /// A TXT character-string is over 255 octets.
    CharacterStringTooLong { length: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::LengthOverflow { value } => {
                write!(f, "'{value}' does not fit in 16 bits")
            }
            Error::CharacterStringTooLong { length } => {
                write!(f, "character-string of {length} octets is over the 255 limit")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// The output buffer, along with the offset of every name written so
/// far, so later occurrences of a name can collapse to a compression
/// pointer.  Messages hold a handful of names at most, so the name
/// table is a plain vector scanned linearly.
pub struct Encoder {
    out: BytesMut,
    names: Vec<(DomainName, u16)>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            out: BytesMut::with_capacity(512),
            names: Vec::new(),
        }
    }

    pub fn u8(&mut self, value: u8) {
        self.out.put_u8(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.out.put_u16(value);
    }

    pub fn u32(&mut self, value: u32) {
        self.out.put_u32(value);
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.out.put_slice(bytes);
    }

    pub fn into_bytes(self) -> BytesMut {
        self.out
    }

    fn position(&self) -> usize {
        self.out.len()
    }

    fn patch_u16(&mut self, at: usize, value: u16) {
        self.out[at..at + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// A compression pointer to an earlier occurrence of this name,
    /// if there is one.
    fn pointer_to(&self, name: &DomainName) -> Option<u16> {
        self.names
            .iter()
            .find(|(seen, _)| seen == name)
            .map(|(_, at)| 0b1100_0000_0000_0000 | at)
    }

    /// Note where this name is about to be written.  Pointers only
    /// have 14 bits, so names past that offset are not remembered;
    /// the root name is a single octet and never worth a pointer.
    fn remember(&mut self, name: &DomainName) {
        if name.is_root() {
            return;
        }

        if let Ok(at) = u16::try_from(self.position()) {
            if at < (1 << 14) && self.pointer_to(name).is_none() {
                self.names.push((name.clone(), at));
            }
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Squeeze a length into the 16 bits the wire gives it.
fn fit_u16(value: usize) -> Result<u16, Error> {
    u16::try_from(value).map_err(|_| Error::LengthOverflow { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::test_util::*;

    #[test]
    #[rustfmt::skip]
    fn test_name_compression_opt_in() {
        let mut enc = Encoder::new();
        enc.u32(0x0102_0304);
        domain("www.example.com.").encode(&mut enc, true);
        domain("www.example.com.").encode(&mut enc, true);

        assert_eq!(
            vec![
                1, 2, 3, 4,
                // domain 1
                3, 119, 119, 119, // "www"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
                // domain 2
                0b1100_0000, 0b0000_0100 // pointer
            ],
            enc.into_bytes(),
        );
    }

    #[test]
    #[rustfmt::skip]
    fn test_name_compression_opt_out() {
        let mut enc = Encoder::new();
        enc.u32(0x0102_0304);
        domain("www.example.com.").encode(&mut enc, true);
        domain("www.example.com.").encode(&mut enc, false);

        assert_eq!(
            vec![
                1, 2, 3, 4,
                // domain 1
                3, 119, 119, 119, // "www"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
                // domain 2
                3, 119, 119, 119, // "www"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
            ],
            enc.into_bytes(),
        );
    }

    #[test]
    #[rustfmt::skip]
    fn test_answer_name_compressed_against_question() {
        let mut enc = Encoder::new();

        Question {
            name: domain("example.com."),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        }.encode(&mut enc);

        a_record("example.com.", "1.2.3.4".parse().unwrap())
            .encode(&mut enc)
            .unwrap();

        assert_eq!(
            vec![
                // QNAME
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
                // QTYPE, QCLASS
                0, 1, 0, 1,
                // NAME
                0b1100_0000, 0b0000_0000, // pointer to offset 0
                // TYPE, CLASS
                0, 1, 0, 1,
                // TTL
                0, 0, 0, 1,
                // RDLENGTH
                0, 4,
                // RDATA
                1, 2, 3, 4,
            ],
            enc.into_bytes(),
        );
    }

    #[test]
    #[rustfmt::skip]
    fn test_patches_rdlength() {
        let mut enc = Encoder::new();
        enc.u32(0x0102_0304);

        let rr = mx_record("www.example.com.", 32, "mx.example.com.");
        rr.encode(&mut enc).unwrap();

        assert_eq!(
            vec![
                1, 2, 3, 4,
                // NAME
                3, 119, 119, 119, // "www"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
                // TYPE
                0b0000_0000, 0b0000_1111, // MX
                // CLASS
                0b0000_0000, 0b0000_0001, // IN
                // TTL
                0b0000_0000, 0b0000_0000, 0b0000_0000, 0b0000_0001, // 1
                // RDLENGTH
                0b0000_0000, 0b0001_0010, // 18 octets
                // RDATA
                0, 32, // preference
                2, 109, 120, // "mx"
                7, 101, 120, 97, 109, 112, 108, 101, // "example"
                3, 99, 111, 109, 0, // "com"
            ],
            enc.into_bytes(),
        );
    }

    #[test]
    fn test_txt_writes_length_octet() {
        let mut enc = Encoder::new();
        let rr = ResourceRecord {
            name: domain("example.com."),
            rtype_with_data: RecordTypeWithData::TXT {
                content: b"hello".to_vec(),
            },
            rclass: RecordClass::IN,
            ttl: 1,
        };
        rr.encode(&mut enc).unwrap();

        let bytes = enc.into_bytes();

        // RDLENGTH covers the length octet plus the content
        let rdlength_index = bytes.len() - 6 - 2;
        assert_eq!(
            [0, 6],
            [bytes[rdlength_index], bytes[rdlength_index + 1]]
        );
        assert_eq!(5, bytes[rdlength_index + 2]);
        assert_eq!(&b"hello"[..], &bytes[rdlength_index + 3..]);
    }

    #[test]
    fn test_txt_over_255_octets_is_an_error() {
        let mut enc = Encoder::new();
        let rr = ResourceRecord {
            name: domain("example.com."),
            rtype_with_data: RecordTypeWithData::TXT {
                content: vec![b'x'; 256],
            },
            rclass: RecordClass::IN,
            ttl: 1,
        };

        assert_eq!(
            Err(Error::CharacterStringTooLong { length: 256 }),
            rr.encode(&mut enc)
        );
    }
}
