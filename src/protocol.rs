//! # Link-protocol header codec
//!
//! The over-the-air header is sparsely composed: each feature enabled on a
//! connection registers one fixed-size field, and the wire order is the
//! registration order. Both ends of a connection must register the exact
//! same layout, there is no self-description on the wire.
//!
//! Field encodings, little-endian throughout:
//!
//! | Field | Size | Content |
//! |---|---|---|
//! | `Seq` | 1 | bit 7 sequence bit, bit 6 last-fragment, bits 5..0 fragment index |
//! | `ConnectionId` | 1 | connection identifier inside the timeslot |
//! | `Rdo` | 2 | random-datarate-offset accumulator |
//! | `Credit` | 1 | flow-control credit count |
//! | `Ranging` | 4 | round-trip phase sample (reserved) |

use crate::error::{Error, Result};

/// Largest composed header, in bytes.
pub const MAX_HEADER_SIZE: u8 = 10;

const MAX_FIELD_COUNT: usize = 5;

const SEQ_BIT: u8 = 0x80;
const FRAG_LAST_BIT: u8 = 0x40;
const FRAG_INDEX_MASK: u8 = 0x3F;

/// Highest fragment index representable in the `Seq` field.
pub const FRAG_INDEX_MAX: u8 = FRAG_INDEX_MASK;

/// Composable header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    Seq,
    ConnectionId,
    Rdo,
    Credit,
    Ranging,
}

impl Field {
    pub fn size(self) -> u8 {
        match self {
            Field::Seq => 1,
            Field::ConnectionId => 1,
            Field::Rdo => 2,
            Field::Credit => 1,
            Field::Ranging => 4,
        }
    }
}

/// Decoded (or to-be-encoded) view of every known field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HeaderValues {
    pub seq: bool,
    pub frag_index: u8,
    pub frag_last: bool,
    pub connection_id: u8,
    pub rdo: u16,
    pub credit: u8,
    pub ranging: u32,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct FieldInfo {
    field: Field,
    offset: u8,
}

/// Field registry of one connection.
#[derive(Debug, Clone, Default)]
pub struct LinkProtocol {
    fields: heapless::Vec<FieldInfo, MAX_FIELD_COUNT>,
    header_size: u8,
}

impl LinkProtocol {
    /// Register `field` at the next free offset.
    pub fn add_field(&mut self, field: Field) -> Result<()> {
        if self.fields.iter().any(|f| f.field == field) {
            return Err(Error::InvalidParameter);
        }
        if self.header_size + field.size() > MAX_HEADER_SIZE {
            return Err(Error::InvalidParameter);
        }
        let info = FieldInfo { field, offset: self.header_size };
        self.fields.push(info).map_err(|_| Error::InvalidParameter)?;
        self.header_size += field.size();
        Ok(())
    }

    pub fn header_size(&self) -> u8 {
        self.header_size
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    /// True when `other` registered the same fields in the same order.
    pub fn layout_matches(&self, other: &LinkProtocol) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(other.fields.iter())
                .all(|(a, b)| a.field == b.field && a.offset == b.offset)
    }

    /// Write every registered field into the header region.
    ///
    /// `out` must be exactly [`header_size`](Self::header_size) bytes.
    pub fn encode(&self, values: &HeaderValues, out: &mut [u8]) {
        debug_assert_eq!(out.len(), self.header_size as usize);
        for info in &self.fields {
            let at = info.offset as usize;
            match info.field {
                Field::Seq => {
                    let mut b = values.frag_index & FRAG_INDEX_MASK;
                    if values.seq {
                        b |= SEQ_BIT;
                    }
                    if values.frag_last {
                        b |= FRAG_LAST_BIT;
                    }
                    out[at] = b;
                }
                Field::ConnectionId => out[at] = values.connection_id,
                Field::Rdo => out[at..at + 2].copy_from_slice(&values.rdo.to_le_bytes()),
                Field::Credit => out[at] = values.credit,
                Field::Ranging => out[at..at + 4].copy_from_slice(&values.ranging.to_le_bytes()),
            }
        }
    }

    /// Read every registered field from a received header region.
    pub fn decode(&self, buf: &[u8]) -> HeaderValues {
        debug_assert_eq!(buf.len(), self.header_size as usize);
        let mut values = HeaderValues::default();
        for info in &self.fields {
            let at = info.offset as usize;
            match info.field {
                Field::Seq => {
                    let b = buf[at];
                    values.seq = b & SEQ_BIT != 0;
                    values.frag_last = b & FRAG_LAST_BIT != 0;
                    values.frag_index = b & FRAG_INDEX_MASK;
                }
                Field::ConnectionId => values.connection_id = buf[at],
                Field::Rdo => values.rdo = u16::from_le_bytes([buf[at], buf[at + 1]]),
                Field::Credit => values.credit = buf[at],
                Field::Ranging => {
                    values.ranging =
                        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
                }
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_layout() -> LinkProtocol {
        let mut p = LinkProtocol::default();
        p.add_field(Field::Seq).unwrap();
        p.add_field(Field::ConnectionId).unwrap();
        p.add_field(Field::Rdo).unwrap();
        p.add_field(Field::Credit).unwrap();
        p
    }

    #[test]
    fn offsets_follow_registration_order() {
        let p = full_layout();
        assert_eq!(p.header_size(), 5);
        let mut buf = [0u8; 5];
        let values = HeaderValues { connection_id: 0xAB, rdo: 0x1234, credit: 7, ..Default::default() };
        p.encode(&values, &mut buf);
        assert_eq!(buf, [0x00, 0xAB, 0x34, 0x12, 0x07]);
    }

    #[test]
    fn encode_decode_is_identity() {
        let p = full_layout();
        let values = HeaderValues {
            seq: true,
            frag_index: 13,
            frag_last: true,
            connection_id: 2,
            rdo: 0xBEEF,
            credit: 250,
            ranging: 0,
        };
        let mut buf = [0u8; 5];
        p.encode(&values, &mut buf);
        assert_eq!(p.decode(&buf), values);
    }

    #[test]
    fn seq_byte_packs_three_subfields() {
        let mut p = LinkProtocol::default();
        p.add_field(Field::Seq).unwrap();
        let mut buf = [0u8; 1];
        p.encode(
            &HeaderValues { seq: true, frag_last: true, frag_index: 0x3F, ..Default::default() },
            &mut buf,
        );
        assert_eq!(buf[0], 0xFF);
    }

    #[test]
    fn duplicate_field_rejected() {
        let mut p = LinkProtocol::default();
        p.add_field(Field::Seq).unwrap();
        assert_eq!(p.add_field(Field::Seq).unwrap_err(), Error::InvalidParameter);
    }

    #[test]
    fn layout_comparison_detects_order_mismatch() {
        let mut a = LinkProtocol::default();
        a.add_field(Field::Seq).unwrap();
        a.add_field(Field::Credit).unwrap();
        let mut b = LinkProtocol::default();
        b.add_field(Field::Credit).unwrap();
        b.add_field(Field::Seq).unwrap();
        assert!(!a.layout_matches(&b));
        assert!(a.layout_matches(&a.clone()));
    }

    #[test]
    fn decode_ignores_unregistered_fields() {
        let mut p = LinkProtocol::default();
        p.add_field(Field::Seq).unwrap();
        let values = p.decode(&[SEQ_BIT]);
        assert!(values.seq);
        assert_eq!(values.rdo, 0);
        assert_eq!(values.credit, 0);
    }
}
