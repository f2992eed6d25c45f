// src/ipbus.rs

use crate::config::IPBUS_VERSION;
use crate::error::{HwError, Result};

use byteorder::{BigEndian, ByteOrder};

pub const PACKET_TYPE_CONTROL: u32 = 0x0;
pub const BYTE_ORDER_QUALIFIER: u32 = 0xF;

/// Types de transaction IPbus 2.0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Read = 0x0,
    Write = 0x1,
    NonIncrementingRead = 0x2,
    NonIncrementingWrite = 0x3,
    RmwBits = 0x4,
    RmwSum = 0x5,
    ConfigRead = 0x6,
}

impl TransactionType {
    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0x0 => TransactionType::Read,
            0x1 => TransactionType::Write,
            0x2 => TransactionType::NonIncrementingRead,
            0x3 => TransactionType::NonIncrementingWrite,
            0x4 => TransactionType::RmwBits,
            0x5 => TransactionType::RmwSum,
            0x6 => TransactionType::ConfigRead,
            _ => return None,
        })
    }
}

pub const INFO_SUCCESS: u8 = 0x0;
pub const INFO_REQUEST: u8 = 0xF;

pub fn packet_header(packet_id: u16) -> u32 {
    (IPBUS_VERSION << 28) | ((packet_id as u32) << 8) | (BYTE_ORDER_QUALIFIER << 4) | PACKET_TYPE_CONTROL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    pub version: u32,
    pub id: u16,
    pub words: u8,
    pub kind: TransactionType,
    pub info: u8,
}

impl TransactionHeader {
    pub fn request(id: u16, words: u8, kind: TransactionType) -> Self {
        Self {
            version: IPBUS_VERSION,
            id: id & 0x0FFF,
            words,
            kind,
            info: INFO_REQUEST,
        }
    }

    pub fn encode(&self) -> u32 {
        (self.version << 28)
            | ((self.id as u32 & 0x0FFF) << 16)
            | ((self.words as u32) << 8)
            | ((self.kind as u32) << 4)
            | (self.info as u32 & 0xF)
    }

    pub fn decode(word: u32) -> Result<Self> {
        let code = (word >> 4) & 0xF;
        let kind = TransactionType::from_code(code)
            .ok_or_else(|| HwError::protocol(format!("unknown transaction type 0x{:x}", code)))?;
        Ok(Self {
            version: word >> 28,
            id: ((word >> 16) & 0x0FFF) as u16,
            words: ((word >> 8) & 0xFF) as u8,
            kind,
            info: (word & 0xF) as u8,
        })
    }
}

/// Paquet de lectures simples : une transaction d'un mot par adresse, les
/// identifiants de transaction partant de `first_tid` (modulo 12 bits).
pub fn encode_reads(packet_id: u16, first_tid: u16, addresses: &[u32]) -> Vec<u8> {
    let mut buf = vec![0u8; 4 * (1 + 2 * addresses.len())];
    BigEndian::write_u32(&mut buf[0..4], packet_header(packet_id));

    for (i, addr) in addresses.iter().enumerate() {
        let offset = 4 + i * 8;
        let header =
            TransactionHeader::request(transaction_id(first_tid, i), 1, TransactionType::Read);
        BigEndian::write_u32(&mut buf[offset..offset + 4], header.encode());
        BigEndian::write_u32(&mut buf[offset + 4..offset + 8], *addr);
    }
    buf
}

pub fn transaction_id(first_tid: u16, index: usize) -> u16 {
    ((first_tid as usize + index) & 0x0FFF) as u16
}

/// Identifiant de la première transaction d'une réponse, s'il y en a une
pub fn first_transaction_id(reply: &[u8]) -> Option<u16> {
    if reply.len() < 8 {
        return None;
    }
    TransactionHeader::decode(BigEndian::read_u32(&reply[4..8]))
        .ok()
        .map(|h| h.id)
}

/// Décode la réponse à `encode_reads` et renvoie les valeurs brutes dans l'ordre.
pub fn decode_read_reply(
    packet_id: u16,
    first_tid: u16,
    reply: &[u8],
    expected: usize,
) -> Result<Vec<u32>> {
    if reply.len() % 4 != 0 {
        return Err(HwError::protocol(format!(
            "reply length {} is not a multiple of 4",
            reply.len()
        )));
    }
    if reply.len() < 4 {
        return Err(HwError::protocol("empty reply"));
    }

    let got = BigEndian::read_u32(&reply[0..4]);
    if got != packet_header(packet_id) {
        return Err(HwError::protocol(format!(
            "unexpected packet header 0x{:08x}",
            got
        )));
    }

    let mut values = Vec::with_capacity(expected);
    let mut offset = 4;

    for i in 0..expected {
        if offset + 4 > reply.len() {
            return Err(HwError::protocol(format!(
                "reply truncated after {} of {} transactions",
                i, expected
            )));
        }
        let header = TransactionHeader::decode(BigEndian::read_u32(&reply[offset..offset + 4]))?;
        offset += 4;

        if header.version != IPBUS_VERSION {
            return Err(HwError::protocol(format!("bad version {}", header.version)));
        }
        if header.id != transaction_id(first_tid, i) || header.kind != TransactionType::Read {
            return Err(HwError::protocol(format!(
                "transaction {} answered out of order (id {}, {:?})",
                i, header.id, header.kind
            )));
        }
        if header.info != INFO_SUCCESS {
            return Err(HwError::protocol(format!(
                "transaction {} failed with info code 0x{:x}",
                i, header.info
            )));
        }
        if header.words != 1 || offset + 4 > reply.len() {
            return Err(HwError::protocol(format!(
                "transaction {} returned {} words",
                i, header.words
            )));
        }

        values.push(BigEndian::read_u32(&reply[offset..offset + 4]));
        offset += 4;
    }

    if offset != reply.len() {
        return Err(HwError::protocol(format!(
            "{} unexpected trailing bytes after {} transactions",
            reply.len() - offset,
            expected
        )));
    }

    Ok(values)
}

/// Réponse d'une cible IPbus à un paquet de lectures, utilisé par les tests
/// et la cible factice en boucle locale.
#[cfg(test)]
pub fn encode_read_reply(request: &[u8], read: impl Fn(u32) -> Option<u32>) -> Vec<u8> {
    let mut out = request[0..4].to_vec();
    for chunk in request[4..].chunks_exact(8) {
        let header = TransactionHeader::decode(BigEndian::read_u32(&chunk[0..4])).unwrap();
        let addr = BigEndian::read_u32(&chunk[4..8]);
        let mut word = [0u8; 4];
        match read(addr) {
            Some(v) => {
                let reply = TransactionHeader {
                    info: INFO_SUCCESS,
                    ..header
                };
                BigEndian::write_u32(&mut word, reply.encode());
                out.extend_from_slice(&word);
                BigEndian::write_u32(&mut word, v);
                out.extend_from_slice(&word);
            }
            None => {
                // Erreur de bus
                let reply = TransactionHeader {
                    info: 0x4,
                    words: 0,
                    ..header
                };
                BigEndian::write_u32(&mut word, reply.encode());
                out.extend_from_slice(&word);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let buf = encode_reads(0, 0, &[0x10, 0x2000_0001]);
        assert_eq!(buf.len(), 20);
        assert_eq!(BigEndian::read_u32(&buf[0..4]), 0x2000_00F0);
        assert_eq!(BigEndian::read_u32(&buf[4..8]), 0x2000_010F);
        assert_eq!(BigEndian::read_u32(&buf[8..12]), 0x10);
        assert_eq!(BigEndian::read_u32(&buf[12..16]), 0x2001_010F);
        assert_eq!(BigEndian::read_u32(&buf[16..20]), 0x2000_0001);
    }

    #[test]
    fn decodes_values_in_order() {
        let req = encode_reads(0, 7, &[1, 2, 3]);
        let reply = encode_read_reply(&req, |a| Some(a * 100));
        assert_eq!(first_transaction_id(&reply), Some(7));
        assert_eq!(decode_read_reply(0, 7, &reply, 3).unwrap(), vec![100, 200, 300]);
    }

    #[test]
    fn bus_error_is_reported() {
        let req = encode_reads(0, 0, &[1, 0xdead]);
        let reply = encode_read_reply(&req, |a| if a == 1 { Some(7) } else { None });
        let err = decode_read_reply(0, 0, &reply, 2).unwrap_err();
        assert!(err.to_string().contains("info code 0x4"), "{}", err);
    }

    #[test]
    fn truncated_reply_is_rejected() {
        let req = encode_reads(0, 0, &[1, 2]);
        let reply = encode_read_reply(&req, |a| Some(a));
        assert!(decode_read_reply(0, 0, &reply[..reply.len() - 8], 2).is_err());
        assert!(decode_read_reply(0, 0, &reply[..3], 2).is_err());
    }

    #[test]
    fn foreign_packet_header_is_rejected() {
        let req = encode_reads(5, 0, &[1]);
        let reply = encode_read_reply(&req, |a| Some(a));
        assert!(decode_read_reply(6, 0, &reply, 1).is_err());
    }

    #[test]
    fn extra_transactions_are_rejected() {
        let req = encode_reads(0, 0, &[1, 2, 3]);
        let reply = encode_read_reply(&req, |a| Some(a));
        let err = decode_read_reply(0, 0, &reply, 1).unwrap_err();
        assert!(err.to_string().contains("trailing"), "{}", err);
    }

    #[test]
    fn reply_for_other_transaction_ids_is_rejected() {
        let req = encode_reads(0, 0, &[1, 2]);
        let reply = encode_read_reply(&req, |a| Some(a));
        assert!(decode_read_reply(0, 64, &reply, 2).is_err());
    }

    #[test]
    fn transaction_ids_wrap_at_twelve_bits() {
        assert_eq!(transaction_id(0x0FFF, 1), 0);
        let req = encode_reads(0, 0x0FFE, &[1, 2, 3]);
        let reply = encode_read_reply(&req, |a| Some(a));
        assert_eq!(decode_read_reply(0, 0x0FFE, &reply, 3).unwrap(), vec![1, 2, 3]);
    }
}
