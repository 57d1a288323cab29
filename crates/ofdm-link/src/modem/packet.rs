//! Frame header and payload packet coding.
//!
//! The on-air header is the 8 user bytes (transfer id + frame counter)
//! followed by the payload length and the scheme identifiers the receiver
//! needs to decode the payload, protected by CRC-32 and Hamming(12,8).
//! The payload packet is the payload bytes plus CRC-32, passed through the
//! inner and outer FEC encoders.

use super::fec::{BitReader, BitWriter, FecScheme};
use super::modulation::SubcarrierModulation;

/// User-visible frame header length in bytes.
pub const HEADER_SIZE: usize = 8;

/// Plain header: user bytes, payload length, modulation id, FEC ids.
const HEADER_PLAIN_LEN: usize = HEADER_SIZE + 2 + 3;

/// The header is always coded with Hamming(12,8).
const HEADER_FEC: FecScheme = FecScheme::Hamming128;

/// Payload decoding parameters recovered from a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub payload_len: usize,
    pub modulation: SubcarrierModulation,
    pub inner_fec: FecScheme,
    pub outer_fec: FecScheme,
}

/// Size of the coded header in bytes; fixed for a given protocol revision.
pub fn header_coded_len() -> usize {
    HEADER_FEC.encoded_len(HEADER_PLAIN_LEN + 4)
}

/// Encode the frame header.
pub fn encode_header(user: &[u8; HEADER_SIZE], info: &FrameInfo) -> Vec<u8> {
    let mut plain = Vec::with_capacity(HEADER_PLAIN_LEN + 4);
    plain.extend_from_slice(user);
    plain.extend_from_slice(&(info.payload_len as u16).to_be_bytes());
    plain.push(info.modulation.id());
    plain.push(info.inner_fec.id());
    plain.push(info.outer_fec.id());
    plain.extend_from_slice(&crc32fast::hash(&plain).to_be_bytes());
    HEADER_FEC.encode(&plain)
}

/// Decode a coded header.
///
/// Always returns the user bytes (possibly garbage on a corrupted header);
/// the frame info is `None` when the CRC or a scheme identifier does not
/// check out.
pub fn decode_header(coded: &[u8]) -> ([u8; HEADER_SIZE], Option<FrameInfo>) {
    let plain = HEADER_FEC.decode(coded, HEADER_PLAIN_LEN + 4);
    let mut user = [0u8; HEADER_SIZE];
    user.copy_from_slice(&plain[..HEADER_SIZE]);
    let crc = u32::from_be_bytes(plain[HEADER_PLAIN_LEN..HEADER_PLAIN_LEN + 4].try_into().unwrap());
    if crc != crc32fast::hash(&plain[..HEADER_PLAIN_LEN]) {
        return (user, None);
    }
    let payload_len = u16::from_be_bytes(plain[HEADER_SIZE..HEADER_SIZE + 2].try_into().unwrap());
    let info = match (
        SubcarrierModulation::from_id(plain[HEADER_SIZE + 2]),
        FecScheme::from_id(plain[HEADER_SIZE + 3]),
        FecScheme::from_id(plain[HEADER_SIZE + 4]),
    ) {
        (Some(modulation), Some(inner_fec), Some(outer_fec)) => Some(FrameInfo {
            payload_len: payload_len as usize,
            modulation,
            inner_fec,
            outer_fec,
        }),
        _ => None,
    };
    (user, info)
}

/// Coded payload size in bytes for a given payload length.
pub fn payload_coded_len(payload_len: usize, inner: FecScheme, outer: FecScheme) -> usize {
    outer.encoded_len(inner.encoded_len(payload_len + 4))
}

/// Encode a payload packet: append CRC-32, then inner and outer FEC.
pub fn encode_payload(payload: &[u8], inner: FecScheme, outer: FecScheme) -> Vec<u8> {
    let mut plain = Vec::with_capacity(payload.len() + 4);
    plain.extend_from_slice(payload);
    plain.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
    outer.encode(&inner.encode(&plain))
}

/// Decode a payload packet; the boolean reports CRC validity.
pub fn decode_payload(
    coded: &[u8],
    payload_len: usize,
    inner: FecScheme,
    outer: FecScheme,
) -> (Vec<u8>, bool) {
    let inner_len = inner.encoded_len(payload_len + 4);
    let mut plain = inner.decode(&outer.decode(coded, inner_len), payload_len + 4);
    let crc = u32::from_be_bytes(plain[payload_len..payload_len + 4].try_into().unwrap());
    plain.truncate(payload_len);
    let valid = crc == crc32fast::hash(&plain);
    (plain, valid)
}

/// Pack an MSB-first bit sequence into bytes.
pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut writer = BitWriter::new();
    for &bit in bits {
        writer.push(bit);
    }
    writer.into_bytes()
}

/// Unpack bytes into `count` MSB-first bits.
#[cfg(test)]
fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    let mut reader = BitReader::new(bytes);
    (0..count).map(|_| reader.read()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let user = *b"CALL\x00\x00\x00\x2a";
        let info = FrameInfo {
            payload_len: 392,
            modulation: SubcarrierModulation::Qpsk,
            inner_fec: FecScheme::Hamming128,
            outer_fec: FecScheme::None,
        };
        let coded = encode_header(&user, &info);
        assert_eq!(coded.len(), header_coded_len());
        let (decoded_user, decoded_info) = decode_header(&coded);
        assert_eq!(decoded_user, user);
        assert_eq!(decoded_info, Some(info));
    }

    #[test]
    fn test_header_detects_corruption() {
        let user = [0u8; HEADER_SIZE];
        let info = FrameInfo {
            payload_len: 100,
            modulation: SubcarrierModulation::Bpsk,
            inner_fec: FecScheme::None,
            outer_fec: FecScheme::None,
        };
        let mut coded = encode_header(&user, &info);
        // two flipped bits in one codeword defeat the single-error corrector
        coded[0] ^= 0x21;
        let (_, decoded_info) = decode_header(&coded);
        assert_eq!(decoded_info, None);
    }

    #[test]
    fn test_header_corrects_single_error() {
        let user = *b"TEST\x00\x00\x00\x01";
        let info = FrameInfo {
            payload_len: 8,
            modulation: SubcarrierModulation::Apsk16,
            inner_fec: FecScheme::Hamming74,
            outer_fec: FecScheme::Rep3,
        };
        let mut coded = encode_header(&user, &info);
        coded[2] ^= 0x08;
        let (decoded_user, decoded_info) = decode_header(&coded);
        assert_eq!(decoded_user, user);
        assert_eq!(decoded_info, Some(info));
    }

    #[test]
    fn test_payload_round_trip() {
        let payload: Vec<u8> = (0..200).map(|i| (i * 7) as u8).collect();
        for inner in FecScheme::ALL {
            for outer in [FecScheme::None, FecScheme::Rep3] {
                let coded = encode_payload(&payload, inner, outer);
                assert_eq!(coded.len(), payload_coded_len(payload.len(), inner, outer));
                let (decoded, valid) = decode_payload(&coded, payload.len(), inner, outer);
                assert!(valid);
                assert_eq!(decoded, payload);
            }
        }
    }

    #[test]
    fn test_payload_crc_catches_corruption() {
        let payload = b"hello world".to_vec();
        let mut coded = encode_payload(&payload, FecScheme::None, FecScheme::None);
        coded[3] ^= 0xff;
        let (_, valid) = decode_payload(&coded, payload.len(), FecScheme::None, FecScheme::None);
        assert!(!valid);
    }

    #[test]
    fn test_bit_packing_round_trip() {
        let bits: Vec<bool> = (0..21).map(|i| i % 3 == 0).collect();
        let bytes = pack_bits(&bits);
        assert_eq!(unpack_bits(&bytes, 21), bits);
    }
}
