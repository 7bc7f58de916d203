use std::fmt::{Debug, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};
use crc::Crc;

#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub u32);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x?}", self.0)
    }
}
impl Checksum {
    /// The checksum is order-sensitive over all fields that the peer acts on,
    ///  so that corruption of any of them is detectable
    pub fn of(seqnum: u64, acknum: u64, payload: &[u8]) -> Checksum {
        let hasher = Crc::<u32>::new(&crc::CRC_32_ISCSI);
        let mut digest = hasher.digest();

        digest.update(&seqnum.to_be_bytes());
        digest.update(&acknum.to_be_bytes());
        digest.update(payload);

        Checksum(digest.finalize())
    }
}

/// The unit the channel transports. Packets are value objects: once constructed
///  they are never mutated - a reply is always a freshly built packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    /// stream offset of the first payload byte
    pub seqnum: u64,
    /// cumulative acknowledgment: the next stream offset the sender of this
    ///  packet expects. Unused (zero) on data packets.
    pub acknum: u64,
    pub checksum: Checksum,
    pub payload: Bytes,
}

impl Packet {
    pub fn data(seqnum: u64, payload: Bytes) -> Packet {
        Packet {
            seqnum,
            acknum: 0,
            checksum: Checksum::of(seqnum, 0, &payload),
            payload,
        }
    }

    pub fn ack(acknum: u64) -> Packet {
        Packet {
            seqnum: 0,
            acknum,
            checksum: Checksum::of(0, acknum, b""),
            payload: Bytes::new(),
        }
    }

    /// The sole corruption oracle: recompute the checksum from the packet's own
    ///  fields and compare with the carried value. No field of an inbound packet
    ///  may be trusted before this returns true.
    pub fn verify(&self) -> bool {
        Checksum::of(self.seqnum, self.acknum, &self.payload) == self.checksum
    }

    /// ACK packets are distinguished by their empty payload
    pub fn is_ack(&self) -> bool {
        self.payload.is_empty()
    }

    /// the first stream offset *after* this packet's payload
    pub fn end_seqnum(&self) -> u64 {
        self.seqnum + self.payload.len() as u64
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u64(self.seqnum);
        buf.put_u64(self.acknum);
        buf.put_u32(self.checksum.0);
        buf.put_usize_varint(self.payload.len());
        buf.put_slice(&self.payload);
    }

    /// NB: deserialization carries the checksum through without verifying it -
    ///  verification is the receiving entity's responsibility, so that a
    ///  corrupted packet travels end-to-end like it would on a real wire
    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<Packet> {
        let seqnum = buf.try_get_u64()?;
        let acknum = buf.try_get_u64()?;
        let checksum = Checksum(buf.try_get_u32()?);
        let payload_len = buf.try_get_usize_varint()?;

        if buf.remaining() < payload_len {
            bail!(
                "packet declares a payload of {} bytes but only {} are present",
                payload_len,
                buf.remaining()
            );
        }
        let payload = buf.copy_to_bytes(payload_len);

        Ok(Packet {
            seqnum,
            acknum,
            checksum,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(0, 0, b"".as_slice())]
    #[case::data(17, 0, b"hello".as_slice())]
    #[case::ack(0, 42, b"".as_slice())]
    #[case::big_offsets(u64::MAX - 5, u64::MAX, b"x".as_slice())]
    fn test_checksum_deterministic(#[case] seqnum: u64, #[case] acknum: u64, #[case] payload: &[u8]) {
        assert_eq!(
            Checksum::of(seqnum, acknum, payload),
            Checksum::of(seqnum, acknum, payload),
        );
    }

    #[test]
    fn test_checksum_order_sensitive() {
        // seqnum and acknum must not be interchangeable
        assert_ne!(Checksum::of(1, 2, b"abc"), Checksum::of(2, 1, b"abc"));
    }

    #[test]
    fn test_fresh_packets_verify() {
        assert!(Packet::data(0, Bytes::from_static(b"abc")).verify());
        assert!(Packet::data(999, Bytes::from_static(b"x")).verify());
        assert!(Packet::ack(0).verify());
        assert!(Packet::ack(12345).verify());
    }

    #[rstest]
    #[case::payload_byte(0)]
    #[case::seqnum(1)]
    #[case::acknum(2)]
    fn test_verify_detects_single_field_alteration(#[case] altered_field: usize) {
        let original = Packet::data(100, Bytes::from_static(b"hello"));

        let mut seqnum = original.seqnum;
        let mut acknum = original.acknum;
        let mut payload = original.payload.to_vec();
        match altered_field {
            0 => payload[0] ^= 0x01,
            1 => seqnum ^= 0x01,
            _ => acknum ^= 0x01,
        }

        let corrupted = Packet {
            seqnum,
            acknum,
            checksum: original.checksum,
            payload: payload.into(),
        };
        assert!(!corrupted.verify());
    }

    #[rstest]
    #[case::data(Packet::data(7, Bytes::from_static(b"payload")))]
    #[case::ack(Packet::ack(99))]
    #[case::empty_offsets(Packet::data(0, Bytes::from_static(b"a")))]
    fn test_ser_deser(#[case] original: Packet) {
        let mut buf = BytesMut::new();
        original.ser(&mut buf);

        let mut b: &[u8] = &buf;
        let deser = Packet::deser(&mut b).unwrap();
        assert!(b.is_empty());
        assert_eq!(deser, original);
        assert!(deser.verify());
    }

    #[test]
    fn test_deser_truncated_header() {
        let mut buf: &[u8] = b"\x00\x00\x00";
        assert!(Packet::deser(&mut buf).is_err());
    }

    #[test]
    fn test_deser_truncated_payload() {
        let mut buf = BytesMut::new();
        Packet::data(0, Bytes::from_static(b"hello")).ser(&mut buf);
        let truncated = &buf[..buf.len() - 1];

        let mut b: &[u8] = truncated;
        assert!(Packet::deser(&mut b).is_err());
    }

    #[test]
    fn test_deser_keeps_stale_checksum() {
        let mut buf = BytesMut::new();
        Packet::data(5, Bytes::from_static(b"abc")).ser(&mut buf);

        // flip a payload bit on the wire
        let last = buf.len() - 1;
        buf[last] ^= 0x80;

        let mut b: &[u8] = &buf;
        let deser = Packet::deser(&mut b).unwrap();
        assert!(!deser.verify());
    }

    #[test]
    fn test_end_seqnum() {
        assert_eq!(Packet::data(10, Bytes::from_static(b"abc")).end_seqnum(), 13);
        assert_eq!(Packet::ack(10).end_seqnum(), 0);
    }
}
