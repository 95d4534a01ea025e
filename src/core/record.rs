// Fixed-size log record layout and its XOR checksum.
use crate::core::error::{Error, ErrorKind};

pub const RECORD_LEN: usize = 16;
pub const MAX_LOG_RECORDS: u32 = 100;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LogRecord {
    pub producer_id: u32,
    pub timestamp: u32,
    pub sequence: u32,
    pub checksum: u32,
}

impl LogRecord {
    pub fn new(producer_id: u32, timestamp: u32, sequence: u32) -> Self {
        Self {
            producer_id,
            timestamp,
            sequence,
            checksum: checksum(producer_id, timestamp, sequence),
        }
    }

    /// False when the checksum disagrees with the other fields, e.g. a torn write.
    pub fn is_intact(&self) -> bool {
        self.checksum == checksum(self.producer_id, self.timestamp, self.sequence)
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        write_u32(&mut buf, 0, self.producer_id);
        write_u32(&mut buf, 4, self.timestamp);
        write_u32(&mut buf, 8, self.sequence);
        write_u32(&mut buf, 12, self.checksum);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() != RECORD_LEN {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("record must be {RECORD_LEN} bytes, got {}", buf.len())));
        }
        Ok(Self {
            producer_id: read_u32(buf, 0),
            timestamp: read_u32(buf, 4),
            sequence: read_u32(buf, 8),
            checksum: read_u32(buf, 12),
        })
    }
}

pub fn checksum(producer_id: u32, timestamp: u32, sequence: u32) -> u32 {
    producer_id ^ timestamp ^ sequence
}

pub fn slot_for_index(write_index: u32, capacity: u32) -> u32 {
    write_index % capacity
}

pub fn slot_offset(slot: u32) -> u64 {
    u64::from(slot) * RECORD_LEN as u64
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_xor_of_fields() {
        let record = LogRecord::new(0x1234, 0xdead_beef, 7);
        assert_eq!(record.checksum, 0x1234 ^ 0xdead_beef ^ 7);
        assert!(record.is_intact());
    }

    #[test]
    fn layout_is_little_endian_in_field_order() {
        let record = LogRecord::new(1, 2, 3);
        let buf = record.encode();
        assert_eq!(&buf[0..4], &[1, 0, 0, 0]);
        assert_eq!(&buf[4..8], &[2, 0, 0, 0]);
        assert_eq!(&buf[8..12], &[3, 0, 0, 0]);
        assert_eq!(&buf[12..16], &[1 ^ 2 ^ 3, 0, 0, 0]);
    }

    #[test]
    fn torn_record_fails_checksum() {
        let mut buf = LogRecord::new(42, 1000, 5).encode();
        buf[8] = 6;
        let decoded = LogRecord::decode(&buf).expect("decode");
        assert!(!decoded.is_intact());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = LogRecord::decode(&[0u8; 12]).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn slots_wrap_at_capacity() {
        assert_eq!(slot_for_index(0, 4), 0);
        assert_eq!(slot_for_index(4, 4), 0);
        assert_eq!(slot_for_index(5, 4), 1);
        assert_eq!(slot_offset(3), 48);
    }
}
