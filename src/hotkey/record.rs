//! Kernel `input_event` records.
//!
//! Records are decoded field by field from the raw byte stream instead of
//! overlaying a struct on the read buffer. Layout (64-bit Linux ABI,
//! little-endian):
//!
//! | offset | size | field                |
//! |--------|------|----------------------|
//! | 0      | 8    | seconds (i64)        |
//! | 8      | 8    | microseconds (i64)   |
//! | 16     | 2    | event type (u16)     |
//! | 18     | 2    | event code (u16)     |
//! | 20     | 4    | value (i32)          |

/// Size in bytes of one record.
pub const RECORD_SIZE: usize = 24;

/// `EV_KEY` event type.
pub const EV_KEY: u16 = 0x01;

/// Key event values.
pub const KEY_RELEASE: i32 = 0;
pub const KEY_PRESS: i32 = 1;
pub const KEY_REPEAT: i32 = 2;

/// One decoded input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRecord {
    pub time_sec: i64,
    pub time_usec: i64,
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
}

impl InputRecord {
    /// Decode one record from exactly `RECORD_SIZE` bytes.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut sec = [0u8; 8];
        let mut usec = [0u8; 8];
        sec.copy_from_slice(&bytes[0..8]);
        usec.copy_from_slice(&bytes[8..16]);
        Self {
            time_sec: i64::from_le_bytes(sec),
            time_usec: i64::from_le_bytes(usec),
            event_type: u16::from_le_bytes([bytes[16], bytes[17]]),
            code: u16::from_le_bytes([bytes[18], bytes[19]]),
            value: i32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
        }
    }

    /// Encode into the kernel byte layout.
    #[cfg(test)]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..8].copy_from_slice(&self.time_sec.to_le_bytes());
        out[8..16].copy_from_slice(&self.time_usec.to_le_bytes());
        out[16..18].copy_from_slice(&self.event_type.to_le_bytes());
        out[18..20].copy_from_slice(&self.code.to_le_bytes());
        out[20..24].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    /// Convenience constructor for an `EV_KEY` record.
    #[cfg(test)]
    pub fn key(code: u16, value: i32) -> Self {
        Self {
            time_sec: 0,
            time_usec: 0,
            event_type: EV_KEY,
            code,
            value,
        }
    }

    pub fn is_key(&self) -> bool {
        self.event_type == EV_KEY
    }
}

/// Lazy iterator over the whole records in a buffer.
pub struct Records<'a> {
    chunks: std::slice::ChunksExact<'a, u8>,
}

impl Iterator for Records<'_> {
    type Item = InputRecord;

    fn next(&mut self) -> Option<InputRecord> {
        let chunk = self.chunks.next()?;
        let bytes: &[u8; RECORD_SIZE] = chunk.try_into().ok()?;
        Some(InputRecord::from_bytes(bytes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Records<'_> {}

/// Decode the first `len` bytes of `buf` into records.
///
/// Yields `len / RECORD_SIZE` records; a trailing partial record is not
/// yielded (see [`RecordAssembler`] for carrying it across reads). `len` is
/// clamped to `buf.len()`.
pub fn decode(buf: &[u8], len: usize) -> Records<'_> {
    let valid = &buf[..len.min(buf.len())];
    Records {
        chunks: valid.chunks_exact(RECORD_SIZE),
    }
}

/// Carries a trailing partial record over to the next read.
///
/// evdev nodes only ever return whole records, but a generic byte stream
/// may split one across reads. Bytes left over after the whole records of a
/// read are prepended to the next read.
#[derive(Debug, Default)]
pub struct RecordAssembler {
    pending: Vec<u8>,
}

impl RecordAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes waiting for the rest of their record.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed the bytes of one read, calling `f` for every completed record
    /// in stream order.
    pub fn push(&mut self, bytes: &[u8], mut f: impl FnMut(InputRecord)) {
        let mut rest = bytes;

        if !self.pending.is_empty() {
            let need = RECORD_SIZE - self.pending.len();
            let take = need.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() < RECORD_SIZE {
                return;
            }
            for record in decode(&self.pending, RECORD_SIZE) {
                f(record);
            }
            self.pending.clear();
        }

        let whole = rest.len() - rest.len() % RECORD_SIZE;
        for record in decode(rest, whole) {
            f(record);
        }
        self.pending.extend_from_slice(&rest[whole..]);
    }
}
