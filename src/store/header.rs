//! On-disk header layout for the mapped store.
//!
//! ```text
//! Offset  Size  Field
//! 0       32    format tag (ASCII, NUL-padded)
//! 32      32    API version string (ASCII, NUL-padded)
//! 64      32    payload version string (ASCII, NUL-padded)
//! 96      8     nextOffset: u64 (native-endian)
//! 104     8     rootOffset: u64 (native-endian)
//! 112     1     dirty: bool (0x00 / 0x01)
//! 113     263   reserved (zeroed forward-compatibility padding)
//! ```

use crate::error::{Result, StoreError};

// ── Constants ──────────────────────────────────────────────────────

/// Fixed width of each of the three ASCII string fields.
pub const TAG_FIELD_SIZE: usize = 32;

/// Format tag identifying this backend. Never change without bumping the
/// API major version.
pub const FORMAT_TAG: &str = "HIERALIGN_MMAP_STORE";

/// Dotted API version string written into new files.
pub const API_VERSION: &str = "1.0";

/// Schema family for the payload layout below the header. Bumped when the
/// genome/segment table layout changes in an incompatible way.
pub const PAYLOAD_VERSION: &str = "1.0";

/// Reserved bytes for forward compatibility.
pub const RESERVED_SIZE: usize = 263;

/// Total on-disk header size, word-aligned.
pub const HEADER_SIZE: usize =
    3 * TAG_FIELD_SIZE + 8 + 8 + 1 + RESERVED_SIZE;

/// Machine-word alignment used for every allocation.
pub const WORD_SIZE: u64 = 8;

/// Sentinel for "no object registered at this offset".
pub const NULL_OFFSET: u64 = 0;

const NEXT_OFFSET_POS: usize = 3 * TAG_FIELD_SIZE;
const ROOT_OFFSET_POS: usize = NEXT_OFFSET_POS + 8;
const DIRTY_POS: usize = ROOT_OFFSET_POS + 8;

const _: () = assert!(HEADER_SIZE % WORD_SIZE as usize == 0);

/// Round `n` up to the next multiple of [`WORD_SIZE`].
pub fn align_round(n: u64) -> u64 {
    let rem = n % WORD_SIZE;
    if rem == 0 {
        n
    } else {
        n + (WORD_SIZE - rem)
    }
}

/// Static helper: does the start of a file look like one of our stores?
pub fn is_mmap_file(initial_bytes: &[u8]) -> bool {
    initial_bytes.len() >= TAG_FIELD_SIZE && read_fixed_str(&initial_bytes[..TAG_FIELD_SIZE]) == FORMAT_TAG
}

fn write_fixed_str(buf: &mut [u8], s: &str) {
    debug_assert!(s.len() <= buf.len(), "string does not fit fixed field");
    for b in buf.iter_mut() {
        *b = 0;
    }
    buf[..s.len()].copy_from_slice(s.as_bytes());
}

fn read_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn major_component(version: &str) -> u16 {
    version
        .split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

// ── StoreHeader ────────────────────────────────────────────────────

/// Parsed view of the fixed-size header prefix.
#[derive(Debug, Clone)]
pub struct StoreHeader {
    pub format: String,
    pub api_version: String,
    pub payload_version: String,
    pub next_offset: u64,
    pub root_offset: u64,
    pub dirty: bool,
}

impl StoreHeader {
    /// Header for a freshly created file: empty root, dirty (the caller is
    /// about to start a write session), `nextOffset` parked right after the
    /// header.
    pub fn fresh() -> Self {
        Self {
            format: FORMAT_TAG.to_string(),
            api_version: API_VERSION.to_string(),
            payload_version: PAYLOAD_VERSION.to_string(),
            next_offset: align_round(HEADER_SIZE as u64),
            root_offset: NULL_OFFSET,
            dirty: true,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        write_fixed_str(&mut buf[0..TAG_FIELD_SIZE], &self.format);
        write_fixed_str(&mut buf[TAG_FIELD_SIZE..2 * TAG_FIELD_SIZE], &self.api_version);
        write_fixed_str(
            &mut buf[2 * TAG_FIELD_SIZE..3 * TAG_FIELD_SIZE],
            &self.payload_version,
        );
        buf[NEXT_OFFSET_POS..NEXT_OFFSET_POS + 8].copy_from_slice(&self.next_offset.to_ne_bytes());
        buf[ROOT_OFFSET_POS..ROOT_OFFSET_POS + 8].copy_from_slice(&self.root_offset.to_ne_bytes());
        buf[DIRTY_POS] = self.dirty as u8;
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(StoreError::FormatInvalid {
                expected: format!("at least {HEADER_SIZE} bytes"),
                found: format!("{} bytes", bytes.len()),
            });
        }
        let format = read_fixed_str(&bytes[0..TAG_FIELD_SIZE]);
        if format != FORMAT_TAG {
            return Err(StoreError::FormatInvalid {
                expected: FORMAT_TAG.to_string(),
                found: format,
            });
        }
        let api_version = read_fixed_str(&bytes[TAG_FIELD_SIZE..2 * TAG_FIELD_SIZE]);
        let payload_version = read_fixed_str(&bytes[2 * TAG_FIELD_SIZE..3 * TAG_FIELD_SIZE]);

        let impl_major = major_component(API_VERSION);
        let file_major = major_component(&api_version);
        if file_major != impl_major {
            return Err(StoreError::VersionMismatch {
                file_major,
                impl_major,
            });
        }

        let next_offset = u64::from_ne_bytes(bytes[NEXT_OFFSET_POS..NEXT_OFFSET_POS + 8].try_into().unwrap());
        let root_offset = u64::from_ne_bytes(bytes[ROOT_OFFSET_POS..ROOT_OFFSET_POS + 8].try_into().unwrap());
        let dirty = bytes[DIRTY_POS] != 0;

        Ok(Self {
            format,
            api_version,
            payload_version,
            next_offset,
            root_offset,
            dirty,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────
