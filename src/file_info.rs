//! `FileInfo`: description of one RemoteFile-addressable file (§3).

/// Command sentinel address: control messages are written here.
///
/// This is the logical 30-bit address (what [`crate::rmf::address_decode`]
/// returns), not the raw encoded wire bytes — the 4-byte long-form header
/// additionally sets the high bit and, when `more_bit` is set, bit 30, so
/// this same address is carried on the wire as `0xBFFF_FC00`.
pub const CMD_ADDRESS: u32 = 0x3FFF_FC00;

/// Invalid address marker: outside the valid 30-bit address region.
pub const INVALID_ADDRESS: u32 = 0x7FFF_FFFF;

/// Start of the low (2-byte header) address range.
pub const LOW_ADDR_MIN: u32 = 0x0000_0000;
/// End (inclusive) of the low address range: `16 KiB - 1`.
pub const LOW_ADDR_MAX: u32 = 0x0000_3FFF;
/// Start of the high (4-byte header) data address range: `16 KiB`.
pub const HIGH_ADDR_MIN: u32 = 0x0000_4000;
/// End (inclusive) of the high data address range, just below the command
/// sentinel: `1 GiB - 1025`.
pub const HIGH_ADDR_MAX: u32 = 0x3FFF_FBFF;

/// Below this, the 2-byte address header encoding applies.
pub const SHORT_HEADER_ADDR_MAX: u32 = LOW_ADDR_MAX;

/// Default base address for auto-inserted node definition files.
pub const DEFINITION_BASE: u32 = 0x0400_0000;

/// Maximum length of a file name, in bytes (§3).
pub const MAX_NAME_LEN: usize = 255;

/// Digest byte width carried in `PUBLISH_FILE` (§4.2).
pub const DIGEST_LEN: usize = 32;

/// What kind of data a file holds and how its size behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Fixed-size file; size never changes after creation.
    Fixed,
    /// Size field is itself an 8-bit length-prefixed blob.
    Dynamic8,
    /// Size field is a 16-bit length-prefixed blob.
    Dynamic16,
    /// Size field is a 32-bit length-prefixed blob.
    Dynamic32,
    /// Unbounded append-only stream.
    Stream,
}

impl FileType {
    /// Wire encoding used by `PUBLISH_FILE` (`fileType: u16 LE`).
    #[must_use]
    pub fn wire_code(self) -> u16 {
        match self {
            FileType::Fixed => 0,
            FileType::Dynamic8 => 1,
            FileType::Dynamic16 => 2,
            FileType::Dynamic32 => 3,
            FileType::Stream => 4,
        }
    }

    /// Inverse of [`FileType::wire_code`].
    #[must_use]
    pub fn from_wire_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => FileType::Fixed,
            1 => FileType::Dynamic8,
            2 => FileType::Dynamic16,
            3 => FileType::Dynamic32,
            4 => FileType::Stream,
            _ => return None,
        })
    }
}

/// Digest algorithm carried alongside a file's content, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestType {
    /// No digest.
    None,
    /// SHA-1 (20 bytes used, rest of the 32-byte field is zero).
    Sha1,
    /// SHA-256 (full 32-byte field used).
    Sha256,
}

impl DigestType {
    /// Wire encoding used by `PUBLISH_FILE` (`digestType: u16 LE`).
    #[must_use]
    pub fn wire_code(self) -> u16 {
        match self {
            DigestType::None => 0,
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
        }
    }

    /// Inverse of [`DigestType::wire_code`].
    #[must_use]
    pub fn from_wire_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => DigestType::None,
            1 => DigestType::Sha1,
            2 => DigestType::Sha256,
            _ => return None,
        })
    }
}

/// Which side of the connection created this `FileInfo` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Created by this side; lives in the local `FileMap`.
    Local,
    /// Announced by the peer; lives in the remote `FileMap`.
    Remote,
}

/// Description of one addressable file (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// File name, including its `.apx`/`.out`/`.in` extension. At most
    /// [`MAX_NAME_LEN`] bytes.
    pub name: String,
    /// Start address of the file's region.
    pub address: u32,
    /// Size of the file's region in bytes.
    pub size: u32,
    /// Kind of file.
    pub file_type: FileType,
    /// Digest algorithm used, if any.
    pub digest_type: DigestType,
    /// Digest bytes; always [`DIGEST_LEN`] wide, zero-padded.
    pub digest: [u8; DIGEST_LEN],
    /// Which side created this entry.
    pub owner: Owner,
    /// Whether the peer (or us, for remote files we opened) has this file
    /// open.
    pub open: bool,
    /// Whether this file has received its first write yet (used to drive
    /// the CONNECTED transition in the node lifecycle, §3).
    pub has_first_write: bool,
}

impl FileInfo {
    /// Create a new local file description with no digest and default
    /// (non-open, no-write-yet) flags.
    #[must_use]
    pub fn new_local(name: impl Into<String>, address: u32, size: u32, file_type: FileType) -> Self {
        Self {
            name: name.into(),
            address,
            size,
            file_type,
            digest_type: DigestType::None,
            digest: [0; DIGEST_LEN],
            owner: Owner::Local,
            open: false,
            has_first_write: false,
        }
    }

    /// End address of this file's region, exclusive.
    #[must_use]
    pub fn end_address(&self) -> u32 {
        self.address.saturating_add(self.size)
    }

    /// Whether `addr` lies within `[address, end_address)`.
    #[must_use]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.address && addr < self.end_address()
    }

    /// True if this file's name ends in `.apx` (a node definition file).
    #[must_use]
    pub fn is_definition(&self) -> bool {
        self.name.ends_with(".apx")
    }

    /// True if this file's name ends in `.out` (a provide-port data file).
    #[must_use]
    pub fn is_provide_data(&self) -> bool {
        self.name.ends_with(".out")
    }

    /// True if this file's name ends in `.in` (a require-port data file).
    #[must_use]
    pub fn is_require_data(&self) -> bool {
        self.name.ends_with(".in")
    }

    /// Node name this file belongs to, derived by stripping the extension.
    #[must_use]
    pub fn node_name(&self) -> Option<&str> {
        for ext in [".apx", ".out", ".in"] {
            if let Some(stripped) = self.name.strip_suffix(ext) {
                return Some(stripped);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_classification() {
        let f = FileInfo::new_local("TestNode1.out", 0, 2, FileType::Fixed);
        assert!(f.is_provide_data());
        assert_eq!(f.node_name(), Some("TestNode1"));
    }

    #[test]
    fn contains_half_open_range() {
        let f = FileInfo::new_local("x.out", 100, 10, FileType::Fixed);
        assert!(!f.contains(99));
        assert!(f.contains(100));
        assert!(f.contains(109));
        assert!(!f.contains(110));
    }

    #[test]
    fn wire_codes_roundtrip() {
        for ft in [
            FileType::Fixed,
            FileType::Dynamic8,
            FileType::Dynamic16,
            FileType::Dynamic32,
            FileType::Stream,
        ] {
            assert_eq!(FileType::from_wire_code(ft.wire_code()), Some(ft));
        }
        for dt in [DigestType::None, DigestType::Sha1, DigestType::Sha256] {
            assert_eq!(DigestType::from_wire_code(dt.wire_code()), Some(dt));
        }
    }
}
