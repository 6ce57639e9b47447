use std::fmt;
use std::io::ErrorKind;
use std::ops::Range;

use rand::{rngs::OsRng, RngCore};

use crate::primitives::io::FileIo;
use crate::types::{checksum::Crc32, PageId, Result, StoreError};

/// Magic bytes identifying a tree store file.
pub const META_MAGIC: [u8; 4] = *b"TRST";
/// On-disk format version written by this build.
pub const META_FORMAT_VERSION: u16 = 1;
/// Encoded length of the metadata header.
pub const META_LEN: usize = 32;

const META_MAGIC_RANGE: Range<usize> = 0..4;
const META_VERSION: Range<usize> = 4..6;
const META_TREE_FLAGS: Range<usize> = 6..8;
const META_PAGE_SIZE: Range<usize> = 8..12;
const META_NEXT_PAGE: Range<usize> = 12..16;
const META_SALT: Range<usize> = 16..24;
const META_TREE_ROOT: Range<usize> = 24..28;
const META_CRC32: Range<usize> = 28..32;

/// File metadata stored in slot 0 of a [`FilePageStore`](super::FilePageStore).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Meta {
    /// Size of each page payload in bytes.
    pub page_size: u32,
    /// Format version the file was written with.
    pub format_version: u16,
    /// Next page id to be allocated; data pages start at 1.
    pub next_page: PageId,
    /// Random salt mixed into every page checksum.
    pub salt: u64,
    /// Root page of the tree, `PageId(0)` when none has been recorded.
    pub tree_root: PageId,
    /// Layout flags of the tree, recorded together with the root.
    pub tree_flags: u16,
}

impl Meta {
    /// Builds metadata for a fresh file with a random salt.
    pub fn fresh(page_size: u32) -> Self {
        Self {
            page_size,
            format_version: META_FORMAT_VERSION,
            next_page: PageId(1),
            salt: OsRng.next_u64(),
            tree_root: PageId(0),
            tree_flags: 0,
        }
    }

    /// Number of data pages allocated so far.
    pub fn data_pages(&self) -> u32 {
        self.next_page.0.saturating_sub(1)
    }

    /// Recorded tree root, if any.
    pub fn root(&self) -> Option<PageId> {
        (self.tree_root.0 != 0).then_some(self.tree_root)
    }
}

fn header_crc(buf: &[u8]) -> u32 {
    Crc32::new().chain(&buf[..META_CRC32.start]).value()
}

/// Encodes metadata into a header buffer of at least [`META_LEN`] bytes.
pub fn write_meta(buf: &mut [u8], meta: &Meta) -> Result<()> {
    if buf.len() < META_LEN {
        return Err(StoreError::Invalid("meta buffer too small"));
    }
    buf[..META_LEN].fill(0);
    buf[META_MAGIC_RANGE].copy_from_slice(&META_MAGIC);
    buf[META_VERSION].copy_from_slice(&meta.format_version.to_be_bytes());
    buf[META_TREE_FLAGS].copy_from_slice(&meta.tree_flags.to_be_bytes());
    buf[META_PAGE_SIZE].copy_from_slice(&meta.page_size.to_be_bytes());
    buf[META_NEXT_PAGE].copy_from_slice(&meta.next_page.0.to_be_bytes());
    buf[META_SALT].copy_from_slice(&meta.salt.to_be_bytes());
    buf[META_TREE_ROOT].copy_from_slice(&meta.tree_root.0.to_be_bytes());
    let crc = header_crc(buf);
    buf[META_CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

fn be_u16(buf: &[u8], range: Range<usize>) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&buf[range]);
    u16::from_be_bytes(raw)
}

fn be_u32(buf: &[u8], range: Range<usize>) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[range]);
    u32::from_be_bytes(raw)
}

/// Decodes and verifies a metadata header.
pub fn read_meta(buf: &[u8]) -> Result<Meta> {
    if buf.len() < META_LEN {
        return Err(StoreError::corruption("meta header truncated"));
    }
    if buf[META_MAGIC_RANGE] != META_MAGIC {
        return Err(StoreError::corruption("not a tree store file (bad magic)"));
    }
    let stored_crc = be_u32(buf, META_CRC32);
    if stored_crc != header_crc(buf) {
        return Err(StoreError::corruption("meta header checksum mismatch"));
    }
    let format_version = be_u16(buf, META_VERSION);
    if format_version != META_FORMAT_VERSION {
        return Err(StoreError::corruption(format!(
            "unsupported format version {format_version}"
        )));
    }
    let mut salt = [0u8; 8];
    salt.copy_from_slice(&buf[META_SALT]);
    let meta = Meta {
        page_size: be_u32(buf, META_PAGE_SIZE),
        format_version,
        next_page: PageId(be_u32(buf, META_NEXT_PAGE)),
        salt: u64::from_be_bytes(salt),
        tree_root: PageId(be_u32(buf, META_TREE_ROOT)),
        tree_flags: be_u16(buf, META_TREE_FLAGS),
    };
    if meta.next_page.0 == 0 {
        return Err(StoreError::corruption("meta next_page points at the header"));
    }
    if meta.tree_root.0 >= meta.next_page.0 {
        return Err(StoreError::corruption(format!(
            "meta tree root {} beyond allocated range",
            meta.tree_root
        )));
    }
    Ok(meta)
}

/// Writes a fresh header to offset 0 and syncs it.
pub fn create_meta(io: &dyn FileIo, page_size: u32) -> Result<Meta> {
    let meta = Meta::fresh(page_size);
    store_meta(io, &meta)?;
    io.sync_all()?;
    Ok(meta)
}

/// Overwrites the header at offset 0.
pub fn store_meta(io: &dyn FileIo, meta: &Meta) -> Result<()> {
    let mut buf = [0u8; META_LEN];
    write_meta(&mut buf, meta)?;
    io.write_at(0, &buf)
}

/// Reads and verifies the header at offset 0.
pub fn load_meta(io: &dyn FileIo) -> Result<Meta> {
    let mut buf = [0u8; META_LEN];
    match io.read_at(0, &mut buf) {
        Ok(()) => {}
        Err(StoreError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            return Err(StoreError::corruption("meta header truncated"));
        }
        Err(err) => return Err(err),
    }
    read_meta(&buf)
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tree store meta:")?;
        writeln!(f, "  format_version: {}", self.format_version)?;
        writeln!(f, "  page_size: {}", self.page_size)?;
        writeln!(f, "  data_pages: {}", self.data_pages())?;
        writeln!(f, "  salt: 0x{:016x}", self.salt)?;
        writeln!(f, "  tree_flags: 0x{:04x}", self.tree_flags)?;
        match self.root() {
            Some(root) => write!(f, "  tree_root: {root}"),
            None => write!(f, "  tree_root: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::StdFileIo;
    use tempfile::tempdir;

    #[test]
    fn meta_header_roundtrip() {
        let meta = Meta {
            page_size: 4096,
            format_version: META_FORMAT_VERSION,
            next_page: PageId(9),
            salt: 0x0123_4567_89ab_cdef,
            tree_root: PageId(1),
            tree_flags: 0x0001,
        };
        let mut buf = [0u8; META_LEN];
        write_meta(&mut buf, &meta).unwrap();
        assert_eq!(&buf[..4], b"TRST");
        assert_eq!(read_meta(&buf).unwrap(), meta);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let meta = Meta::fresh(512);
        let mut buf = [0u8; META_LEN];
        write_meta(&mut buf, &meta).unwrap();
        buf[META_PAGE_SIZE.start] ^= 0x40;
        assert!(matches!(read_meta(&buf), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn truncated_file_reports_corruption() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("short.trst")).unwrap();
        io.write_at(0, b"TRST").unwrap();
        assert!(matches!(load_meta(&io), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn create_then_load() {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("meta.trst")).unwrap();
        let created = create_meta(&io, 1024).unwrap();
        let loaded = load_meta(&io).unwrap();
        assert_eq!(created, loaded);
        assert_eq!(loaded.root(), None);
        assert!(loaded.to_string().contains("page_size: 1024"));
    }
}
