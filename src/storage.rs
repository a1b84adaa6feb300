//! Backing bytes of the n-gram block.

use std::ops::Deref;

use memmap2::Mmap;

/// Read-only n-gram block, either built in memory or mapped from a file.
pub enum Storage {
    Owned(Vec<u8>),
    Mapped { map: Mmap, start: usize, len: usize },
}

impl Storage {
    pub fn is_mapped(&self) -> bool {
        matches!(self, Storage::Mapped { .. })
    }
}

impl Deref for Storage {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            Storage::Owned(bytes) => bytes,
            Storage::Mapped { map, start, len } => &map[*start..*start + *len],
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Storage::Owned(bytes) => write!(f, "Owned({} bytes)", bytes.len()),
            Storage::Mapped { len, .. } => write!(f, "Mapped({len} bytes)"),
        }
    }
}
