//! Binary model file.
//!
//! ```text
//! "Trie Language Model"            19 ASCII bytes
//! order: u8
//! counts: u64 x order              counts[0] is the vocabulary size
//! quant_type: i32
//! quantizer bins                   f32 x 65536 per table, empty for NoQuant
//! unigrams: 16 bytes x (counts[0] + 1)
//! n-gram block                     middle tables, then the longest table
//! words: u64 byte length, then NUL-terminated strings in id order
//! ```
//!
//! All scalars are little-endian.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use memmap2::Mmap;
use tracing::{info, warn};

use crate::bits;
use crate::error::{Result, TrieError};
use crate::layout::{TrieLayout, Unigram, UNIGRAM_BYTES};
use crate::quant::{read_exact_or_truncated, QuantType, Quantizer};
use crate::storage::Storage;
use crate::trie::NgramTrie;
use crate::WordId;

pub const MAGIC: &[u8; 19] = b"Trie Language Model";

// =============================================================================
// Word strings
// =============================================================================

/// Word strings indexed by word id, with a reverse map for lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordStrings {
    words: Vec<String>,
    index: HashMap<String, WordId>,
}

impl WordStrings {
    /// A repeated word keeps its first id.
    pub fn new(words: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(words.len());
        for (id, word) in words.iter().enumerate() {
            if index.contains_key(word) {
                warn!(word = %word, "duplicate word in dictionary");
                continue;
            }
            index.insert(word.clone(), id as WordId);
        }
        Self { words, index }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, id: WordId) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn id_of(&self, word: &str) -> Option<WordId> {
        self.index.get(word).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    fn byte_len(&self) -> u64 {
        self.words.iter().map(|w| w.len() as u64 + 1).sum()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.byte_len().to_le_bytes())?;
        for word in &self.words {
            w.write_all(word.as_bytes())?;
            w.write_all(&[0])?;
        }
        Ok(())
    }

    /// Read a table that must hold exactly `expected` words.
    pub fn read_from<R: Read>(r: &mut R, expected: u64) -> Result<Self> {
        let len = read_u64(r, "word string length")?;
        let bytes = read_vec(r, len, "word strings")?;
        Self::parse(&bytes, expected)
    }

    fn parse(bytes: &[u8], expected: u64) -> Result<Self> {
        let terminators = bytes.iter().filter(|&&b| b == 0).count() as u64;
        if terminators != expected {
            return Err(TrieError::WordCountMismatch {
                expected,
                actual: terminators,
            });
        }
        let words = bytes
            .split(|&b| b == 0)
            .take(expected as usize)
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .collect();
        Ok(Self::new(words))
    }
}

impl From<Vec<String>> for WordStrings {
    fn from(words: Vec<String>) -> Self {
        Self::new(words)
    }
}

impl<'a> FromIterator<&'a str> for WordStrings {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(str::to_owned).collect())
    }
}

// =============================================================================
// Header and tables
// =============================================================================

/// Read exactly `len` bytes. The buffer grows with the data actually read,
/// so a bogus length fails as truncated instead of allocating up front.
fn read_vec<R: Read>(r: &mut R, len: u64, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    r.by_ref().take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(TrieError::Truncated {
            what,
            expected: len,
            actual: buf.len() as u64,
        });
    }
    Ok(buf)
}

fn read_u64<R: Read>(r: &mut R, what: &'static str) -> Result<u64> {
    let mut b = [0u8; 8];
    read_exact_or_truncated(r, &mut b, what)?;
    Ok(u64::from_le_bytes(b))
}

/// Everything before the n-gram block.
struct Head {
    counts: Vec<u64>,
    quant: Quantizer,
    unigrams: Vec<Unigram>,
    layout: TrieLayout,
}

fn read_head<R: Read>(r: &mut R) -> Result<Head> {
    let mut magic = [0u8; MAGIC.len()];
    match read_exact_or_truncated(r, &mut magic, "header") {
        Ok(()) if &magic == MAGIC => {}
        Ok(()) | Err(TrieError::Truncated { .. }) => return Err(TrieError::BadHeader),
        Err(e) => return Err(e),
    }

    let mut order = [0u8; 1];
    read_exact_or_truncated(r, &mut order, "order")?;
    let order = usize::from(order[0]);
    if !(2..=crate::MAX_ORDER).contains(&order) {
        return Err(TrieError::InvalidOrder(order));
    }
    let counts = (0..order)
        .map(|_| read_u64(r, "counts"))
        .collect::<Result<Vec<_>>>()?;

    let mut kind = [0u8; 4];
    read_exact_or_truncated(r, &mut kind, "quantization type")?;
    let kind = QuantType::try_from(i32::from_le_bytes(kind))?;
    let layout = TrieLayout::new(&counts, kind)?;
    let quant = Quantizer::read_tables(kind, order, r)?;

    // The layout caps the vocabulary at u32::MAX, so this cannot overflow.
    let unigram_bytes = (counts[0] + 1) * UNIGRAM_BYTES as u64;
    let raw = read_vec(r, unigram_bytes, "unigrams")?;
    let unigrams: Vec<Unigram> = raw.chunks_exact(UNIGRAM_BYTES).map(Unigram::from_bytes).collect();
    check_unigrams(&unigrams, counts[1])?;

    Ok(Head {
        counts,
        quant,
        unigrams,
        layout,
    })
}

/// Child pointers must be monotonic and cover exactly the order-2 table.
fn check_unigrams(unigrams: &[Unigram], bigrams: u64) -> Result<()> {
    if unigrams.windows(2).any(|w| w[0].next > w[1].next) {
        return Err(TrieError::Corrupt("unigram child pointers are not monotonic"));
    }
    match (unigrams.first(), unigrams.last()) {
        (Some(first), Some(last)) if first.next == 0 && last.next == bigrams => Ok(()),
        _ => Err(TrieError::Corrupt("unigram child pointers do not cover the order-2 table")),
    }
}

// =============================================================================
// Whole file
// =============================================================================

/// Write `trie` and its word strings.
pub fn write_model<W: Write>(trie: &NgramTrie, words: &WordStrings, w: &mut W) -> Result<()> {
    if words.len() as u64 != trie.vocab_size() {
        return Err(TrieError::WordCountMismatch {
            expected: trie.vocab_size(),
            actual: words.len() as u64,
        });
    }
    w.write_all(MAGIC)?;
    w.write_all(&[trie.order() as u8])?;
    for count in trie.counts() {
        w.write_all(&count.to_le_bytes())?;
    }
    w.write_all(&(trie.quant_type() as i32).to_le_bytes())?;
    trie.quant.write_tables(w)?;

    let mut raw = Vec::with_capacity(trie.unigrams.len() * UNIGRAM_BYTES);
    for u in &trie.unigrams {
        raw.extend_from_slice(&u.to_bytes());
    }
    w.write_all(&raw)?;
    w.write_all(trie.block())?;
    words.write_to(w)?;
    w.flush()?;
    Ok(())
}

/// Read a model file from a stream, copying the n-gram block into memory.
pub fn read_model<R: Read>(r: &mut R) -> Result<(NgramTrie, WordStrings)> {
    bits::sanity_check()?;
    let head = read_head(r)?;
    let block = read_vec(r, head.layout.block_size as u64, "n-gram block")?;
    head.layout.check_next_pointers(&block, &head.counts)?;
    let words = WordStrings::read_from(r, head.counts[0])?;
    info!(
        order = head.counts.len(),
        vocab = head.counts[0],
        bytes = block.len(),
        "read trie model"
    );
    let trie = NgramTrie::from_parts(head.counts, head.unigrams, head.layout, Storage::Owned(block), head.quant);
    Ok((trie, words))
}

/// Map a model file and use its n-gram block in place.
pub fn map_model(path: impl AsRef<Path>) -> Result<(NgramTrie, WordStrings)> {
    bits::sanity_check()?;
    let file = File::open(path.as_ref())?;
    // SAFETY: the mapping is read-only; the file must not be truncated or
    // rewritten while the model is alive.
    let map = unsafe { Mmap::map(&file)? };

    let mut cursor: &[u8] = &map;
    let head = read_head(&mut cursor)?;
    let start = map.len() - cursor.len();
    let len = head.layout.block_size;
    if cursor.len() < len {
        return Err(TrieError::Truncated {
            what: "n-gram block",
            expected: len as u64,
            actual: cursor.len() as u64,
        });
    }
    head.layout.check_next_pointers(&cursor[..len], &head.counts)?;
    let mut rest = &cursor[len..];
    let words = WordStrings::read_from(&mut rest, head.counts[0])?;
    info!(
        path = %path.as_ref().display(),
        order = head.counts.len(),
        vocab = head.counts[0],
        bytes = len,
        "mapped trie model"
    );
    let storage = Storage::Mapped { map, start, len };
    let trie = NgramTrie::from_parts(head.counts, head.unigrams, head.layout, storage, head.quant);
    Ok((trie, words))
}
