//! Histogram quantization of n-gram weights.
//!
//! `Quant16` replaces each probability and backoff with a 16-bit index into a
//! trained table of bin centers. Bins are equal-frequency, so resolution
//! concentrates where the weights do. `NoQuant` stores raw floats through the
//! bit packer instead (31-bit sign-less probability, 32-bit backoff).
//!
//! Unigrams are never quantized.

use std::io::{Read, Write};

use crate::bits::{
    low_mask, read_bits, read_float32, read_nonpositive_float31, write_bits, write_float32,
    write_nonpositive_float31,
};
use crate::error::{Result, TrieError};

/// Quantization scheme, persisted as its `i32` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum QuantType {
    NoQuant = 0,
    Quant16 = 1,
}

impl QuantType {
    /// Bits used for the weights of a middle-order record.
    pub fn middle_bits(self) -> u8 {
        match self {
            QuantType::NoQuant => 63,
            QuantType::Quant16 => 32,
        }
    }

    /// Bits used for the probability of a longest-order record.
    pub fn longest_bits(self) -> u8 {
        match self {
            QuantType::NoQuant => 31,
            QuantType::Quant16 => 16,
        }
    }

    fn code_bits(self) -> u8 {
        match self {
            QuantType::NoQuant => 0,
            QuantType::Quant16 => 16,
        }
    }

    /// Bytes occupied by all bin tables of a model of `order`.
    pub fn table_bytes(self, order: usize) -> u64 {
        let bits = self.code_bits();
        if bits == 0 {
            return 0;
        }
        let table = (1u64 << bits) * std::mem::size_of::<f32>() as u64;
        // Two tables (prob, backoff) per middle order, one for the longest.
        (order as u64 - 2) * 2 * table + table
    }
}

impl TryFrom<i32> for QuantType {
    type Error = TrieError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(QuantType::NoQuant),
            1 => Ok(QuantType::Quant16),
            other => Err(TrieError::UnsupportedQuantization(other)),
        }
    }
}

// =============================================================================
// Bins
// =============================================================================

/// Sorted bin centers for one field of one order.
#[derive(Clone, Debug, PartialEq)]
pub struct Bins {
    centers: Vec<f32>,
}

impl Bins {
    pub(crate) fn zeroed(bits: u8) -> Self {
        Self {
            centers: vec![0.0; 1usize << bits],
        }
    }

    pub fn centers(&self) -> &[f32] {
        &self.centers
    }

    /// Fit the centers to `values` with a greedy equal-frequency histogram.
    ///
    /// The sorted values are cut into `len` runs of (nearly) equal count and
    /// each center is the mean of its run. An empty run repeats the previous
    /// center, or `-inf` for the first one.
    pub fn train(&mut self, values: &mut [f32]) {
        values.sort_unstable_by(|a, b| a.total_cmp(b));
        let n = values.len() as u64;
        let bins = self.centers.len() as u64;
        let mut start = 0usize;
        for i in 0..self.centers.len() {
            let finish = (n * (i as u64 + 1) / bins) as usize;
            self.centers[i] = if finish == start {
                if i == 0 {
                    f32::NEG_INFINITY
                } else {
                    self.centers[i - 1]
                }
            } else {
                let run = &values[start..finish];
                // Rounding can push the mean outside its run; keep centers sorted.
                let mean = run.iter().sum::<f32>() / run.len() as f32;
                mean.max(run[0]).min(run[run.len() - 1])
            };
            start = finish;
        }
    }

    /// Index of the center nearest to `value`; ties go to the lower index.
    pub fn encode(&self, value: f32) -> u64 {
        let above = self.centers.partition_point(|&c| c < value);
        if above == 0 {
            return 0;
        }
        if above == self.centers.len() {
            return (self.centers.len() - 1) as u64;
        }
        let below = above - 1;
        if value - self.centers[below] <= self.centers[above] - value {
            below as u64
        } else {
            above as u64
        }
    }

    #[inline]
    pub fn decode(&self, code: u64) -> f32 {
        self.centers[code as usize]
    }
}

// =============================================================================
// Quantizer
// =============================================================================

/// Bin tables for every quantized order, plus the read/write paths that turn
/// weights into packed bits.
#[derive(Clone, Debug)]
pub struct Quantizer {
    kind: QuantType,
    /// `(prob, backoff)` bins per middle order, indexed by `order - 2`.
    middle: Vec<(Bins, Bins)>,
    longest: Option<Bins>,
    prob_bits: u8,
    bo_bits: u8,
}

impl Quantizer {
    pub fn new(kind: QuantType, order: usize) -> Result<Self> {
        if !(2..=crate::MAX_ORDER).contains(&order) {
            return Err(TrieError::InvalidOrder(order));
        }
        let bits = kind.code_bits();
        let (middle, longest) = match kind {
            QuantType::NoQuant => (Vec::new(), None),
            QuantType::Quant16 => (
                (2..order)
                    .map(|_| (Bins::zeroed(bits), Bins::zeroed(bits)))
                    .collect(),
                Some(Bins::zeroed(bits)),
            ),
        };
        Ok(Self {
            kind,
            middle,
            longest,
            prob_bits: bits,
            bo_bits: bits,
        })
    }

    pub fn kind(&self) -> QuantType {
        self.kind
    }

    pub fn needs_training(&self) -> bool {
        self.kind != QuantType::NoQuant
    }

    pub fn middle_bits(&self) -> u8 {
        self.kind.middle_bits()
    }

    pub fn longest_bits(&self) -> u8 {
        self.kind.longest_bits()
    }

    pub fn memory_usage(&self) -> usize {
        self.kind.table_bytes(self.middle.len() + 2) as usize
    }

    /// Train the probability and backoff bins of middle order `order`.
    pub fn train(&mut self, order: usize, probs: &mut [f32], backoffs: &mut [f32]) {
        if let Some((p, b)) = self.middle.get_mut(order - 2) {
            p.train(probs);
            b.train(backoffs);
        }
    }

    /// Train the probability bins of the longest order.
    pub fn train_prob(&mut self, probs: &mut [f32]) {
        if let Some(bins) = self.longest.as_mut() {
            bins.train(probs);
        }
    }

    pub fn middle_bins(&self, order_minus_2: usize) -> Option<&(Bins, Bins)> {
        self.middle.get(order_minus_2)
    }

    pub fn longest_bins(&self) -> Option<&Bins> {
        self.longest.as_ref()
    }

    // -------------------------------------------------------------------------
    // Packed weights
    // -------------------------------------------------------------------------

    /// Write middle-order weights at `bit_off`.
    ///
    /// Quant16 packs `(prob_code << 16) | backoff_code` into one 32-bit field;
    /// NoQuant stores the 31-bit probability followed by the 32-bit backoff.
    pub fn write_middle(
        &self,
        buf: &mut [u8],
        bit_off: u64,
        order_minus_2: usize,
        prob: f32,
        backoff: f32,
    ) {
        match self.kind {
            QuantType::NoQuant => {
                write_nonpositive_float31(buf, bit_off, prob);
                write_float32(buf, bit_off + 31, backoff);
            }
            QuantType::Quant16 => {
                let (p, b) = &self.middle[order_minus_2];
                let packed = (p.encode(prob) << self.bo_bits) | b.encode(backoff);
                write_bits(buf, bit_off, self.prob_bits + self.bo_bits, packed);
            }
        }
    }

    pub fn write_longest(&self, buf: &mut [u8], bit_off: u64, prob: f32) {
        match self.kind {
            QuantType::NoQuant => write_nonpositive_float31(buf, bit_off, prob),
            QuantType::Quant16 => {
                let code = self.longest_table().encode(prob);
                write_bits(buf, bit_off, self.prob_bits, code);
            }
        }
    }

    pub fn read_middle_prob(&self, buf: &[u8], bit_off: u64, order_minus_2: usize) -> f32 {
        match self.kind {
            QuantType::NoQuant => read_nonpositive_float31(buf, bit_off),
            QuantType::Quant16 => {
                let code = read_bits(
                    buf,
                    bit_off + u64::from(self.bo_bits),
                    self.prob_bits,
                    low_mask(self.prob_bits),
                );
                self.middle[order_minus_2].0.decode(code)
            }
        }
    }

    pub fn read_middle_backoff(&self, buf: &[u8], bit_off: u64, order_minus_2: usize) -> f32 {
        match self.kind {
            QuantType::NoQuant => read_float32(buf, bit_off + 31),
            QuantType::Quant16 => {
                let code = read_bits(buf, bit_off, self.bo_bits, low_mask(self.bo_bits));
                self.middle[order_minus_2].1.decode(code)
            }
        }
    }

    pub fn read_longest_prob(&self, buf: &[u8], bit_off: u64) -> f32 {
        match self.kind {
            QuantType::NoQuant => read_nonpositive_float31(buf, bit_off),
            QuantType::Quant16 => {
                let code = read_bits(buf, bit_off, self.prob_bits, low_mask(self.prob_bits));
                self.longest_table().decode(code)
            }
        }
    }

    #[inline]
    fn longest_table(&self) -> &Bins {
        // Present for every kind that reads codes.
        self.longest
            .as_ref()
            .unwrap_or_else(|| unreachable!("quantized model without longest bins"))
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Write the bin block: middle orders (prob then backoff), then longest.
    pub fn write_tables<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let mut write_bins = |bins: &Bins| -> std::io::Result<()> {
            let mut bytes = Vec::with_capacity(bins.centers.len() * 4);
            for c in &bins.centers {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
            w.write_all(&bytes)
        };
        for (p, b) in &self.middle {
            write_bins(p)?;
            write_bins(b)?;
        }
        if let Some(longest) = &self.longest {
            write_bins(longest)?;
        }
        Ok(())
    }

    /// Read a bin block written by [`Quantizer::write_tables`].
    pub fn read_tables<R: Read>(kind: QuantType, order: usize, r: &mut R) -> Result<Self> {
        let mut quant = Self::new(kind, order)?;
        let expected = kind.table_bytes(order);
        let mut bytes = vec![0u8; expected as usize];
        read_exact_or_truncated(r, &mut bytes, "quantizer tables")?;

        let mut chunks = bytes.chunks_exact(4).map(|c| {
            let mut w = [0u8; 4];
            w.copy_from_slice(c);
            f32::from_le_bytes(w)
        });
        let mut fill = |bins: &mut Bins| {
            for (slot, v) in bins.centers.iter_mut().zip(&mut chunks) {
                *slot = v;
            }
        };
        for (p, b) in &mut quant.middle {
            fill(p);
            fill(b);
        }
        if let Some(longest) = quant.longest.as_mut() {
            fill(longest);
        }
        Ok(quant)
    }
}

pub(crate) fn read_exact_or_truncated<R: Read>(
    r: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<()> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(TrieError::Truncated {
                    what,
                    expected: buf.len() as u64,
                    actual: filled as u64,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
