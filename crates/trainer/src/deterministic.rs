//! Reproducible randomness and split ordering
//!
//! Shuffles and split choices depend only on the seed and the data, never
//! on the platform or on hash-map iteration order.

/// 31-bit linear congruential generator (glibc `rand` parameters).
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: u64,
}

const LCG_A: u64 = 1_103_515_245;
const LCG_C: u64 = 12_345;
const LCG_MASK: u64 = (1 << 31) - 1;

impl LcgRng {
    /// Negative seeds use their magnitude.
    pub fn new(seed: i64) -> Self {
        Self {
            state: seed.unsigned_abs() & LCG_MASK,
        }
    }

    /// Next value in `[0, 2^31)`.
    pub fn next_i64(&mut self) -> i64 {
        self.state = (self.state.wrapping_mul(LCG_A).wrapping_add(LCG_C)) & LCG_MASK;
        self.state as i64
    }

    /// Next value in `[0, bound)`; 0 when `bound` is not positive.
    pub fn next_range(&mut self, bound: i64) -> i64 {
        if bound > 0 {
            self.next_i64() % bound
        } else {
            0
        }
    }

    /// In-place Fisher–Yates.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for upper in (1..items.len()).rev() {
            let pick = self.next_range(upper as i64 + 1) as usize;
            items.swap(upper, pick);
        }
    }
}

/// Total order over equal-gain split candidates: lowest feature, then
/// lowest threshold, then lowest node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SplitTieBreaker {
    pub feature_idx: usize,
    pub threshold: i64,
    pub node_id: usize,
}

impl SplitTieBreaker {
    pub fn new(feature_idx: usize, threshold: i64, node_id: usize) -> Self {
        Self { feature_idx, threshold, node_id }
    }
}
