// CPU radix sort for splat draw order
// 4 passes of 8 bits over 32-bit keys, each pass a stable counting scatter:
//   histogram -> exclusive prefix sum -> scatter
// Stability is what breaks depth ties by original splat index.

pub const RADIX: usize = 256;
const PASSES: u32 = 4;

/// Maps an f32 to a u32 whose unsigned order matches the float order
/// (negative values below positive, -inf lowest, +inf highest).
#[inline]
pub fn float_to_sortable(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

/// Key/value radix sorter that keeps its scratch buffers between sorts
#[derive(Debug, Default, Clone)]
pub struct RadixSorter {
    keys_temp: Vec<u32>,
    values_temp: Vec<u32>,
    histogram: Vec<usize>,
}

impl RadixSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys_temp: Vec::with_capacity(capacity),
            values_temp: Vec::with_capacity(capacity),
            histogram: vec![0; RADIX],
        }
    }

    /// Sort `keys` ascending and apply the same permutation to `values`.
    /// Equal keys keep their relative order.
    pub fn sort(&mut self, keys: &mut [u32], values: &mut [u32]) {
        assert_eq!(keys.len(), values.len(), "keys and values must have the same length");
        let n = keys.len();
        if n < 2 {
            return;
        }

        self.keys_temp.resize(n, 0);
        self.values_temp.resize(n, 0);
        self.histogram.resize(RADIX, 0);

        for pass in 0..PASSES {
            let shift = pass * 8;

            self.histogram.fill(0);
            for &key in keys.iter() {
                self.histogram[((key >> shift) & 0xFF) as usize] += 1;
            }

            // All keys share this digit: the pass would be the identity
            if self.histogram.iter().any(|&count| count == n) {
                continue;
            }

            let mut sum = 0;
            for count in self.histogram.iter_mut() {
                let temp = *count;
                *count = sum;
                sum += temp;
            }

            for i in 0..n {
                let key = keys[i];
                let digit = ((key >> shift) & 0xFF) as usize;
                let pos = self.histogram[digit];
                self.histogram[digit] += 1;
                self.keys_temp[pos] = key;
                self.values_temp[pos] = values[i];
            }

            keys.copy_from_slice(&self.keys_temp[..n]);
            values.copy_from_slice(&self.values_temp[..n]);
        }
    }
}
