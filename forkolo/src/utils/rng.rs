//! Jumpable PRNG used for victim selection.
//!
//! xoshiro256** with the `long_jump` polynomial, so every worker context can
//! be handed a disjoint stream derived from a single pool-level seed. Victim
//! selection only needs a well-distributed generator, not a cryptographic
//! one.

/// 2^192 calls to `next` worth of state-space distance.
const LONG_JUMP: [u64; 4] = [
    0x76e1_5d3e_fefd_cbbf,
    0xc500_4e44_1c52_2fb3,
    0x7771_0069_854e_e241,
    0x3910_9bb0_2acb_e635,
];

#[derive(Clone, Debug)]
pub(crate) struct Xoshiro256 {
    s: [u64; 4],
}

impl Xoshiro256 {
    /// Expands a 64-bit seed into the full 256-bit state with SplitMix64, as
    /// the xoshiro authors recommend. A zero seed is fine; SplitMix64 never
    /// produces the all-zero state.
    pub(crate) fn from_seed(seed: u64) -> Self {
        let mut sm = seed;
        let mut next = move || {
            sm = sm.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = sm;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        };
        Self {
            s: [next(), next(), next(), next()],
        }
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let result = self.s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];
        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform draw from `0..bound`.
    ///
    /// Plain modulo; the bias for bounds this small (worker counts) is far
    /// below anything victim selection could notice.
    pub(crate) fn below(&mut self, bound: usize) -> usize {
        debug_assert!(bound > 0);
        (self.next_u64() % bound as u64) as usize
    }

    /// Advances the state by 2^192 steps. Seeding one generator and
    /// long-jumping once per worker yields non-overlapping streams.
    pub(crate) fn long_jump(&mut self) {
        let mut t = [0u64; 4];
        for &mask in &LONG_JUMP {
            for bit in 0..64 {
                if mask & (1u64 << bit) != 0 {
                    for (acc, s) in t.iter_mut().zip(self.s.iter()) {
                        *acc ^= s;
                    }
                }
                self.next_u64();
            }
        }
        self.s = t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_diverge_after_long_jump() {
        let mut a = Xoshiro256::from_seed(7);
        let mut b = a.clone();
        b.long_jump();

        let head_a: Vec<u64> = (0..32).map(|_| a.next_u64()).collect();
        let head_b: Vec<u64> = (0..32).map(|_| b.next_u64()).collect();
        assert_ne!(head_a, head_b);
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = Xoshiro256::from_seed(42);
        let mut b = Xoshiro256::from_seed(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn below_stays_in_range() {
        let mut rng = Xoshiro256::from_seed(0);
        for bound in 1..16 {
            for _ in 0..1000 {
                assert!(rng.below(bound) < bound);
            }
        }
    }

    #[test]
    fn zero_seed_is_not_degenerate() {
        let mut rng = Xoshiro256::from_seed(0);
        let draws: Vec<u64> = (0..8).map(|_| rng.next_u64()).collect();
        assert!(draws.iter().any(|&x| x != 0));
    }
}
