/*
 * Copyright 2021 Luca Fulchir <luker@fenrirproject.org>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Doorkeeper: a per-epoch Bloom filter that cheaply rejects single-touch
//! keys from competing with established residents.
//!
//! Sized for `samples` expected insertions at a 0.01 target false-positive
//! rate, with `k` bit positions derived from one 64-bit hash via
//! Kirsch-Mitzenmacher double hashing (`h1 + i*h2`), rather than computing
//! `k` independent hashes.
//!
//! Polarity (spec.md §4.3/§4.9): `allow(h)` returns `true` when `h` was
//! already present going in -- "seen before, admit". A first-ever touch
//! sets the bits and returns `false`. This is the polarity
//! `original_source/cahe.go`'s admission gate assumes:
//! `if !bouncer.allow(candidate) { reject }`.

use bitvec::prelude::*;

pub(crate) struct Doorkeeper {
    bits: BitVec<u64, Lsb0>,
    num_bits: u64,
    num_hashes: u32,
}

impl Doorkeeper {
    pub(crate) fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-6, 0.5);
        let m = (-(n * p.ln()) / (std::f64::consts::LN_2.powi(2))).ceil();
        let num_bits = (m as u64).max(8);
        let k = ((num_bits as f64 / n) * std::f64::consts::LN_2).round();
        let num_hashes = (k as u32).clamp(1, 16);
        Doorkeeper {
            bits: bitvec![u64, Lsb0; 0; num_bits as usize],
            num_bits,
            num_hashes,
        }
    }

    fn positions(&self, h: u64) -> impl Iterator<Item = usize> + '_ {
        let h1 = h;
        let h2 = h.rotate_left(32) | 1; // keep it odd, decorrelated from h1
        (0..self.num_hashes).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            (combined % self.num_bits) as usize
        })
    }

    /// Returns `true` iff `h` had already been recorded this epoch (every
    /// bit was already set); otherwise records it and returns `false`.
    pub(crate) fn allow(&mut self, h: u64) -> bool {
        let mut already_present = true;
        for pos in self.positions(h).collect::<Vec<_>>() {
            if !self.bits[pos] {
                already_present = false;
                self.bits.set(pos, true);
            }
        }
        already_present
    }

    pub(crate) fn reset(&mut self) {
        self.bits.fill(false);
    }
}
