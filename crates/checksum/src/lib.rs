//! Incremental CRC-64 used for end-to-end object integrity.
//!
//! The storage service reports `x-oss-hash-crc64ecma`, which is CRC-64/XZ
//! (ECMA-182 polynomial, reflected, init and xorout all ones). [`Crc64`]
//! accumulates that value over a sequence of chunks and can be seeded with a
//! previously computed value to resume across segments.

use crc::{CRC_64_XZ, Crc};

static CRC64_XZ: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Final XOR applied by CRC-64/XZ.
const XOR_OUT: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Reflected form of the ECMA-182 polynomial.
const POLY_REFLECTED: u64 = 0xC96C_5795_D787_0F42;

/// Running CRC-64 accumulator.
///
/// Feeding `a` then `b` yields the same value as feeding `a ++ b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc64 {
    value: u64,
}

impl Default for Crc64 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc64 {
    /// Creates an accumulator for an empty byte sequence.
    pub fn new() -> Self {
        Self { value: 0 }
    }

    /// Resumes from a CRC previously returned by [`value`](Self::value).
    pub fn with_initial(initial: u64) -> Self {
        Self { value: initial }
    }

    /// Folds `data` into the running value.
    pub fn update(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        // `digest_with_initial` reflects its argument, so undo the final XOR
        // and pre-reflect to land the register exactly where it was.
        let mut digest = CRC64_XZ.digest_with_initial((self.value ^ XOR_OUT).reverse_bits());
        digest.update(data);
        self.value = digest.finalize();
    }

    /// Current CRC of everything fed so far.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// CRC of `A ++ B` given `crc(A)`, `crc(B)` and `len(B)`.
    ///
    /// Used to fold per-part CRCs of a multipart upload into the object CRC.
    pub fn combine(crc1: u64, crc2: u64, len2: u64) -> u64 {
        if len2 == 0 {
            return crc1;
        }

        let mut even = [0u64; 64];
        let mut odd = [0u64; 64];

        // Operator for one zero bit.
        odd[0] = POLY_REFLECTED;
        let mut row = 1u64;
        for entry in odd.iter_mut().skip(1) {
            *entry = row;
            row <<= 1;
        }

        // Two zero bits, then four.
        gf2_matrix_square(&mut even, &odd);
        gf2_matrix_square(&mut odd, &even);

        let mut crc1 = crc1;
        let mut len2 = len2;
        loop {
            gf2_matrix_square(&mut even, &odd);
            if len2 & 1 != 0 {
                crc1 = gf2_matrix_times(&even, crc1);
            }
            len2 >>= 1;
            if len2 == 0 {
                break;
            }

            gf2_matrix_square(&mut odd, &even);
            if len2 & 1 != 0 {
                crc1 = gf2_matrix_times(&odd, crc1);
            }
            len2 >>= 1;
            if len2 == 0 {
                break;
            }
        }

        crc1 ^ crc2
    }
}

/// Computes the CRC-64 of a single buffer.
pub fn crc64(data: &[u8]) -> u64 {
    CRC64_XZ.checksum(data)
}

fn gf2_matrix_times(mat: &[u64; 64], mut vec: u64) -> u64 {
    let mut sum = 0u64;
    let mut i = 0;
    while vec != 0 {
        if vec & 1 != 0 {
            sum ^= mat[i];
        }
        vec >>= 1;
        i += 1;
    }
    sum
}

fn gf2_matrix_square(square: &mut [u64; 64], mat: &[u64; 64]) {
    for (n, entry) in square.iter_mut().enumerate() {
        *entry = gf2_matrix_times(mat, mat[n]);
    }
}
