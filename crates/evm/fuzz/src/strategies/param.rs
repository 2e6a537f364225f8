use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256, Function, I256, U256};
use rand::{Rng, distr::Alphanumeric, seq::IndexedRandom};

/// Upper bound on the length of generated dynamic arrays.
pub const MAX_ARRAY_LEN: usize = 4;

/// Upper bound on the length of generated `bytes` and `string` values.
const MAX_BYTES_LEN: usize = 64;

/// Samples a value of type `ty`.
///
/// Integers favour their boundaries, addresses are mostly drawn from `addresses`.
pub fn fuzz_param<R: Rng + ?Sized>(
    ty: &DynSolType,
    rng: &mut R,
    addresses: &[Address],
) -> DynSolValue {
    match ty {
        DynSolType::Bool => DynSolValue::Bool(rng.random()),
        DynSolType::Uint(bits) => DynSolValue::Uint(fuzz_uint(*bits, rng), *bits),
        DynSolType::Int(bits) => DynSolValue::Int(fuzz_int(*bits, rng), *bits),
        DynSolType::Address => {
            let known = addresses.choose(rng).copied().filter(|_| rng.random_bool(0.8));
            DynSolValue::Address(known.unwrap_or_else(|| random_bytes::<20, _>(rng).into()))
        }
        DynSolType::FixedBytes(size) => {
            let mut word = B256::ZERO;
            rng.fill(&mut word[..*size]);
            DynSolValue::FixedBytes(word, *size)
        }
        DynSolType::Bytes => {
            let len = rng.random_range(0..=MAX_BYTES_LEN);
            DynSolValue::Bytes((0..len).map(|_| rng.random()).collect())
        }
        DynSolType::String => {
            let len = rng.random_range(0..=MAX_BYTES_LEN / 4);
            DynSolValue::String((0..len).map(|_| rng.sample(Alphanumeric) as char).collect())
        }
        DynSolType::Function => DynSolValue::Function(Function::from(random_bytes::<24, _>(rng))),
        DynSolType::Array(inner) => {
            let len = rng.random_range(0..=MAX_ARRAY_LEN);
            DynSolValue::Array((0..len).map(|_| fuzz_param(inner, rng, addresses)).collect())
        }
        DynSolType::FixedArray(inner, size) => {
            DynSolValue::FixedArray((0..*size).map(|_| fuzz_param(inner, rng, addresses)).collect())
        }
        DynSolType::Tuple(types) => {
            DynSolValue::Tuple(types.iter().map(|t| fuzz_param(t, rng, addresses)).collect())
        }
        // struct types never come out of `DynSolType::parse`
        #[allow(unreachable_patterns)]
        _ => DynSolValue::Tuple(Vec::new()),
    }
}

fn random_bytes<const N: usize, R: Rng + ?Sized>(rng: &mut R) -> [u8; N] {
    let mut out = [0u8; N];
    rng.fill(&mut out[..]);
    out
}

fn random_word<R: Rng + ?Sized>(rng: &mut R) -> U256 {
    U256::from_be_bytes(random_bytes::<32, _>(rng))
}

/// A `uint<bits>`: zero, one, the maximum or a uniform sample.
fn fuzz_uint<R: Rng + ?Sized>(bits: usize, rng: &mut R) -> U256 {
    let max = if bits >= 256 { U256::MAX } else { (U256::from(1) << bits) - U256::from(1) };
    match rng.random_range(0..8) {
        0 => U256::ZERO,
        1 => U256::from(1),
        2 => max,
        3 => U256::from(rng.random_range(0..1_000u64)).min(max),
        _ => random_word(rng) & max,
    }
}

/// An `int<bits>`: zero, minus one, one of the bounds or a uniform sample.
fn fuzz_int<R: Rng + ?Sized>(bits: usize, rng: &mut R) -> I256 {
    let bits = bits.clamp(8, 256);
    let max = I256::from_raw((U256::from(1) << (bits - 1)) - U256::from(1));
    let min = -max - I256::ONE;
    match rng.random_range(0..8) {
        0 => I256::ZERO,
        1 => I256::MINUS_ONE,
        2 => max,
        3 => min,
        _ => {
            // sign extend a random `bits` wide value
            let raw = random_word(rng);
            let shift = 256 - bits;
            I256::from_raw(raw << shift).asr(shift)
        }
    }
}
