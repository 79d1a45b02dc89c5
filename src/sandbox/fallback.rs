//! Deterministic, non-semantic embeddings used when the model cannot load.
//!
//! Every character contributes a pseudo-random value, derived from its code
//! point and its position, to bucket `position % dims`. The result is
//! L2-normalized so it has the same shape as a model embedding. Only exact
//! textual overlap survives into cosine similarity.

/// Builds the fallback vector for `text`. Empty or whitespace-only text
/// yields the zero vector.
pub fn fallback_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0_f32; dims];
    if dims == 0 || text.trim().is_empty() {
        return vector;
    }

    for (position, ch) in text.chars().enumerate() {
        let code = u64::from(u32::from(ch));
        let seed = code
            .wrapping_mul(131)
            .wrapping_add((position as u64).wrapping_mul(7919));
        vector[position % dims] += unit_value(mix64(seed));
    }

    if !l2_normalize(&mut vector) {
        // every bucket cancelled out; keep the unit-norm contract
        vector[0] = 1.0;
    }

    vector
}

/// Normalizes in place. Returns false when the vector has zero norm.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return false;
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    true
}

/// splitmix64 finalizer
fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Maps the top 24 bits of a hash onto [-1, 1).
fn unit_value(hash: u64) -> f32 {
    let bits = (hash >> 40) as f32;
    bits / (1u64 << 24) as f32 * 2.0 - 1.0
}
