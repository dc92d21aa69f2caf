//! Conversion between application vectors and store-native vectors.
//!
//! Embedders produce `f64` components; stores keep `f32`. Narrowing rejects
//! components that do not survive the conversion as finite numbers, so a
//! single NaN or overflowing value fails the batch instead of silently
//! poisoning the index.

use quarry_core::{Error, Result};

/// Narrow an application vector to single precision.
pub fn narrow(vector: &[f64]) -> Result<Vec<f32>> {
    let mut out = Vec::with_capacity(vector.len());
    narrow_into(vector, &mut out)?;
    Ok(out)
}

/// Narrow an application vector, appending the components to `out`.
///
/// Used when flattening a batch into one contiguous buffer.
pub fn narrow_into(vector: &[f64], out: &mut Vec<f32>) -> Result<()> {
    for (i, &v) in vector.iter().enumerate() {
        let narrowed = v as f32;
        if !narrowed.is_finite() {
            return Err(Error::operation(format!(
                "vector component {i} ({v}) is not representable as a finite f32"
            )));
        }
        out.push(narrowed);
    }
    Ok(())
}

/// Widen a store-native vector back to double precision.
pub fn widen(vector: &[f32]) -> Vec<f64> {
    vector.iter().map(|&v| f64::from(v)).collect()
}
