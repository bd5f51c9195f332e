//! Sinusoidal relative-position table for distance-aware attention.

use candle_core::{bail, Device, Result, Tensor};

/// Builds the `(length, length, depth)` relative-position table.
///
/// Pairwise distances `i - j` are clipped to
/// `[-max_relative_position, max_relative_position]` and shifted into
/// non-negative bucket indices. Each bucket maps to a fixed sinusoid row:
/// `sin(p / 10000^(2i/depth))` on even dimensions and the cosine of the same
/// angle on odd dimensions. The table is built once per attention layer and
/// treated as a constant; no gradient ever flows through it.
pub fn relative_position_table(
    length: usize,
    depth: usize,
    max_relative_position: usize,
    device: &Device,
) -> Result<Tensor> {
    if length == 0 || depth == 0 {
        bail!("relative-position table requires non-zero length and depth");
    }
    if max_relative_position == 0 {
        bail!("max_relative_position must be positive");
    }

    let buckets = 2 * max_relative_position + 1;
    let mut rows = vec![0f32; buckets * depth];
    for bucket in 0..buckets {
        for pair in 0..depth / 2 {
            let angle = bucket as f64 / 10000f64.powf(2.0 * pair as f64 / depth as f64);
            rows[bucket * depth + 2 * pair] = angle.sin() as f32;
            rows[bucket * depth + 2 * pair + 1] = angle.cos() as f32;
        }
    }

    let max = max_relative_position as i64;
    let mut data = vec![0f32; length * length * depth];
    for from in 0..length {
        for to in 0..length {
            let distance = (from as i64 - to as i64).clamp(-max, max);
            let bucket = (distance + max) as usize;
            let offset = (from * length + to) * depth;
            data[offset..offset + depth].copy_from_slice(&rows[bucket * depth..(bucket + 1) * depth]);
        }
    }

    Tensor::from_vec(data, (length, length, depth), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(table: &Tensor, from: usize, to: usize) -> Result<Vec<f32>> {
        table
            .narrow(0, from, 1)?
            .narrow(1, to, 1)?
            .flatten_all()?
            .to_vec1::<f32>()
    }

    #[test]
    fn table_has_requested_shape() -> Result<()> {
        let table = relative_position_table(12, 6, 4, &Device::Cpu)?;
        assert_eq!(table.dims(), &[12, 12, 6]);
        Ok(())
    }

    #[test]
    fn entries_depend_only_on_clipped_distance() -> Result<()> {
        let table = relative_position_table(10, 4, 3, &Device::Cpu)?;
        // Same distance, different absolute positions.
        assert_eq!(cell(&table, 5, 2)?, cell(&table, 8, 5)?);
        // Distances past the clip bound collapse onto the edge bucket.
        assert_eq!(cell(&table, 9, 0)?, cell(&table, 3, 0)?);
        assert_eq!(cell(&table, 0, 9)?, cell(&table, 0, 3)?);
        // Distinct in-range distances disagree.
        assert_ne!(cell(&table, 2, 0)?, cell(&table, 1, 0)?);
        Ok(())
    }

    #[test]
    fn zero_distance_row_alternates_sin_cos_of_the_centre_bucket() -> Result<()> {
        let max_relative_position = 4;
        let depth = 6;
        let table = relative_position_table(3, depth, max_relative_position, &Device::Cpu)?;
        let centre = cell(&table, 1, 1)?;
        for pair in 0..depth / 2 {
            let angle = max_relative_position as f64
                / 10000f64.powf(2.0 * pair as f64 / depth as f64);
            assert!((centre[2 * pair] as f64 - angle.sin()).abs() < 1e-6);
            assert!((centre[2 * pair + 1] as f64 - angle.cos()).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn degenerate_parameters_are_rejected() {
        let device = Device::Cpu;
        assert!(relative_position_table(0, 4, 2, &device).is_err());
        assert!(relative_position_table(4, 0, 2, &device).is_err());
        assert!(relative_position_table(4, 4, 0, &device).is_err());
    }
}
