use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use ndarray::{Array2, ArrayView2, Axis};
use num_traits::Float;
use rayon::prelude::*;

/// Channels per pixel; stain vectors live in RGB optical-density space.
pub const CHANNELS: usize = 3;

/// A validated `K×3` reference stain basis, one stain vector per row.
///
/// The pipeline only reads it; estimation of the basis happens elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct StainMatrix<F> {
    rows: Array2<F>,
}

impl<F: StainFloat> StainMatrix<F> {
    /// Wrap a `K×3` matrix as-is. Fails fast on a channel-count mismatch.
    pub fn new(rows: Array2<F>) -> Result<Self> {
        let (k, c) = rows.dim();
        if c != CHANNELS {
            return Err(StainError::ShapeMismatch {
                expected: CHANNELS,
                rows: k,
                cols: c,
            });
        }
        if k == 0 {
            return Err(StainError::EmptyStainMatrix);
        }
        Ok(Self { rows })
    }

    pub fn from_view(rows: ArrayView2<F>) -> Result<Self> {
        Self::new(rows.to_owned())
    }

    /// Wrap a matrix after scaling every row to unit length.
    pub fn normalized(rows: Array2<F>) -> Result<Self> {
        Self::new(normalize_rows(&rows))
    }

    /// Number of stains `K`.
    pub fn n_stains(&self) -> usize {
        self.rows.nrows()
    }

    pub fn view(&self) -> ArrayView2<'_, F> {
        self.rows.view()
    }

    pub fn into_inner(self) -> Array2<F> {
        self.rows
    }
}

/// Get the L2 magnitude of each row vector in a matrix.
pub fn row_magnitudes<F: StainFloat>(m: &Array2<F>) -> Vec<F> {
    (0..m.nrows())
        .into_par_iter()
        .map(|i| Float::sqrt(m.row(i).dot(&m.row(i))))
        .collect()
}

/// Normalize each row vector in a matrix. Zero rows stay zero.
pub fn normalize_rows<F: StainFloat>(m: &Array2<F>) -> Array2<F> {
    let mag = row_magnitudes(m);
    let mut result = m.clone();

    result
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let norm = mag[i];
            if norm != F::zero() {
                row.mapv_inplace(|v| v / norm);
            } else {
                row.fill(F::zero());
            }
        });

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_wrong_channel_count() {
        let err = StainMatrix::new(array![[1.0f64, 0.0], [0.0, 1.0]]).unwrap_err();
        assert!(matches!(
            err,
            StainError::ShapeMismatch {
                expected: 3,
                rows: 2,
                cols: 2
            }
        ));
    }

    #[test]
    fn rejects_empty_basis() {
        let err = StainMatrix::<f64>::new(Array2::zeros((0, 3))).unwrap_err();
        assert!(matches!(err, StainError::EmptyStainMatrix));
    }

    #[test]
    fn normalized_rows_have_unit_length() {
        let m = StainMatrix::normalized(array![[3.0f64, 4.0, 0.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]])
            .unwrap();
        assert_eq!(m.n_stains(), 3);
        let v = m.view();
        assert!((v[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((v[[0, 1]] - 0.8).abs() < 1e-12);
        assert_eq!(v.row(1).to_vec(), vec![0.0, 0.0, 0.0]);
        let mags = row_magnitudes(&v.to_owned());
        assert!((mags[2] - 1.0).abs() < 1e-12);
    }
}
