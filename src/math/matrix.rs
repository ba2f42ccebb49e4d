use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, AddAssign};

/// Dense row-major matrix used by the trainable head.
///
/// Rows are stored contiguously in `data`; element `(i, j)` lives at
/// `i * cols + j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Builds a `1 × n` row vector.
    pub fn from_row(row: Vec<f64>) -> Matrix {
        Matrix { rows: 1, cols: row.len(), data: row }
    }

    /// Builds a matrix from row-major values.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Matrix {
        assert_eq!(data.len(), rows * cols, "Matrix data length does not match {}x{}", rows, cols);
        Matrix { rows, cols, data }
    }

    /// Samples a single value from N(0, 1) using the Box-Muller transform.
    fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        // Draw from (0, 1] to avoid log(0).
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = 1.0 - rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    fn normal<R: Rng + ?Sized>(rows: usize, cols: usize, std_dev: f64, rng: &mut R) -> Matrix {
        let data = (0..rows * cols)
            .map(|_| Matrix::sample_standard_normal(rng) * std_dev)
            .collect();
        Matrix { rows, cols, data }
    }

    /// He initialization: N(0, sqrt(2 / fan_in)). `rows` is the fan-in.
    ///
    /// Recommended before ReLU-family layers.
    pub fn he<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        Matrix::normal(rows, cols, (2.0 / rows.max(1) as f64).sqrt(), rng)
    }

    /// Xavier (Glorot) initialization: N(0, sqrt(1 / fan_in)). `rows` is the fan-in.
    ///
    /// Used for the softmax output layer.
    pub fn xavier<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Matrix {
        Matrix::normal(rows, cols, (1.0 / rows.max(1) as f64).sqrt(), rng)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    /// Outer product `aᵀ · b` of two vectors, shape `(a.len(), b.len())`.
    pub fn outer(a: &[f64], b: &[f64]) -> Matrix {
        let mut data = Vec::with_capacity(a.len() * b.len());
        for &x in a {
            data.extend(b.iter().map(|&y| x * y));
        }
        Matrix { rows: a.len(), cols: b.len(), data }
    }

    /// Row vector `v` times this matrix: returns `v · self`, length `cols`.
    pub fn vec_mul(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.rows, "Matrices are of incorrect sizes");
        let mut out = vec![0.0; self.cols];
        for (i, &x) in v.iter().enumerate() {
            if x == 0.0 {
                continue;
            }
            for (o, w) in out.iter_mut().zip(self.row(i)) {
                *o += x * w;
            }
        }
        out
    }

    /// This matrix times a column vector `v`: returns `self · vᵀ`, length `rows`.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.cols, "Matrices are of incorrect sizes");
        (0..self.rows)
            .map(|i| self.row(i).iter().zip(v).map(|(w, x)| w * x).sum())
            .collect()
    }

    fn assert_same_shape(&self, other: &Matrix) {
        if self.rows != other.rows || self.cols != other.cols {
            panic!("Matrices are of incorrect sizes")
        }
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix { rows: 0, cols: 0, data: vec![] }
    }
}

impl Add for Matrix {
    type Output = Matrix;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += &rhs;
        self
    }
}

impl AddAssign<&Matrix> for Matrix {
    fn add_assign(&mut self, rhs: &Matrix) {
        self.assert_same_shape(rhs);
        for (a, b) in self.data.iter_mut().zip(&rhs.data) {
            *a += b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn addition_is_element_wise() {
        let a = Matrix::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        let b = Matrix::from_vec(2, 2, vec![0.5, 0.5, -1.0, 1.0]);
        assert_eq!((a + b).as_slice(), &[1.5, 2.5, 2.0, 5.0]);
    }

    #[test]
    fn vector_products() {
        let w = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(w.vec_mul(&[1.0, 1.0]), vec![5.0, 7.0, 9.0]);
        assert_eq!(w.mul_vec(&[1.0, 0.0, 1.0]), vec![4.0, 10.0]);
        assert_eq!(Matrix::outer(&[1.0, 2.0], &[3.0]).as_slice(), &[3.0, 6.0]);
    }

    #[test]
    fn seeded_initialization_is_reproducible() {
        let a = Matrix::he(8, 4, &mut StdRng::seed_from_u64(7));
        let b = Matrix::he(8, 4, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
