//! Randomized PCA
//!
//! Subspace iteration from a seeded random start, followed by a
//! Rayleigh-Ritz step so components come out ordered by variance.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fitted linear projection onto the leading principal components
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Vec<f32>,
    /// `n_components` rows of length `input_dim`
    components: Vec<f32>,
    explained_variance: Vec<f32>,
    input_dim: usize,
    n_components: usize,
}

impl Pca {
    /// Fit on a row-major matrix with `dim` columns.
    ///
    /// `n_components` is clamped to the number of rows and columns.
    pub fn fit(data: &[f32], dim: usize, n_components: usize, seed: u64) -> Self {
        let rows = if dim == 0 { 0 } else { data.len() / dim };
        let k = n_components.min(dim).min(rows).max(1);
        let mean = column_mean(data, dim, rows);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut basis: Vec<Vec<f64>> = (0..k)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        orthonormalize(&mut basis);

        // Same rule of thumb as the usual randomized SVD solvers
        let iterations = if (k as f64) < 0.1 * dim.min(rows) as f64 { 7 } else { 4 };
        for _ in 0..iterations {
            basis = covariance_times(data, dim, &mean, &basis);
            orthonormalize(&mut basis);
        }

        // Rayleigh-Ritz on the k x k projected covariance
        let projected = covariance_times(data, dim, &mean, &basis);
        let scale = rows.saturating_sub(1).max(1) as f64;
        let small: Vec<Vec<f64>> = basis
            .iter()
            .map(|qi| projected.iter().map(|zj| dot(qi, zj) / scale).collect())
            .collect();
        let (values, vectors) = symmetric_eigen(small);

        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

        let mut components = Vec::with_capacity(k * dim);
        let mut explained_variance = Vec::with_capacity(k);
        for &col in &order {
            let mut component = vec![0.0f64; dim];
            for (j, q) in basis.iter().enumerate() {
                let w = vectors[j][col];
                for (c, x) in component.iter_mut().zip(q) {
                    *c += w * x;
                }
            }
            flip_sign(&mut component);
            components.extend(component.iter().map(|&x| x as f32));
            explained_variance.push(values[col].max(0.0) as f32);
        }

        Self {
            mean: mean.iter().map(|&m| m as f32).collect(),
            components,
            explained_variance,
            input_dim: dim,
            n_components: k,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Variance captured by each component, descending
    pub fn explained_variance(&self) -> &[f32] {
        &self.explained_variance
    }

    /// Component `i` as a unit vector in input space
    pub fn component(&self, i: usize) -> &[f32] {
        &self.components[i * self.input_dim..(i + 1) * self.input_dim]
    }

    /// Project one vector
    pub fn transform(&self, v: &[f32]) -> Vec<f32> {
        debug_assert_eq!(v.len(), self.input_dim);
        (0..self.n_components)
            .map(|i| {
                self.component(i)
                    .iter()
                    .zip(v.iter().zip(&self.mean))
                    .map(|(c, (x, m))| c * (x - m))
                    .sum()
            })
            .collect()
    }

    /// Project a row-major matrix
    pub fn transform_all(&self, data: &[f32]) -> Vec<f32> {
        data.chunks_exact(self.input_dim)
            .flat_map(|row| self.transform(row))
            .collect()
    }
}

fn column_mean(data: &[f32], dim: usize, rows: usize) -> Vec<f64> {
    let mut mean = vec![0.0f64; dim];
    if rows == 0 {
        return mean;
    }
    for row in data.chunks_exact(dim) {
        for (m, &x) in mean.iter_mut().zip(row) {
            *m += x as f64;
        }
    }
    for m in mean.iter_mut() {
        *m /= rows as f64;
    }
    mean
}

/// `Xc^T Xc q` for every basis vector `q`, with `Xc` the centered data
fn covariance_times(data: &[f32], dim: usize, mean: &[f64], basis: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0f64; dim]; basis.len()];
    let mut centered = vec![0.0f64; dim];
    for row in data.chunks_exact(dim) {
        for ((c, &x), m) in centered.iter_mut().zip(row).zip(mean) {
            *c = x as f64 - m;
        }
        for (q, z) in basis.iter().zip(out.iter_mut()) {
            let proj = dot(&centered, q);
            for (zi, ci) in z.iter_mut().zip(&centered) {
                *zi += proj * ci;
            }
        }
    }
    out
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Modified Gram-Schmidt. Degenerate vectors are zeroed.
fn orthonormalize(basis: &mut [Vec<f64>]) {
    for i in 0..basis.len() {
        let (done, rest) = basis.split_at_mut(i);
        let v = &mut rest[0];
        for u in done.iter() {
            let p = dot(&v[..], u);
            for (x, y) in v.iter_mut().zip(u) {
                *x -= p * y;
            }
        }
        let norm = dot(&v[..], &v[..]).sqrt();
        if norm > 1e-12 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        } else {
            v.iter_mut().for_each(|x| *x = 0.0);
        }
    }
}

/// Largest-magnitude coordinate positive, for reproducible signs
fn flip_sign(v: &mut [f64]) {
    let pivot = v
        .iter()
        .copied()
        .max_by(|a, b| a.abs().total_cmp(&b.abs()))
        .unwrap_or(0.0);
    if pivot < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
}

/// Cyclic Jacobi eigendecomposition of a small symmetric matrix.
/// Returns eigenvalues and eigenvectors as columns.
fn symmetric_eigen(mut a: Vec<Vec<f64>>) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = a.len();
    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for _ in 0..64 {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[i][j] * a[i][j])
            .sum();
        if off < 1e-20 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[p][q].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let (kp, kq) = (row[p], row[q]);
                    row[p] = c * kp - s * kq;
                    row[q] = s * kp + c * kq;
                }
                for k in 0..n {
                    let (pk, qk) = (a[p][k], a[q][k]);
                    a[p][k] = c * pk - s * qk;
                    a[q][k] = s * pk + c * qk;
                }
                for row in v.iter_mut() {
                    let (kp, kq) = (row[p], row[q]);
                    row[p] = c * kp - s * kq;
                    row[q] = s * kp + c * kq;
                }
            }
        }
    }

    let values = (0..n).map(|i| a[i][i]).collect();
    (values, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points spread along (1, 1, 0) with small noise on the other axes
    fn line_data() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..50 {
            let t = i as f32 - 25.0;
            let wobble = if i % 2 == 0 { 0.1 } else { -0.1 };
            data.extend_from_slice(&[t + 5.0, t + 5.0 + wobble, wobble]);
        }
        data
    }

    #[test]
    fn test_first_component_follows_spread() {
        let pca = Pca::fit(&line_data(), 3, 2, 7);
        let first = pca.component(0);
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((first[0] - expected).abs() < 1e-2);
        assert!((first[1] - expected).abs() < 1e-2);
        assert!(first[2].abs() < 1e-2);

        let variance = pca.explained_variance();
        assert!(variance[0] > variance[1]);
    }

    #[test]
    fn test_components_orthonormal() {
        let pca = Pca::fit(&line_data(), 3, 3, 1);
        for i in 0..3 {
            for j in 0..3 {
                let d: f32 = pca
                    .component(i)
                    .iter()
                    .zip(pca.component(j))
                    .map(|(a, b)| a * b)
                    .sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((d - expected).abs() < 1e-3, "<c{}, c{}> = {}", i, j, d);
            }
        }
    }

    #[test]
    fn test_transform_centers_data() {
        let data = line_data();
        let pca = Pca::fit(&data, 3, 2, 3);
        let reduced = pca.transform_all(&data);
        assert_eq!(reduced.len(), 50 * 2);

        let mean_first: f32 = reduced.chunks_exact(2).map(|r| r[0]).sum::<f32>() / 50.0;
        assert!(mean_first.abs() < 1e-3);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let data = line_data();
        let a = Pca::fit(&data, 3, 2, 42);
        let b = Pca::fit(&data, 3, 2, 42);
        assert_eq!(a.transform(&data[..3]), b.transform(&data[..3]));
    }

    #[test]
    fn test_components_clamped() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let pca = Pca::fit(&data, 2, 10, 0);
        assert_eq!(pca.n_components(), 2);
        assert_eq!(pca.input_dim(), 2);
    }
}
