//! Real spherical harmonics and SO(3) coupling coefficients.
//!
//! # Conventions
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Complex Y_l^m(θ, φ) = N_l^m P_l^m(cos θ) e^{imφ}                    │
//! │  └── Condon-Shortley phase inside P_l^m                              │
//! └─────────────────────────────────────────────────────────────────────┘
//!                               ↓  Q_l (unitary, real = Q · complex)
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Real Y_lm:  m > 0: √2 Re Y_l^m,  m = 0: Y_l^0,  m < 0: √2 Im Y_l^|m| │
//! └─────────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Real coupling C[a, b, c] = Σ conj(Q1) conj(Q2) Q3 ⟨l1 m1 l2 m2|l3 M⟩│
//! │  └── phase fixed, ‖C‖ = √(2 l3 + 1)                                  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Harmonic vectors are ordered degree-major, `m = -l..=l` inside a degree,
//! `(lmax + 1)²` entries in total. The zero vector maps to `Y_00` with every
//! higher degree set to zero.

use std::f64::consts::PI;

use nalgebra::{Complex, DMatrix, Matrix3};

use cgae_core::{CgError, Result, Signature};

/// Displacements shorter than this are treated as the zero vector.
pub const ZERO_NORM_EPS: f64 = 1e-9;

/// Value of the constant harmonic, `1 / (2√π)`.
pub fn y00() -> f64 {
    0.5 / PI.sqrt()
}

/// Number of harmonics up to and including `max_degree`.
pub const fn num_harmonics(max_degree: usize) -> usize {
    (max_degree + 1) * (max_degree + 1)
}

/// Normalized associated Legendre function N_l^m P_l^m(x) for `0 <= m <= l`.
///
/// ```text
/// N_l^m = sqrt((2l+1)/(4π) × (l-m)!/(l+m)!)
/// ```
pub fn associated_legendre_normalized(l: usize, m: usize, x: f64) -> f64 {
    debug_assert!(m <= l);

    let mut norm = ((2 * l + 1) as f64 / (4.0 * PI)).sqrt();
    if m > 0 {
        let mut factorial_ratio = 1.0;
        for k in (l - m + 1)..=(l + m) {
            factorial_ratio /= k as f64;
        }
        norm *= factorial_ratio.sqrt();
    }

    if l == 0 {
        return norm;
    }

    let sin_theta = x.mul_add(-x, 1.0).max(0.0).sqrt();

    // Sectoral: P_m^m = (-1)^m (2m-1)!! sin^m(θ)
    let mut pmm = 1.0;
    let mut fact = 1.0;
    for _ in 0..m {
        pmm *= -fact * sin_theta;
        fact += 2.0;
    }
    if l == m {
        return norm * pmm;
    }

    // P_{m+1}^m = x (2m+1) P_m^m
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return norm * pmmp1;
    }

    for n in (m + 2)..=l {
        let next = ((2 * n - 1) as f64 * x).mul_add(pmmp1, -((n + m - 1) as f64 * pmm))
            / (n - m) as f64;
        pmm = pmmp1;
        pmmp1 = next;
    }

    norm * pmmp1
}

/// Complex spherical harmonic Y_l^m(θ, φ), any `|m| <= l`.
///
/// Negative orders use `Y_l^{-m} = (-1)^m conj(Y_l^m)`.
pub fn complex_spherical_harmonic(l: usize, m: i64, theta: f64, phi: f64) -> Complex<f64> {
    let k = m.unsigned_abs() as usize;
    let plm = associated_legendre_normalized(l, k, theta.cos());
    let positive = Complex::new(plm * (k as f64 * phi).cos(), plm * (k as f64 * phi).sin());
    if m >= 0 {
        positive
    } else if k % 2 == 0 {
        positive.conj()
    } else {
        -positive.conj()
    }
}

/// Real spherical harmonics of the direction of `v`, degrees `0..=max_degree`.
pub fn spherical_harmonics(max_degree: usize, v: [f64; 3]) -> Vec<f64> {
    let mut out = vec![0.0; num_harmonics(max_degree)];
    let r = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    out[0] = y00();
    if r < ZERO_NORM_EPS {
        return out;
    }

    let theta = (v[2] / r).clamp(-1.0, 1.0).acos();
    let phi = v[1].atan2(v[0]);
    let sqrt2 = 2.0_f64.sqrt();

    for l in 1..=max_degree {
        let base = l * l + l;
        out[base] = associated_legendre_normalized(l, 0, theta.cos());
        for k in 1..=l {
            let y = complex_spherical_harmonic(l, k as i64, theta, phi);
            out[base + k] = sqrt2 * y.re;
            out[base - k] = sqrt2 * y.im;
        }
    }
    out
}

/// Same as [`spherical_harmonics`] for `f32` input, `f32` output.
pub fn spherical_harmonics_f32(max_degree: usize, v: [f32; 3]) -> Vec<f32> {
    spherical_harmonics(max_degree, [v[0] as f64, v[1] as f64, v[2] as f64])
        .into_iter()
        .map(|y| y as f32)
        .collect()
}

/// Change of basis with `real = Q · complex`, rows and columns indexed `m + l`.
pub fn real_basis_change(l: usize) -> DMatrix<Complex<f64>> {
    let d = 2 * l + 1;
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let mut q = DMatrix::from_element(d, d, Complex::new(0.0, 0.0));
    q[(l, l)] = Complex::new(1.0, 0.0);
    for k in 1..=l {
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        q[(l + k, l + k)] = Complex::new(s, 0.0);
        q[(l + k, l - k)] = Complex::new(sign * s, 0.0);
        q[(l - k, l + k)] = Complex::new(0.0, -s);
        q[(l - k, l - k)] = Complex::new(0.0, sign * s);
    }
    q
}

fn factorial(n: i64) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Clebsch-Gordan coefficient ⟨j1 m1 j2 m2 | j m⟩ (Racah formula, integer spins).
pub fn clebsch_gordan(j1: usize, m1: i64, j2: usize, m2: i64, j: usize, m: i64) -> f64 {
    let (j1, j2, j) = (j1 as i64, j2 as i64, j as i64);
    if m1 + m2 != m || m1.abs() > j1 || m2.abs() > j2 || m.abs() > j {
        return 0.0;
    }
    if j < (j1 - j2).abs() || j > j1 + j2 {
        return 0.0;
    }

    let prefactor = ((2 * j + 1) as f64 * factorial(j + j1 - j2) * factorial(j - j1 + j2)
        * factorial(j1 + j2 - j)
        / factorial(j1 + j2 + j + 1))
    .sqrt()
        * (factorial(j + m)
            * factorial(j - m)
            * factorial(j1 - m1)
            * factorial(j1 + m1)
            * factorial(j2 - m2)
            * factorial(j2 + m2))
        .sqrt();

    let k_min = 0.max(j2 - j - m1).max(j1 - j + m2);
    let k_max = (j1 + j2 - j).min(j1 - m1).min(j2 + m2);
    let mut sum = 0.0;
    for k in k_min..=k_max {
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        sum += sign
            / (factorial(k)
                * factorial(j1 + j2 - j - k)
                * factorial(j1 - m1 - k)
                * factorial(j2 + m2 - k)
                * factorial(j - j2 + m1 + k)
                * factorial(j - j1 - m2 + k));
    }
    prefactor * sum
}

/// Real-basis coupling tensor for `l1 ⊗ l2 → l3`.
#[derive(Debug, Clone, PartialEq)]
pub struct CouplingTensor {
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
    /// Row-major `[2l1+1, 2l2+1, 2l3+1]`.
    pub values: Vec<f64>,
}

impl CouplingTensor {
    /// Build the tensor. Returns `None` when the triangle condition fails.
    pub fn new(l1: usize, l2: usize, l3: usize) -> Option<Self> {
        if l3 < l1.abs_diff(l2) || l3 > l1 + l2 {
            return None;
        }
        let (d1, d2, d3) = (2 * l1 + 1, 2 * l2 + 1, 2 * l3 + 1);
        let q1 = real_basis_change(l1);
        let q2 = real_basis_change(l2);
        let q3 = real_basis_change(l3);

        let mut complex = vec![Complex::new(0.0, 0.0); d1 * d2 * d3];
        for i1 in 0..d1 {
            let m1 = i1 as i64 - l1 as i64;
            for i2 in 0..d2 {
                let m2 = i2 as i64 - l2 as i64;
                let m = m1 + m2;
                if m.abs() > l3 as i64 {
                    continue;
                }
                let cg = clebsch_gordan(l1, m1, l2, m2, l3, m);
                if cg == 0.0 {
                    continue;
                }
                let i3 = (m + l3 as i64) as usize;
                for a in 0..d1 {
                    let qa = q1[(a, i1)].conj();
                    if qa.norm_sqr() == 0.0 {
                        continue;
                    }
                    for b in 0..d2 {
                        let qb = q2[(b, i2)].conj();
                        if qb.norm_sqr() == 0.0 {
                            continue;
                        }
                        for c in 0..d3 {
                            complex[(a * d2 + b) * d3 + c] += qa * qb * q3[(c, i3)] * cg;
                        }
                    }
                }
            }
        }

        // The real intertwiner is unique up to a complex phase: divide it out
        // using the largest entry.
        let pivot = complex
            .iter()
            .copied()
            .max_by(|x, y| x.norm_sqr().total_cmp(&y.norm_sqr()))?;
        let phase = pivot / pivot.norm();
        let mut values: Vec<f64> = complex.iter().map(|z| (*z / phase).re).collect();

        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        let target = (d3 as f64).sqrt();
        for v in &mut values {
            *v *= target / norm;
        }

        Some(Self { l1, l2, l3, values })
    }

    pub const fn dims(&self) -> [usize; 3] {
        [2 * self.l1 + 1, 2 * self.l2 + 1, 2 * self.l3 + 1]
    }

    #[inline]
    pub fn get(&self, a: usize, b: usize, c: usize) -> f64 {
        let [_, d2, d3] = self.dims();
        self.values[(a * d2 + b) * d3 + c]
    }
}

/// Deterministic, well spread sample directions (Fibonacci sphere).
fn sample_directions(n: usize) -> Vec<[f64; 3]> {
    let golden = PI * (3.0 - 5.0_f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let phi = golden * i as f64;
            [r * phi.cos(), r * phi.sin(), z]
        })
        .collect()
}

/// Wigner matrix of degree `l` in the real harmonic basis:
/// `Y_l(R v) = D_l(R) Y_l(v)`.
///
/// Solved by least squares over sample directions.
pub fn wigner_d(l: usize, rotation: &Matrix3<f64>) -> Result<DMatrix<f64>> {
    let d = 2 * l + 1;
    if l == 0 {
        return Ok(DMatrix::identity(1, 1));
    }
    let offset = l * l;
    let directions = sample_directions(6 * d);
    let n = directions.len();

    let mut a = DMatrix::zeros(n, d);
    let mut b = DMatrix::zeros(n, d);
    for (i, v) in directions.iter().enumerate() {
        let rv = rotation * nalgebra::Vector3::new(v[0], v[1], v[2]);
        let y = spherical_harmonics(l, *v);
        let yr = spherical_harmonics(l, [rv.x, rv.y, rv.z]);
        for j in 0..d {
            a[(i, j)] = y[offset + j];
            b[(i, j)] = yr[offset + j];
        }
    }

    // A has full column rank for 6(2l+1) well spread directions.
    let dt = least_squares(&a, &b).map_err(|e| CgError::Singular(format!("Wigner matrix of degree {l}: {e}")))?;
    Ok(dt.transpose())
}

/// `X` minimizing `‖A X − B‖` via the normal equations.
fn least_squares(a: &DMatrix<f64>, b: &DMatrix<f64>) -> std::result::Result<DMatrix<f64>, &'static str> {
    let at = a.transpose();
    (&at * a)
        .lu()
        .solve(&(&at * b))
        .ok_or("normal matrix is not invertible")
}

/// Rotate one feature vector with signature `rs` block-wise by degree.
pub fn rotate_signature_features(rs: &Signature, rotation: &Matrix3<f64>, features: &[f32]) -> Result<Vec<f32>> {
    if features.len() != rs.dim() {
        return Err(CgError::shape(
            "features",
            &[rs.dim()],
            &[features.len()],
        ));
    }
    let mut out = Vec::with_capacity(features.len());
    let mut offset = 0;
    for ir in rs.irreps() {
        let d = ir.order();
        let wigner = wigner_d(ir.degree, rotation)?;
        for copy in 0..ir.mul {
            let start = offset + copy * d;
            for i in 0..d {
                let value: f64 = (0..d)
                    .map(|j| wigner[(i, j)] * features[start + j] as f64)
                    .sum();
                out.push(value as f32);
            }
        }
        offset += ir.dim();
    }
    Ok(out)
}

/// Rotation matrix from an axis (need not be normalized) and an angle in radians.
pub fn rotation_from_axis_angle(axis: [f64; 3], angle: f64) -> Matrix3<f64> {
    let axis = nalgebra::Unit::new_normalize(nalgebra::Vector3::new(axis[0], axis[1], axis[2]));
    *nalgebra::Rotation3::from_axis_angle(&axis, angle).matrix()
}

/// `f32` row-major copy of a rotation, for [`cgae_core::Coordinates::rotated`].
pub fn rotation_rows_f32(rotation: &Matrix3<f64>) -> [[f32; 3]; 3] {
    let mut rows = [[0.0f32; 3]; 3];
    for (i, row) in rows.iter_mut().enumerate() {
        for (j, value) in row.iter_mut().enumerate() {
            *value = rotation[(i, j)] as f32;
        }
    }
    rows
}
