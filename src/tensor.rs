// src/tensor.rs
//
// =============================================================================
// HMM-MD-CORE: TENSOR UTILITIES (C1)
// =============================================================================
//
// Fixed-dimension (3D), stack-allocated rank-1/2/4 tensors.
//
// Symmetric rank-2 and rank-4 tensors are stored in packed (Voigt) form:
//   index 0..6 <-> (xx, yy, zz, xy, xz, yz)
// matching both the replica catalog's stress/stiffness layout and the spline
// comparator's six strain components, so the same ordering shows up end to end.

use anyhow::{anyhow, Result};

pub const DIM: usize = 3;

// ============================================================================
// 1. RANK-1: Vec3
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3(pub [f64; DIM]);

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self([x, y, z])
    }

    pub fn zero() -> Self {
        Self([0.0; DIM])
    }

    pub fn get(&self, i: usize) -> f64 {
        self.0[i]
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        (0..DIM).map(|i| self.0[i] * other.0[i]).sum()
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3::new(
            self.0[1] * other.0[2] - self.0[2] * other.0[1],
            self.0[2] * other.0[0] - self.0[0] * other.0[2],
            self.0[0] * other.0[1] - self.0[1] * other.0[0],
        )
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn normalize(&self) -> Result<Vec3> {
        let n = self.norm();
        if n < 1e-14 {
            return Err(anyhow!("cannot normalize a near-zero vector"));
        }
        Ok(Vec3::new(self.0[0] / n, self.0[1] / n, self.0[2] / n))
    }

    pub fn scale(&self, s: f64) -> Vec3 {
        Vec3::new(self.0[0] * s, self.0[1] * s, self.0[2] * s)
    }
}

// ============================================================================
// 2. GENERAL RANK-2: Mat3 (rotations live here)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat3(pub [[f64; DIM]; DIM]);

impl Mat3 {
    pub fn identity() -> Self {
        let mut m = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            m[i][i] = 1.0;
        }
        Mat3(m)
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.0[i][j]
    }

    pub fn transpose(&self) -> Mat3 {
        let mut m = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            for j in 0..DIM {
                m[j][i] = self.0[i][j];
            }
        }
        Mat3(m)
    }

    pub fn mul(&self, other: &Mat3) -> Mat3 {
        let mut m = [[0.0; DIM]; DIM];
        for i in 0..DIM {
            for j in 0..DIM {
                let mut acc = 0.0;
                for k in 0..DIM {
                    acc += self.0[i][k] * other.0[k][j];
                }
                m[i][j] = acc;
            }
        }
        Mat3(m)
    }

    /// `‖R·Rᵀ − I‖∞`. Used to check orthonormality of replica rotations.
    pub fn orthonormality_error(&self) -> f64 {
        let prod = self.mul(&self.transpose());
        let ident = Mat3::identity();
        let mut max_err: f64 = 0.0;
        for i in 0..DIM {
            for j in 0..DIM {
                max_err = max_err.max((prod.0[i][j] - ident.0[i][j]).abs());
            }
        }
        max_err
    }
}

/// Builds the rotation tensor that carries the replica-local `from` direction
/// onto the common-ground `to` direction (Rodrigues' formula).
pub fn compute_rotation_tensor(from: &Vec3, to: &Vec3) -> Result<Mat3> {
    let a = from.normalize()?;
    let b = to.normalize()?;

    let cos_theta = a.dot(&b).clamp(-1.0, 1.0);
    let axis_raw = a.cross(&b);
    let sin_theta = axis_raw.norm();

    // Parallel: no rotation needed.
    if sin_theta < 1e-12 && cos_theta > 0.0 {
        return Ok(Mat3::identity());
    }

    // Anti-parallel: rotate by pi about any axis perpendicular to `a`.
    if sin_theta < 1e-12 {
        let helper = if a.get(0).abs() < 0.9 {
            Vec3::new(1.0, 0.0, 0.0)
        } else {
            Vec3::new(0.0, 1.0, 0.0)
        };
        let axis = a.cross(&helper).normalize()?;
        // theta = pi: sin(theta) = 0, cos(theta) = -1.
        return Ok(rodrigues(&axis, 0.0, -1.0));
    }

    let axis = axis_raw.normalize()?;
    Ok(rodrigues(&axis, sin_theta, cos_theta))
}

fn rodrigues(axis: &Vec3, sin_theta: f64, cos_theta: f64) -> Mat3 {
    // R = I + sin(theta) K + (1 - cos(theta)) K^2, K the cross-product matrix of `axis`.
    let k = [
        [0.0, -axis.get(2), axis.get(1)],
        [axis.get(2), 0.0, -axis.get(0)],
        [-axis.get(1), axis.get(0), 0.0],
    ];
    let mut k2 = [[0.0; DIM]; DIM];
    for i in 0..DIM {
        for j in 0..DIM {
            let mut acc = 0.0;
            for l in 0..DIM {
                acc += k[i][l] * k[l][j];
            }
            k2[i][j] = acc;
        }
    }

    let one_minus_cos = 1.0 - cos_theta;
    let mut m = Mat3::identity().0;
    for i in 0..DIM {
        for j in 0..DIM {
            m[i][j] += sin_theta * k[i][j] + one_minus_cos * k2[i][j];
        }
    }
    Mat3(m)
}

// ============================================================================
// 3. SYMMETRIC RANK-2: Sym2 (packed, Voigt order xx yy zz xy xz yz)
// ============================================================================

fn voigt_index(i: usize, j: usize) -> usize {
    match (i.min(j), i.max(j)) {
        (0, 0) => 0,
        (1, 1) => 1,
        (2, 2) => 2,
        (0, 1) => 3,
        (0, 2) => 4,
        (1, 2) => 5,
        _ => unreachable!("index out of bounds for dim {}", DIM),
    }
}

fn voigt_pair(idx: usize) -> (usize, usize) {
    [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)][idx]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sym2(pub [f64; 6]);

impl Sym2 {
    pub fn zero() -> Self {
        Self([0.0; 6])
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.0[voigt_index(i, j)]
    }

    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.0[voigt_index(i, j)] = v;
    }

    pub fn add(&self, other: &Sym2) -> Sym2 {
        let mut out = [0.0; 6];
        for i in 0..6 {
            out[i] = self.0[i] + other.0[i];
        }
        Sym2(out)
    }

    pub fn sub(&self, other: &Sym2) -> Sym2 {
        let mut out = [0.0; 6];
        for i in 0..6 {
            out[i] = self.0[i] - other.0[i];
        }
        Sym2(out)
    }

    pub fn scale(&self, s: f64) -> Sym2 {
        let mut out = [0.0; 6];
        for i in 0..6 {
            out[i] = self.0[i] * s;
        }
        Sym2(out)
    }

    pub fn diag(x: f64, y: f64, z: f64) -> Sym2 {
        let mut t = Sym2::zero();
        t.set(0, 0, x);
        t.set(1, 1, y);
        t.set(2, 2, z);
        t
    }
}

/// `rotate(T, R) = R T Rᵀ`, applied to the full index representation.
pub fn rotate_sym2(t: &Sym2, r: &Mat3) -> Sym2 {
    let mut out = Sym2::zero();
    for idx in 0..6 {
        let (i, j) = voigt_pair(idx);
        let mut acc = 0.0;
        for a in 0..DIM {
            for b in 0..DIM {
                acc += r.get(i, a) * r.get(j, b) * t.get(a, b);
            }
        }
        out.0[idx] = acc;
    }
    out
}

// ============================================================================
// 4. SYMMETRIC RANK-4: Sym4 (21 independent entries, stored as a 6x6 matrix)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sym4 {
    c: [[f64; 6]; 6],
}

impl Sym4 {
    pub fn zero() -> Self {
        Self { c: [[0.0; 6]; 6] }
    }

    pub fn get(&self, i: usize, j: usize, k: usize, l: usize) -> f64 {
        self.c[voigt_index(i, j)][voigt_index(k, l)]
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, l: usize, v: f64) {
        let (a, b) = (voigt_index(i, j), voigt_index(k, l));
        self.c[a][b] = v;
        self.c[b][a] = v;
    }

    /// Direct access by packed Voigt indices (0..6), for the 21-entry on-disk layout.
    pub fn get_voigt(&self, i: usize, j: usize) -> f64 {
        self.c[i][j]
    }

    pub fn set_voigt(&mut self, i: usize, j: usize, v: f64) {
        self.c[i][j] = v;
        self.c[j][i] = v;
    }

    pub fn add(&self, other: &Sym4) -> Sym4 {
        let mut out = Sym4::zero();
        for i in 0..6 {
            for j in 0..6 {
                out.c[i][j] = self.c[i][j] + other.c[i][j];
            }
        }
        out
    }

    pub fn scale(&self, s: f64) -> Sym4 {
        let mut out = Sym4::zero();
        for i in 0..6 {
            for j in 0..6 {
                out.c[i][j] = self.c[i][j] * s;
            }
        }
        out
    }
}

/// `rotate(T, R)_{ijkl} = sum_{abcd} R_ia R_jb R_kc R_ld T_abcd`.
///
/// Satisfies `rotate(rotate(T, R), Rᵀ) == T` for orthonormal `R` (see tests).
pub fn rotate_sym4(t: &Sym4, r: &Mat3) -> Sym4 {
    let mut out = Sym4::zero();
    for idx_ij in 0..6 {
        let (i, j) = voigt_pair(idx_ij);
        for idx_kl in idx_ij..6 {
            let (k, l) = voigt_pair(idx_kl);
            let mut acc = 0.0;
            for a in 0..DIM {
                for b in 0..DIM {
                    for cc in 0..DIM {
                        for d in 0..DIM {
                            acc += r.get(i, a)
                                * r.get(j, b)
                                * r.get(k, cc)
                                * r.get(l, d)
                                * t.get(a, b, cc, d);
                        }
                    }
                }
            }
            out.set(i, j, k, l, acc);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rot_z(theta: f64) -> Mat3 {
        Mat3([
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ])
    }

    #[test]
    fn sym2_round_trip_under_rotation() {
        let r = rot_z(0.73);
        let t = Sym2::diag(1.0, 2.0, 3.0);
        let rotated = rotate_sym2(&t, &r);
        let back = rotate_sym2(&rotated, &r.transpose());
        for i in 0..6 {
            assert!((back.0[i] - t.0[i]).abs() < 1e-10, "component {} diverged", i);
        }
    }

    #[test]
    fn sym4_round_trip_under_rotation() {
        let r = rot_z(1.1);
        let mut t = Sym4::zero();
        t.set(0, 0, 0, 0, 10.0);
        t.set(1, 1, 1, 1, 7.0);
        t.set(0, 0, 1, 1, 3.0);
        t.set(0, 1, 0, 1, 2.5);

        let rotated = rotate_sym4(&t, &r);
        let back = rotate_sym4(&rotated, &r.transpose());
        for i in 0..6 {
            for j in 0..6 {
                assert!(
                    (back.c[i][j] - t.c[i][j]).abs() < 1e-9,
                    "voigt ({}, {}) diverged",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn rotation_matrix_is_orthonormal() {
        let r = compute_rotation_tensor(&Vec3::new(0.0, 1.0, 0.0), &Vec3::new(1.0, 0.0, 0.0))
            .unwrap();
        assert!(r.orthonormality_error() < 1e-12);
    }

    #[test]
    fn rotation_carries_source_onto_target() {
        let from = Vec3::new(0.0, 1.0, 0.0);
        let to = Vec3::new(1.0, 0.0, 0.0);
        let r = compute_rotation_tensor(&from, &to).unwrap();
        // R applied to `from` should land on `to`.
        let rotated = Vec3::new(
            (0..DIM).map(|j| r.get(0, j) * from.get(j)).sum(),
            (0..DIM).map(|j| r.get(1, j) * from.get(j)).sum(),
            (0..DIM).map(|j| r.get(2, j) * from.get(j)).sum(),
        );
        assert!((rotated.get(0) - to.get(0)).abs() < 1e-9);
        assert!((rotated.get(1) - to.get(1)).abs() < 1e-9);
        assert!((rotated.get(2) - to.get(2)).abs() < 1e-9);
    }

    #[test]
    fn parallel_vectors_give_identity() {
        let r = compute_rotation_tensor(&Vec3::new(1.0, 0.0, 0.0), &Vec3::new(2.0, 0.0, 0.0))
            .unwrap();
        assert_eq!(r, Mat3::identity());
    }
}
