// src/io.rs
//
// =============================================================================
// HMM-MD-CORE: PERSISTENT I/O SHIM (C2)
// =============================================================================
//
// Stable textual tensor encoding plus JSON configuration reads.
//
// Byte format is ours to choose (§4.2: "out of scope... the core only
// requires that a value written and then read is bit-faithful"). We use
// whitespace-separated f64 in the tensor's packed component order, one value
// per line for readability — a plain, grep-able on-disk artifact rather than
// an opaque binary container.

use crate::tensor::{Sym2, Sym4, Vec3};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Implemented by every tensor shape that can round-trip through disk.
pub trait TensorCodec: Sized {
    fn to_flat(&self) -> Vec<f64>;
    fn from_flat(values: &[f64]) -> Result<Self>;
}

impl TensorCodec for Vec3 {
    fn to_flat(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    fn from_flat(values: &[f64]) -> Result<Self> {
        if values.len() != 3 {
            return Err(anyhow!("expected 3 components for Vec3, got {}", values.len()));
        }
        Ok(Vec3::new(values[0], values[1], values[2]))
    }
}

impl TensorCodec for Sym2 {
    fn to_flat(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    fn from_flat(values: &[f64]) -> Result<Self> {
        if values.len() != 6 {
            return Err(anyhow!("expected 6 components for Sym2, got {}", values.len()));
        }
        let mut out = [0.0; 6];
        out.copy_from_slice(values);
        Ok(Sym2(out))
    }
}

impl TensorCodec for Sym4 {
    fn to_flat(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(21);
        for i in 0..6 {
            for j in i..6 {
                out.push(self.get_voigt(i, j));
            }
        }
        out
    }

    fn from_flat(values: &[f64]) -> Result<Self> {
        if values.len() != 21 {
            return Err(anyhow!(
                "expected 21 independent components for Sym4, got {}",
                values.len()
            ));
        }
        let mut out = Sym4::zero();
        let mut idx = 0;
        for i in 0..6 {
            for j in i..6 {
                out.set_voigt(i, j, values[idx]);
                idx += 1;
            }
        }
        Ok(out)
    }
}

impl TensorCodec for f64 {
    fn to_flat(&self) -> Vec<f64> {
        vec![*self]
    }

    fn from_flat(values: &[f64]) -> Result<Self> {
        values
            .first()
            .copied()
            .ok_or_else(|| anyhow!("expected a single scalar value"))
    }
}

/// Reads a tensor of shape `T` from `path`. Returns `Ok(false)` (not an error)
/// when the file is absent, matching the catalog's "missing equilibration data
/// is reported but does not abort the run" tolerance (§4.3).
pub fn read_tensor<T: TensorCodec>(path: impl AsRef<Path>, out: &mut T) -> Result<bool> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(false);
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading tensor {:?}", path))?;
    let values: Result<Vec<f64>> = text
        .split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .with_context(|| format!("invalid float token {:?} in {:?}", tok, path))
        })
        .collect();
    *out = T::from_flat(&values?)?;
    Ok(true)
}

/// Writes a tensor of shape `T` to `path`, one component per line.
pub fn write_tensor<T: TensorCodec>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let mut text = String::new();
    for v in value.to_flat() {
        text.push_str(&format!("{:.17e}\n", v));
    }
    fs::write(path, text).with_context(|| format!("writing tensor {:?}", path))
}

pub fn file_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

pub fn read_json(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("reading JSON {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("parsing JSON {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Sym4;
    use tempfile::tempdir;

    #[test]
    fn vec3_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.length");
        let v = Vec3::new(1.5, -2.25, 3.0);
        write_tensor(&path, &v).unwrap();
        let mut back = Vec3::zero();
        assert!(read_tensor(&path, &mut back).unwrap());
        assert_eq!(v, back);
    }

    #[test]
    fn sym2_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.stress");
        let s = Sym2::diag(1.0, 2.0, 3.0);
        write_tensor(&path, &s).unwrap();
        let mut back = Sym2::zero();
        assert!(read_tensor(&path, &mut back).unwrap());
        assert_eq!(s, back);
    }

    #[test]
    fn sym4_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.stiff");
        let mut s = Sym4::zero();
        s.set(0, 0, 0, 0, 42.0);
        s.set(0, 0, 1, 1, 7.5);
        write_tensor(&path, &s).unwrap();
        let mut back = Sym4::zero();
        assert!(read_tensor(&path, &mut back).unwrap());
        assert_eq!(s, back);
    }

    #[test]
    fn missing_tensor_is_not_an_error() {
        let mut v = Vec3::zero();
        assert!(!read_tensor("/nonexistent/path.length", &mut v).unwrap());
    }
}
