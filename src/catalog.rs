// src/catalog.rs
//
// =============================================================================
// HMM-MD-CORE: REPLICA CATALOG & ORIENTATION (C3, C4)
// =============================================================================
//
// Loads the per-(material, replica) reference ensemble once at startup:
// density, flake count, reference length/stress/stiffness, and the rotation
// from the replica-local frame to the common-ground frame. Then averages
// across replicas to produce the initialization artifacts consumed by the
// macroscopic solver.

use crate::config::StmdConfig;
use crate::error::CatalogError;
use crate::io;
use crate::tensor::{compute_rotation_tensor, rotate_sym4, Mat3, Sym2, Sym4, Vec3};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ReplicaData {
    pub mat: String,
    pub repl: usize,
    pub rho: f64,
    pub nflakes: i64,
    pub init_length: Vec3,
    pub init_stress: Sym2,
    pub init_stiff: Sym4,
    pub rotam: Mat3,
}

impl ReplicaData {
    fn placeholder(mat: &str, repl: usize) -> Self {
        ReplicaData {
            mat: mat.to_string(),
            repl,
            rho: 0.0,
            nflakes: 0,
            init_length: Vec3::zero(),
            init_stress: Sym2::zero(),
            init_stiff: Sym4::zero(),
            rotam: Mat3::identity(),
        }
    }
}

pub struct ReplicaCatalog {
    pub records: Vec<ReplicaData>,
    pub materials: Vec<String>,
    pub nrepl: usize,
}

fn bptree_str<'a>(pt: &'a Value, keys: &[&str]) -> Option<&'a str> {
    let mut cur = pt;
    for k in keys {
        cur = cur.get(k)?;
    }
    cur.as_str()
}

impl ReplicaCatalog {
    /// Load-generation pass (§4.3): one JSON config file per (material, replica),
    /// named `<mat>_<repl>.json` under `nanostate_loc_in`. Fails fast, aborting the
    /// whole process group, if any expected file is missing.
    pub fn load_generation(cfg: &StmdConfig) -> Result<Self> {
        let base = Path::new(&cfg.nanostate_loc_in);

        for mat in &cfg.materials {
            for repl in 1..=cfg.nrepl {
                let path = base.join(format!("{mat}_{repl}.json"));
                if !path.exists() {
                    return Err(CatalogError::MissingReplicaFile {
                        material: mat.clone(),
                        replica: repl,
                        path: path.display().to_string(),
                    }
                    .into());
                }
            }
        }

        let mut records = Vec::with_capacity(cfg.materials.len() * cfg.nrepl);
        let cg_dir = cfg.cg_dir();

        for mat in &cfg.materials {
            for repl in 1..=cfg.nrepl {
                let path = base.join(format!("{mat}_{repl}.json"));
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading replica config {:?}", path))?;
                let pt: Value =
                    serde_json::from_str(&text).map_err(|source| CatalogError::MalformedJson {
                        path: path.display().to_string(),
                        source,
                    })?;

                let mut rec = ReplicaData::placeholder(mat, repl);

                let rdensity = bptree_str(&pt, &["relative_density"])
                    .with_context(|| format!("missing relative_density in {:?}", path))?;
                rec.rho = rdensity
                    .parse::<f64>()
                    .with_context(|| format!("invalid relative_density in {:?}", path))?
                    * 1000.0;

                let nflakes_str = bptree_str(&pt, &["Nsheets"])
                    .with_context(|| format!("missing Nsheets in {:?}", path))?;
                rec.nflakes = nflakes_str
                    .parse::<i64>()
                    .with_context(|| format!("invalid Nsheets in {:?}", path))?;

                rec.rotam = if rec.nflakes == 1 {
                    let x = bptree_str(&pt, &["normal_vector", "1", "x"])
                        .with_context(|| format!("missing normal_vector.1.x in {:?}", path))?
                        .parse::<f64>()?;
                    let y = bptree_str(&pt, &["normal_vector", "1", "y"])
                        .with_context(|| format!("missing normal_vector.1.y in {:?}", path))?
                        .parse::<f64>()?;
                    let z = bptree_str(&pt, &["normal_vector", "1", "z"])
                        .with_context(|| format!("missing normal_vector.1.z in {:?}", path))?
                        .parse::<f64>()?;
                    compute_rotation_tensor(&Vec3::new(x, y, z), &cg_dir)?
                } else {
                    Mat3::identity()
                };

                records.push(rec);
            }
        }

        Ok(ReplicaCatalog {
            records,
            materials: cfg.materials.clone(),
            nrepl: cfg.nrepl,
        })
    }

    fn index(&self, mat_idx: usize, repl_idx: usize) -> usize {
        mat_idx * self.nrepl + repl_idx
    }

    /// Load-equilibration pass (§4.3): attempt to load per-replica reference
    /// length/stress/stiffness and copy the replica's binary "system" file into
    /// the output directory. Missing files are reported but do not abort the run.
    pub fn load_equilibration(&mut self, cfg: &StmdConfig) {
        let in_base = Path::new(&cfg.nanostate_loc_in);
        let out_base = Path::new(&cfg.nanostate_loc_out);

        for mat_idx in 0..self.materials.len() {
            let mat = self.materials[mat_idx].clone();
            for repl_idx in 0..self.nrepl {
                let idx = self.index(mat_idx, repl_idx);
                let numrepl = repl_idx + 1;

                let length_path = in_base.join(format!("init.{mat}_{numrepl}.length"));
                match io::read_tensor(&length_path, &mut self.records[idx].init_length) {
                    Ok(true) => {}
                    Ok(false) => log::warn!(
                        "missing equilibrated initial length data for material {mat} replica #{numrepl}"
                    ),
                    Err(e) => log::warn!(
                        "failed reading initial length for material {mat} replica #{numrepl}: {e:#}"
                    ),
                }

                let stress_path = in_base.join(format!("init.{mat}_{numrepl}.stress"));
                match io::read_tensor(&stress_path, &mut self.records[idx].init_stress) {
                    Ok(true) => {}
                    Ok(false) => log::warn!(
                        "missing equilibrated initial stress data for material {mat} replica #{numrepl}"
                    ),
                    Err(e) => log::warn!(
                        "failed reading initial stress for material {mat} replica #{numrepl}: {e:#}"
                    ),
                }

                let stiff_path = in_base.join(format!("init.{mat}_{numrepl}.stiff"));
                match io::read_tensor(&stiff_path, &mut self.records[idx].init_stiff) {
                    Ok(true) => {}
                    Ok(false) => log::warn!(
                        "missing equilibrated initial stiffness data for material {mat} replica #{numrepl}"
                    ),
                    Err(e) => log::warn!(
                        "failed reading initial stiffness for material {mat} replica #{numrepl}: {e:#}"
                    ),
                }

                let system_path = in_base.join(format!("init.{mat}_{numrepl}.bin"));
                if system_path.exists() {
                    let dest = out_base.join(format!("init.{mat}_{numrepl}.bin"));
                    if let Err(e) = std::fs::copy(&system_path, &dest) {
                        log::warn!("failed copying replica system file {:?}: {e}", system_path);
                    }
                } else {
                    log::warn!(
                        "missing equilibrated initial system for material {mat} replica #{numrepl}"
                    );
                }
            }
        }
    }

    /// Averaging for export (§4.3): per-material replica-averaged stiffness
    /// (rotated to common ground) and density, persisted as initialization
    /// artifacts for the macroscopic solver.
    pub fn average_and_export(&self, cfg: &StmdConfig) -> Result<()> {
        let out_base = Path::new(&cfg.macrostate_loc_out);

        for (mat_idx, mat) in self.materials.iter().enumerate() {
            let mut stiffness = Sym4::zero();
            let mut density = 0.0;

            for repl_idx in 0..self.nrepl {
                let rec = &self.records[self.index(mat_idx, repl_idx)];
                let cg_stiff = rotate_sym4(&rec.init_stiff, &rec.rotam);
                stiffness = stiffness.add(&cg_stiff);
                density += rec.rho;
            }

            stiffness = stiffness.scale(1.0 / self.nrepl as f64);
            density /= self.nrepl as f64;

            io::write_tensor(out_base.join(format!("init.{mat}.stiff")), &stiffness)?;
            io::write_tensor(out_base.join(format!("init.{mat}.density")), &density)?;
        }

        Ok(())
    }

    pub fn get(&self, mat: &str, repl_idx: usize) -> Option<&ReplicaData> {
        let mat_idx = self.materials.iter().position(|m| m == mat)?;
        self.records.get(self.index(mat_idx, repl_idx))
    }
}
