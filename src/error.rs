// src/error.rs
//
// =============================================================================
// HMM-MD-CORE: CONFIGURATION ERRORS (C-ERR)
// =============================================================================
//
// §7 splits errors into three kinds. Only the first — configuration
// errors — gets a dedicated type: it is the one class that must abort the
// whole process group rather than being logged and tolerated. Everything else
// (per-job soft failures, MPI errors) flows through `anyhow::Result` at the
// call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("missing replica data for material '{material}' replica #{replica}: {path}")]
    MissingReplicaFile {
        material: String,
        replica: usize,
        path: String,
    },

    #[error("malformed JSON in replica config {path}: {source}")]
    MalformedJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("optimizer returned a malformed value: {0}")]
    OptimizerMisreturn(String),
}
