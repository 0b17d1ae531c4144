//! Persisting lowered modules: verification, then one textual `.bc`
//! file per slab in the output directory.
//!
//! Object-file emission stays external: the driver hands each `.bc` to
//! the host C compiler. File names are the slab id with `/` replaced by
//! `_`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::ir::{self, Module};
use crate::model::Bundle;

/// Writes every module; returns the paths written, in slab order.
/// Verification failure aborts the run: the lowerer emitted broken IR,
/// which is a compiler bug, not user error.
pub fn write_bundle(bundle: &Bundle, modules: &[Module], out_dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();
    for (slab, module) in bundle.slabs.iter().zip(modules) {
        module
            .verify()
            .map_err(|e| io::Error::other(format!("invalid IR for slab {}: {e}", slab.id)))?;
        let path = out_dir.join(format!("{}.bc", slab.flat_id()));
        fs::write(&path, ir::write::module_to_string(module))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattened_names_replace_path_separators() {
        let slab = crate::model::Slab::new("LOCAL_phys/vector".to_string(), PathBuf::from("phys/vector.tabi"));
        assert_eq!(slab.flat_id(), "LOCAL_phys_vector");
    }
}
