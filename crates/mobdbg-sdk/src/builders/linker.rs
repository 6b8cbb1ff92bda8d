//! Per-target linker configuration in `.cargo/config.toml`.
//!
//! Cargo needs the NDK clang wrapper as linker and the clang runtime and
//! sysroot directories on the link search path for every Android triple.
//! Entries are keyed by `target.<triple>`: a triple that already has a table
//! (ours from a previous run, or the user's own) is left alone, and unrelated
//! content keeps its formatting and comments.

use std::path::{Path, PathBuf};

use toml_edit::{Array, DocumentMut, Item, Table, value};

use crate::ndk::NdkLayout;
use crate::types::{MobdbgError, TargetSpec};

/// Writer for the cargo configuration file of a crate.
#[derive(Debug, Clone)]
pub struct LinkerConfig {
    path: PathBuf,
}

impl LinkerConfig {
    /// Uses `<crate_dir>/.cargo/config.toml`.
    pub fn for_crate(crate_dir: &Path) -> Self {
        Self::at(crate_dir.join(".cargo").join("config.toml"))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds missing `[target.<triple>]` tables for the Android targets in `targets`.
    ///
    /// Returns the triples that were added. The file is only rewritten when
    /// something was added, so a second run leaves it byte-identical.
    pub fn ensure(
        &self,
        ndk: &NdkLayout,
        targets: &[TargetSpec],
    ) -> Result<Vec<&'static str>, MobdbgError> {
        let original = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut doc: DocumentMut = original.parse().map_err(|e| {
            MobdbgError::Config(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        let added = add_target_tables(&mut doc, ndk, targets).ok_or_else(|| {
            MobdbgError::Config(format!(
                "`target` in {} is not a table",
                self.path.display()
            ))
        })?;

        if added.is_empty() {
            tracing::debug!("linker config {} already up to date", self.path.display());
            return Ok(added);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, doc.to_string())?;
        tracing::info!(
            "Configured NDK linker for {} in {}",
            added.join(", "),
            self.path.display()
        );
        Ok(added)
    }
}

/// Returns `None` when an existing `target` key is not a table.
fn add_target_tables(
    doc: &mut DocumentMut,
    ndk: &NdkLayout,
    targets: &[TargetSpec],
) -> Option<Vec<&'static str>> {
    let root = doc.as_table_mut();
    if !root.contains_key("target") {
        let mut implicit = Table::new();
        implicit.set_implicit(true);
        root.insert("target", Item::Table(implicit));
    }
    let target_table = root.get_mut("target")?.as_table_mut()?;

    let mut added = Vec::new();
    for spec in targets {
        let Some(names) = spec.ndk() else {
            continue;
        };
        if target_table.contains_key(spec.triple) {
            continue;
        }

        let mut rustflags = Array::new();
        for dir in [
            ndk.clang_runtime_dir(names.clang_arch),
            ndk.sysroot_lib_dir(names.sysroot_triple),
        ] {
            rustflags.push("-C");
            rustflags.push(format!("link-arg=-L{}", dir.display()));
        }

        let mut table = Table::new();
        table.insert(
            "linker",
            value(ndk.linker_path(names).display().to_string()),
        );
        table.insert("rustflags", value(rustflags));
        target_table.insert(spec.triple, Item::Table(table));
        added.push(spec.triple);
    }
    Some(added)
}
