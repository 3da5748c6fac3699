//! Atomically write stdin or a file to a path

use crate::util;
use anyhow::{Context, Result};
use settle_core::AtomicWriter;
use std::io::Read;
use std::path::Path;

pub fn run(
    path: &Path,
    from: Option<&Path>,
    parents: bool,
    mode: Option<&str>,
    backup: bool,
    replace: bool,
) -> Result<()> {
    let content = match from {
        Some(source) => std::fs::read(source)
            .with_context(|| format!("Failed to read {}", source.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let mut writer = AtomicWriter::new().create_parents(parents).backup(backup);
    if let Some(mode) = mode {
        writer = writer.permissions(util::parse_mode(mode)?);
    }

    if replace {
        writer.replace(path, &content)?;
    } else {
        writer.write(path, &content)?;
    }

    tracing::debug!("Wrote {} to {}", util::format_size(content.len() as u64), path.display());
    Ok(())
}
