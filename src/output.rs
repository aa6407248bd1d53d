//! Atomic file output shared by the WAV and MIDI encoders.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{RenderError, Result};

/// Write `bytes` to `path` so that the destination either holds the complete
/// file or is left untouched. The data goes to a temporary file in the same
/// directory, is synced, and is then renamed over `path`. On any error the
/// temporary is removed when it drops.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io_err = |e| RenderError::io(path, e);

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| RenderError::io(path, e.error))?;

    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
    Ok(())
}
