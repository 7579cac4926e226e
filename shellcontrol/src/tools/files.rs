//! Read-file and write-file executors.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::core::error::ToolExecutionError;
use crate::core::types::ToolResult;

pub fn read_file(path: &Path) -> Result<ToolResult, ToolExecutionError> {
    match fs::read_to_string(path) {
        Ok(content) => {
            debug!(path = %path.display(), bytes = content.len(), "read file");
            Ok(ToolResult::message(format!(
                "Successfully read {}:\n{content}",
                path.display()
            )))
        }
        Err(e) => {
            warn!(path = %path.display(), err = %e, "read failed");
            Err(ToolExecutionError::filesystem(format!(
                "Read error: {}: {e}",
                path.display()
            )))
        }
    }
}

/// Replace the file contents wholesale, creating parent directories.
pub fn write_file(path: &Path, content: &str) -> Result<ToolResult, ToolExecutionError> {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    };
    match write() {
        Ok(()) => {
            debug!(path = %path.display(), bytes = content.len(), "wrote file");
            Ok(ToolResult::message(format!(
                "Successfully wrote to {}",
                path.display()
            )))
        }
        Err(e) => {
            warn!(path = %path.display(), err = %e, "write failed");
            Err(ToolExecutionError::filesystem(format!(
                "Write error: {}: {e}",
                path.display()
            )))
        }
    }
}
