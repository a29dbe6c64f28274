//! Printer description generation is a pure function from advertised
//! capabilities to the bytes the local print service needs to create a
//! queue. This module only needs to satisfy that interface — it does not
//! attempt to be a full PPD generator.

use std::io::Write;
use std::path::PathBuf;

use crate::errors::Result;
use crate::print_service::PrinterAttributes;

/// Filter binary invoked by a generated interface script.
const FILTER_BINARY: &str = "/usr/lib/cups/filter/rastertopwg";

/// Try to synthesise a minimal PPD-like description file from a printer's
/// reported attributes. Returns `None` when the attributes aren't rich enough
/// to build one, in which case the caller falls back to an interface script.
pub fn synthesize_description_file(attrs: &PrinterAttributes, model: &str) -> Result<Option<PathBuf>> {
    if attrs.document_formats.is_empty() {
        return Ok(None);
    }
    let mut file = tempfile::Builder::new().prefix("cups-browsed-rs-").suffix(".ppd").tempfile()?;
    let make_and_model = attrs.make_and_model.clone().unwrap_or_else(|| model.to_string());
    writeln!(file, "*PPD-Adobe: \"4.3\"")?;
    writeln!(file, "*ModelName: \"{make_and_model}\"")?;
    writeln!(file, "*NickName: \"{make_and_model}, driverless\"")?;
    for format in &attrs.document_formats {
        writeln!(file, "*cupsFilter2: \"{format} 0 -\"")?;
    }
    let (_, path) = file.keep().map_err(|e| crate::errors::DaemonError::Other(e.into()))?;
    Ok(Some(path))
}

/// Emit a short interface script invoking the configured filter binary with
/// `output-format=<pdl>` and `make-and-model=<model>`, for printers that
/// don't support a richer description file.
pub fn write_interface_script(pdl: &str, model: &str) -> Result<PathBuf> {
    let mut file = tempfile::Builder::new().prefix("cups-browsed-rs-").suffix(".sh").tempfile()?;
    writeln!(file, "#!/bin/sh")?;
    writeln!(file, "exec {FILTER_BINARY} output-format={pdl} make-and-model=\"{model}\" \"$@\"")?;
    let (_, path) = file.keep().map_err(|e| crate::errors::DaemonError::Other(e.into()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(path)
}
