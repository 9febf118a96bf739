//! Native spreadsheet application automation through a PowerShell COM session.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::conf::C_NATIVE_APP_PROG_ID;
use crate::pdf::PdfExporter;
use crate::spec::{EnumPdfEngine, SpecPdfJob, SplitError};

const C_POWERSHELL_EXE: &str = "powershell";
/// `xlTypePDF` for `ExportAsFixedFormat`.
const N_XL_TYPE_PDF: u8 = 0;

/// Whether the automation ProgID is registered (Windows only).
pub fn detect_native_app() -> bool {
    if !cfg!(windows) {
        return false;
    }
    Command::new("reg")
        .args(["query", &format!(r"HKCR\{C_NATIVE_APP_PROG_ID}")])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Quote `text` as a PowerShell single-quoted literal.
fn quote_powershell(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Script that opens `path_xlsx` hidden, exports its active sheet to `path_pdf`,
/// then closes the workbook and quits whether or not the export succeeded.
pub fn derive_export_script(path_xlsx: &Path, path_pdf: &Path) -> String {
    let c_xlsx = quote_powershell(&path_xlsx.to_string_lossy());
    let c_pdf = quote_powershell(&path_pdf.to_string_lossy());
    let c_prog_id = quote_powershell(C_NATIVE_APP_PROG_ID);
    [
        "$ErrorActionPreference = 'Stop'".to_string(),
        "$app = $null; $wb = $null".to_string(),
        "try {".to_string(),
        format!("  $app = New-Object -ComObject {c_prog_id}"),
        "  $app.Visible = $false".to_string(),
        "  $app.DisplayAlerts = $false".to_string(),
        format!("  $wb = $app.Workbooks.Open({c_xlsx}, 0, $true)"),
        format!("  $wb.ActiveSheet.ExportAsFixedFormat({N_XL_TYPE_PDF}, {c_pdf})"),
        "} finally {".to_string(),
        "  if ($wb -ne $null) { $wb.Close($false) | Out-Null }".to_string(),
        "  if ($app -ne $null) {".to_string(),
        "    $app.Quit() | Out-Null".to_string(),
        "    [System.Runtime.InteropServices.Marshal]::ReleaseComObject($app) | Out-Null".to_string(),
        "  }".to_string(),
        "}".to_string(),
    ]
    .join("\n")
}

/// Automation exporter; each export runs in its own application session.
#[derive(Debug, Clone, Default)]
pub struct NativePdfExporter;

impl NativePdfExporter {
    /// Availability is checked by the capability probe, not here.
    pub fn new() -> Self {
        Self
    }
}

impl PdfExporter for NativePdfExporter {
    fn engine(&self) -> EnumPdfEngine {
        EnumPdfEngine::Native
    }

    fn export(&mut self, job: &SpecPdfJob<'_>) -> Result<PathBuf, SplitError> {
        let path_xlsx = std::path::absolute(job.path_xlsx)
            .map_err(|err| SplitError::Automation(format!("resolve workbook path: {err}")))?;
        let path_pdf = path_xlsx.with_extension(crate::conf::C_EXT_PDF);
        info!(xlsx = %path_xlsx.display(), "native application export");

        let output = Command::new(C_POWERSHELL_EXE)
            .args(["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command"])
            .arg(derive_export_script(&path_xlsx, &path_pdf))
            .output()
            .map_err(|err| SplitError::ApplicationUnavailable(format!("{C_POWERSHELL_EXE}: {err}")))?;
        if !output.status.success() {
            let c_stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SplitError::Automation(if c_stderr.is_empty() {
                format!("automation exited with status {:?}", output.status.code())
            } else {
                c_stderr
            }));
        }
        if !path_pdf.is_file() {
            return Err(SplitError::Automation(format!(
                "export finished but {} is missing",
                path_pdf.display()
            )));
        }
        Ok(job.path_pdf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_script_quotes_paths_and_always_quits() {
        let c_script = derive_export_script(
            Path::new(r"C:\out\O'Brien 1.xlsx"),
            Path::new(r"C:\out\O'Brien 1.pdf"),
        );
        assert!(c_script.contains(r"Open('C:\out\O''Brien 1.xlsx', 0, $true)"));
        assert!(c_script.contains(r"ExportAsFixedFormat(0, 'C:\out\O''Brien 1.pdf')"));
        assert!(c_script.contains("New-Object -ComObject 'Excel.Application'"));
        let n_finally = c_script.find("finally").expect("finally");
        assert!(c_script.find("$app.Quit()").expect("quit") > n_finally);
        assert!(c_script.find("$wb.Close($false)").expect("close") > n_finally);
    }

    #[cfg(not(windows))]
    #[test]
    fn native_app_is_never_detected_off_windows() {
        assert!(!detect_native_app());
    }
}
