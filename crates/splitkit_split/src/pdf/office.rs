//! Headless office-suite conversion (`soffice --convert-to pdf`).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::conf::{
    C_ENV_OFFICE_PATH, C_OFFICE_EXE_UNIX, C_OFFICE_EXE_WINDOWS, TUP_OFFICE_COMMON_PATHS,
};
use crate::pdf::PdfExporter;
use crate::spec::{EnumPdfEngine, SpecPdfJob, SplitError};

/// Converter executable names tried in a directory, platform name first.
fn derive_exe_names() -> [&'static str; 2] {
    if cfg!(windows) {
        [C_OFFICE_EXE_WINDOWS, C_OFFICE_EXE_UNIX]
    } else {
        [C_OFFICE_EXE_UNIX, C_OFFICE_EXE_WINDOWS]
    }
}

/// Resolve a user-supplied location: the executable itself, an install directory,
/// or its `program/` sub-directory.
pub fn normalize_office_path(raw: &Path) -> Option<PathBuf> {
    if raw.as_os_str().is_empty() {
        return None;
    }
    if raw.is_file() {
        return Some(raw.to_path_buf());
    }
    if !raw.is_dir() {
        return None;
    }
    for c_exe in derive_exe_names() {
        for path_candidate in [raw.join(c_exe), raw.join("program").join(c_exe)] {
            if path_candidate.is_file() {
                return Some(path_candidate);
            }
        }
    }
    None
}

/// Find the converter: explicit path, env value, `PATH` entries, then `common` locations.
pub fn locate_office_converter(
    explicit: Option<&Path>,
    env_value: Option<OsString>,
    path_var: Option<OsString>,
    common: &[&str],
) -> Option<PathBuf> {
    if let Some(path) = explicit.and_then(normalize_office_path) {
        return Some(path);
    }
    if let Some(path) = env_value
        .as_deref()
        .and_then(|value| normalize_office_path(Path::new(value)))
    {
        return Some(path);
    }
    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(&path_var) {
            for c_exe in derive_exe_names() {
                let path_candidate = dir.join(c_exe);
                if path_candidate.is_file() {
                    return Some(path_candidate);
                }
            }
        }
    }
    common
        .iter()
        .map(PathBuf::from)
        .find(|path_candidate| path_candidate.is_file())
}

/// Find the converter using the process environment.
pub fn find_office_converter(explicit: Option<&Path>) -> Option<PathBuf> {
    let path_found = locate_office_converter(
        explicit,
        std::env::var_os(C_ENV_OFFICE_PATH),
        std::env::var_os("PATH"),
        &TUP_OFFICE_COMMON_PATHS,
    );
    debug!(path = ?path_found, "office converter lookup");
    path_found
}

/// Office-suite exporter bound to one converter executable.
#[derive(Debug, Clone)]
pub struct OfficePdfExporter {
    path_exe: PathBuf,
}

impl OfficePdfExporter {
    /// Exporter driving the converter at `path_exe`, usually from [`find_office_converter`].
    pub fn new(path_exe: PathBuf) -> Self {
        Self { path_exe }
    }

    /// Converter arguments for `path_xlsx`.
    pub fn derive_args(path_xlsx: &Path) -> Vec<OsString> {
        let dir_out = path_xlsx
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        vec![
            "--headless".into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
            dir_out.into_os_string(),
            path_xlsx.as_os_str().to_os_string(),
        ]
    }
}

impl PdfExporter for OfficePdfExporter {
    fn engine(&self) -> EnumPdfEngine {
        EnumPdfEngine::Office
    }

    fn export(&mut self, job: &SpecPdfJob<'_>) -> Result<PathBuf, SplitError> {
        info!(exe = %self.path_exe.display(), xlsx = %job.path_xlsx.display(), "office conversion");
        let output = Command::new(&self.path_exe)
            .args(Self::derive_args(job.path_xlsx))
            .output()
            .map_err(|err| {
                SplitError::BackendNotFound(format!("{}: {err}", self.path_exe.display()))
            })?;

        if !output.status.success() {
            return Err(SplitError::ConversionProcess {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let path_pdf = job.path_pdf();
        if !path_pdf.is_file() {
            return Err(SplitError::ConversionProcess {
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: format!("converter reported success but {} is missing", path_pdf.display()),
            });
        }
        Ok(path_pdf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestDir;
    use polars::prelude::DataFrame;
    use pretty_assertions::assert_eq;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, b"").expect("touch");
    }

    #[test]
    fn normalize_accepts_exe_install_dir_and_program_dir() {
        let tmp = TestDir::new();
        let path_exe = tmp.path().join("lo").join("program").join(derive_exe_names()[0]);
        touch(&path_exe);

        assert_eq!(normalize_office_path(&path_exe), Some(path_exe.clone()));
        assert_eq!(
            normalize_office_path(&tmp.path().join("lo")),
            Some(path_exe.clone())
        );
        assert_eq!(
            normalize_office_path(&tmp.path().join("lo").join("program")),
            Some(path_exe)
        );
        assert_eq!(normalize_office_path(&tmp.path().join("missing")), None);
        assert_eq!(normalize_office_path(Path::new("")), None);
    }

    #[test]
    fn locate_prefers_explicit_then_env_then_path_then_common() {
        let tmp = TestDir::new();
        let c_exe = derive_exe_names()[0];
        let path_explicit = tmp.path().join("explicit").join(c_exe);
        let path_env = tmp.path().join("env").join(c_exe);
        let path_on_path = tmp.path().join("bin").join(c_exe);
        let path_common = tmp.path().join("common").join(c_exe);
        for path in [&path_explicit, &path_env, &path_on_path, &path_common] {
            touch(path);
        }
        let path_var = std::env::join_paths([tmp.path().join("bin")]).expect("join");
        let c_common = path_common.to_string_lossy().into_owned();
        let l_common = [c_common.as_str()];

        let locate = |explicit: Option<&Path>, env: bool, path: bool| {
            locate_office_converter(
                explicit,
                env.then(|| tmp.path().join("env").into_os_string()),
                path.then(|| path_var.clone()),
                &l_common,
            )
        };
        assert_eq!(locate(Some(&path_explicit), true, true), Some(path_explicit.clone()));
        assert_eq!(locate(None, true, true), Some(path_env.clone()));
        assert_eq!(locate(None, false, true), Some(path_on_path.clone()));
        assert_eq!(locate(None, false, false), Some(path_common.clone()));
        assert_eq!(
            locate_office_converter(None, None, None, &[]),
            None
        );
    }

    #[test]
    fn derive_args_targets_workbook_directory() {
        let l_args = OfficePdfExporter::derive_args(Path::new("/out/1.xlsx"));
        assert_eq!(
            l_args,
            vec![
                OsString::from("--headless"),
                OsString::from("--convert-to"),
                OsString::from("pdf"),
                OsString::from("--outdir"),
                OsString::from("/out"),
                OsString::from("/out/1.xlsx"),
            ]
        );
    }

    #[cfg(unix)]
    fn write_fake_converter(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("soffice");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script");
        let mut perms = std::fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[cfg(unix)]
    #[test]
    fn export_runs_converter_and_returns_pdf_path() {
        let tmp = TestDir::new();
        // $5 is --outdir's value, $6 the workbook.
        let path_exe = write_fake_converter(
            tmp.path(),
            r#"name=$(basename "$6" .xlsx); printf '%%PDF-1.4' > "$5/$name.pdf""#,
        );
        let path_xlsx = tmp.path().join("1.xlsx");
        touch(&path_xlsx);
        let df = DataFrame::empty();
        let job = SpecPdfJob {
            path_xlsx: &path_xlsx,
            path_template: &path_xlsx,
            header_rows: 1,
            df_group: &df,
        };
        let path_pdf = OfficePdfExporter::new(path_exe).export(&job).expect("export");
        assert_eq!(path_pdf, tmp.path().join("1.pdf"));
        assert!(path_pdf.is_file());
    }

    #[cfg(unix)]
    #[test]
    fn export_failure_captures_process_output() {
        let tmp = TestDir::new();
        let path_exe = write_fake_converter(tmp.path(), "echo converting; echo broken >&2; exit 3");
        let path_xlsx = tmp.path().join("1.xlsx");
        let df = DataFrame::empty();
        let job = SpecPdfJob {
            path_xlsx: &path_xlsx,
            path_template: &path_xlsx,
            header_rows: 1,
            df_group: &df,
        };
        match OfficePdfExporter::new(path_exe).export(&job) {
            Err(SplitError::ConversionProcess { status, stdout, stderr }) => {
                assert_eq!(status, Some(3));
                assert_eq!(stdout.trim(), "converting");
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
