//! PDF export backends.
//!
//! - `layout`: in-process table layout (feature `pdf-layout`).
//! - `office`: headless office-suite conversion subprocess.
//! - `native`: spreadsheet application automation (Windows).

#[cfg(feature = "pdf-layout")]
pub mod layout;
pub mod native;
pub mod office;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::spec::{EnumPdfEngine, SpecPdfCapabilities, SpecPdfJob, SplitError};

/// Converts one rendered workbook into a PDF next to it.
pub trait PdfExporter {
    /// Engine implemented by this exporter.
    fn engine(&self) -> EnumPdfEngine;

    /// Export `job`; return the written PDF path.
    fn export(&mut self, job: &SpecPdfJob<'_>) -> Result<PathBuf, SplitError>;
}

/// Probe which engines can run on this machine.
pub fn probe_pdf_capabilities(path_office: Option<&Path>) -> SpecPdfCapabilities {
    let caps = SpecPdfCapabilities {
        if_layout_renderer: cfg!(feature = "pdf-layout"),
        path_office: office::find_office_converter(path_office),
        if_native_app: native::detect_native_app(),
    };
    debug!(?caps, "pdf capabilities probed");
    caps
}

/// Build the exporter for `engine`; `None` when no PDF is requested.
pub fn create_pdf_exporter(
    engine: EnumPdfEngine,
    caps: &SpecPdfCapabilities,
) -> Result<Option<Box<dyn PdfExporter + Send>>, SplitError> {
    match engine {
        EnumPdfEngine::None => Ok(None),
        EnumPdfEngine::Layout => create_layout_exporter(caps),
        EnumPdfEngine::Office => {
            let Some(path_exe) = caps.path_office.clone() else {
                return Err(SplitError::BackendNotFound(
                    "soffice was not found via the explicit path, LIBREOFFICE_PATH, PATH or common install locations"
                        .to_string(),
                ));
            };
            Ok(Some(Box::new(office::OfficePdfExporter::new(path_exe))))
        }
        EnumPdfEngine::Native => {
            if !caps.if_native_app {
                return Err(SplitError::ApplicationUnavailable(
                    "no spreadsheet application registered for automation".to_string(),
                ));
            }
            Ok(Some(Box::new(native::NativePdfExporter::new())))
        }
    }
}

#[cfg(feature = "pdf-layout")]
fn create_layout_exporter(
    caps: &SpecPdfCapabilities,
) -> Result<Option<Box<dyn PdfExporter + Send>>, SplitError> {
    if !caps.if_layout_renderer {
        return Err(SplitError::RenderingBackendUnavailable(
            "layout renderer disabled".to_string(),
        ));
    }
    Ok(Some(Box::new(layout::LayoutPdfExporter)))
}

#[cfg(not(feature = "pdf-layout"))]
fn create_layout_exporter(
    _caps: &SpecPdfCapabilities,
) -> Result<Option<Box<dyn PdfExporter + Send>>, SplitError> {
    Err(SplitError::RenderingBackendUnavailable(
        "built without the `pdf-layout` feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_none_needs_no_exporter() {
        let caps = SpecPdfCapabilities::default();
        assert!(
            create_pdf_exporter(EnumPdfEngine::None, &caps)
                .expect("none")
                .is_none()
        );
    }

    #[test]
    fn unavailable_engines_map_to_specific_errors() {
        let caps = SpecPdfCapabilities::default();
        assert!(matches!(
            create_pdf_exporter(EnumPdfEngine::Layout, &caps),
            Err(SplitError::RenderingBackendUnavailable(_))
        ));
        assert!(matches!(
            create_pdf_exporter(EnumPdfEngine::Office, &caps),
            Err(SplitError::BackendNotFound(_))
        ));
        assert!(matches!(
            create_pdf_exporter(EnumPdfEngine::Native, &caps),
            Err(SplitError::ApplicationUnavailable(_))
        ));
    }

    #[test]
    fn office_exporter_uses_probed_path() {
        let caps = SpecPdfCapabilities {
            path_office: Some(PathBuf::from("/opt/soffice")),
            ..Default::default()
        };
        let exporter = create_pdf_exporter(EnumPdfEngine::Office, &caps)
            .expect("office")
            .expect("exporter");
        assert_eq!(exporter.engine(), EnumPdfEngine::Office);
    }

    #[cfg(feature = "pdf-layout")]
    #[test]
    fn layout_exporter_follows_feature() {
        let caps = probe_pdf_capabilities(None);
        assert!(caps.if_layout_renderer);
        let exporter = create_pdf_exporter(EnumPdfEngine::Layout, &caps)
            .expect("layout")
            .expect("exporter");
        assert_eq!(exporter.engine(), EnumPdfEngine::Layout);
    }
}
