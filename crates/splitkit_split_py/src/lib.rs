use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pyo3::exceptions::{PyFileNotFoundError, PyPermissionError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use splitkit_split::{
    EnumColumnIdentifier, EnumPdfEngine, EnumSplitEvent, EnumSplitState, ReportSplit,
    SpecSplitConfig, SpecSplitOptions, SplitError, derive_key_column_choices, list_sheet_names,
    load_split_config, probe_pdf_capabilities, read_source_headers, run_split, save_split_config,
};

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "splitkit.split.v1";
const C_BRIDGE_TRANSPORT: &str = "rust_native";

#[pyclass(name = "ReportSplit")]
#[derive(Debug, Clone)]
struct PyReportSplit {
    #[pyo3(get)]
    cnt_groups: u64,
    #[pyo3(get)]
    files_xlsx: Vec<String>,
    #[pyo3(get)]
    files_pdf: Vec<String>,
    #[pyo3(get)]
    warnings: Vec<String>,
}

impl From<ReportSplit> for PyReportSplit {
    fn from(report: ReportSplit) -> Self {
        let cast_paths = |paths: Vec<PathBuf>| -> Vec<String> {
            paths
                .into_iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect()
        };
        Self {
            cnt_groups: report.cnt_groups,
            files_xlsx: cast_paths(report.files_xlsx),
            files_pdf: cast_paths(report.files_pdf),
            warnings: report.warnings,
        }
    }
}

#[pymethods]
impl PyReportSplit {
    #[getter]
    fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn to_dict(&self) -> BTreeMap<String, u64> {
        let mut dict_counts = BTreeMap::new();
        dict_counts.insert("cnt_groups".to_string(), self.cnt_groups);
        dict_counts.insert("cnt_xlsx".to_string(), self.files_xlsx.len() as u64);
        dict_counts.insert("cnt_pdf".to_string(), self.files_pdf.len() as u64);
        dict_counts.insert("cnt_warnings".to_string(), self.warning_count() as u64);
        dict_counts
    }

    #[pyo3(signature = (prefix = "[SPLIT]"))]
    fn format(&self, prefix: &str) -> String {
        format!(
            "{prefix} groups={} xlsx={} pdf={} warnings={}",
            self.cnt_groups,
            self.files_xlsx.len(),
            self.files_pdf.len(),
            self.warning_count()
        )
    }

    fn __str__(&self) -> String {
        self.format("[SPLIT]")
    }
}

fn map_split_error(exception: SplitError) -> PyErr {
    let c_message = format!("{exception}. {}", exception.remediation());
    match exception {
        SplitError::SourceNotFound(_) | SplitError::TemplateNotFound(_) => {
            PyFileNotFoundError::new_err(c_message)
        }
        SplitError::PermissionDenied { .. } => PyPermissionError::new_err(c_message),
        SplitError::SheetNotFound { .. }
        | SplitError::KeyResolution(_)
        | SplitError::ConfigFormat(_)
        | SplitError::InvalidOption(_) => PyValueError::new_err(c_message),
        _ => PyRuntimeError::new_err(c_message),
    }
}

fn parse_rule_pdf_engine(value: &str) -> PyResult<EnumPdfEngine> {
    EnumPdfEngine::parse(value).map_err(PyValueError::new_err)
}

/// Accept a header name (`str`) or a 1-based column index (`int`).
fn parse_key_column(key_column: &Bound<'_, PyAny>) -> PyResult<EnumColumnIdentifier> {
    if let Ok(n_index) = key_column.extract::<usize>() {
        return Ok(EnumColumnIdentifier::Index(n_index));
    }
    if let Ok(c_name) = key_column.extract::<String>() {
        return Ok(EnumColumnIdentifier::parse(&c_name));
    }
    Err(PyValueError::new_err(
        "key_column must be a header name (str) or a 1-based column index (int).",
    ))
}

fn derive_state_name(state: EnumSplitState) -> String {
    match state {
        EnumSplitState::Idle => "idle".to_string(),
        EnumSplitState::Reading => "reading".to_string(),
        EnumSplitState::Resolving => "resolving".to_string(),
        EnumSplitState::Aligning => "aligning".to_string(),
        EnumSplitState::Partitioning => "partitioning".to_string(),
        EnumSplitState::Rendering(n_pos, n_total) => format!("rendering {n_pos}/{n_total}"),
        EnumSplitState::ExportingPdf(n_pos, n_total) => format!("exporting_pdf {n_pos}/{n_total}"),
        EnumSplitState::Done => "done".to_string(),
        EnumSplitState::Failed => "failed".to_string(),
    }
}

/// Deliver one worker event to the Python callbacks; state changes reach `on_status`.
fn dispatch_event(
    py: Python<'_>,
    event: EnumSplitEvent,
    on_status: Option<&Py<PyAny>>,
    on_progress: Option<&Py<PyAny>>,
) -> PyResult<()> {
    match event {
        EnumSplitEvent::Status(msg) => {
            if let Some(callback) = on_status {
                callback.call1(py, (msg,))?;
            }
        }
        EnumSplitEvent::State(state) => {
            if let Some(callback) = on_status {
                callback.call1(py, (format!("[state] {}", derive_state_name(state)),))?;
            }
        }
        EnumSplitEvent::Progress { total, completed } => {
            if let Some(callback) = on_progress {
                callback.call1(py, (completed, total))?;
            }
        }
    }
    Ok(())
}

#[pyfunction(name = "split")]
#[pyo3(signature = (
    path_source,
    sheet_name,
    key_column,
    path_template,
    dir_out,
    header_rows = 5,
    rule_pdf_engine = "layout",
    path_office = None,
    prefix = "",
    suffix = "",
    on_status = None,
    on_progress = None
))]
#[allow(clippy::too_many_arguments)]
fn split_py(
    py: Python<'_>,
    path_source: String,
    sheet_name: String,
    key_column: &Bound<'_, PyAny>,
    path_template: String,
    dir_out: String,
    header_rows: u32,
    rule_pdf_engine: &str,
    path_office: Option<String>,
    prefix: &str,
    suffix: &str,
    on_status: Option<Py<PyAny>>,
    on_progress: Option<Py<PyAny>>,
) -> PyResult<PyReportSplit> {
    let mut spec_options = SpecSplitOptions::new(
        path_source,
        sheet_name,
        parse_key_column(key_column)?,
        path_template,
        dir_out,
    );
    spec_options.header_rows = header_rows;
    spec_options.rule_pdf_engine = parse_rule_pdf_engine(rule_pdf_engine)?;
    spec_options.path_office = path_office.filter(|c| !c.is_empty()).map(PathBuf::from);
    spec_options.prefix = prefix.to_string();
    spec_options.suffix = suffix.to_string();

    // Callbacks run on this thread; the GIL is taken only while one is delivered.
    let mut err_callback: Option<PyErr> = None;
    let result = py.allow_threads(|| {
        let mut sink = |event: EnumSplitEvent| {
            if err_callback.is_some() {
                return;
            }
            Python::with_gil(|py| {
                if let Err(err) = dispatch_event(py, event, on_status.as_ref(), on_progress.as_ref()) {
                    err_callback = Some(err);
                }
            });
        };
        run_split(&spec_options, &mut sink)
    });

    let report = result.map_err(map_split_error)?;
    if let Some(err) = err_callback {
        return Err(err);
    }
    Ok(PyReportSplit::from(report))
}

#[pyfunction(name = "list_sheet_names")]
fn list_sheet_names_py(py: Python<'_>, path_source: String) -> PyResult<Vec<String>> {
    py.allow_threads(|| list_sheet_names(Path::new(&path_source)))
        .map_err(map_split_error)
}

#[pyfunction(name = "read_source_headers")]
fn read_source_headers_py(
    py: Python<'_>,
    path_source: String,
    sheet_name: String,
) -> PyResult<Vec<String>> {
    py.allow_threads(|| read_source_headers(Path::new(&path_source), &sheet_name))
        .map_err(map_split_error)
}

#[pyfunction(name = "derive_key_column_choices")]
fn derive_key_column_choices_py(headers: Vec<String>) -> Vec<String> {
    derive_key_column_choices(&headers)
}

#[pyfunction(name = "probe_pdf_capabilities")]
#[pyo3(signature = (path_office = None))]
fn probe_pdf_capabilities_py<'py>(
    py: Python<'py>,
    path_office: Option<String>,
) -> PyResult<Bound<'py, PyDict>> {
    let caps = py.allow_threads(|| probe_pdf_capabilities(path_office.as_deref().map(Path::new)));
    let dict_caps = PyDict::new(py);
    dict_caps.set_item("layout", caps.if_layout_renderer)?;
    dict_caps.set_item(
        "libreoffice",
        caps.path_office
            .as_ref()
            .map(|path| path.to_string_lossy().to_string()),
    )?;
    dict_caps.set_item("excel", caps.if_native_app)?;
    Ok(dict_caps)
}

#[pyfunction(name = "load_config")]
fn load_config_py<'py>(py: Python<'py>, path_config: String) -> PyResult<Bound<'py, PyDict>> {
    let cfg = load_split_config(Path::new(&path_config)).map_err(map_split_error)?;
    let dict_cfg = PyDict::new(py);
    dict_cfg.set_item("template_path", cfg.template_path)?;
    dict_cfg.set_item("header_rows", cfg.header_rows)?;
    dict_cfg.set_item("source_path", cfg.source_path)?;
    dict_cfg.set_item("sheet_name", cfg.sheet_name)?;
    dict_cfg.set_item("key_col", cfg.key_col)?;
    dict_cfg.set_item("output_dir", cfg.output_dir)?;
    dict_cfg.set_item("pdf_engine", cfg.pdf_engine.as_str())?;
    dict_cfg.set_item("libreoffice_path", cfg.libreoffice_path)?;
    dict_cfg.set_item("prefix", cfg.prefix)?;
    dict_cfg.set_item("suffix", cfg.suffix)?;
    Ok(dict_cfg)
}

#[pyfunction(name = "save_config")]
#[pyo3(signature = (
    path_config,
    template_path = String::new(),
    header_rows = 5,
    source_path = String::new(),
    sheet_name = String::new(),
    key_col = String::new(),
    output_dir = String::new(),
    pdf_engine = "layout",
    libreoffice_path = String::new(),
    prefix = String::new(),
    suffix = String::new()
))]
#[allow(clippy::too_many_arguments)]
fn save_config_py(
    path_config: String,
    template_path: String,
    header_rows: u32,
    source_path: String,
    sheet_name: String,
    key_col: String,
    output_dir: String,
    pdf_engine: &str,
    libreoffice_path: String,
    prefix: String,
    suffix: String,
) -> PyResult<()> {
    let cfg = SpecSplitConfig {
        template_path,
        header_rows,
        source_path,
        sheet_name,
        key_col,
        output_dir,
        pdf_engine: parse_rule_pdf_engine(pdf_engine)?,
        libreoffice_path,
        prefix,
        suffix,
    };
    save_split_config(Path::new(&path_config), &cfg).map_err(map_split_error)
}

#[pymodule]
fn _splitkit_split_rs(module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyReportSplit>()?;
    module.add_function(wrap_pyfunction!(split_py, module)?)?;
    module.add_function(wrap_pyfunction!(list_sheet_names_py, module)?)?;
    module.add_function(wrap_pyfunction!(read_source_headers_py, module)?)?;
    module.add_function(wrap_pyfunction!(derive_key_column_choices_py, module)?)?;
    module.add_function(wrap_pyfunction!(probe_pdf_capabilities_py, module)?)?;
    module.add_function(wrap_pyfunction!(load_config_py, module)?)?;
    module.add_function(wrap_pyfunction!(save_config_py, module)?)?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    module.add("__bridge_transport__", C_BRIDGE_TRANSPORT)?;
    Ok(())
}
