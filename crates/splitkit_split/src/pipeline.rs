//! Split orchestration: load, resolve, align, partition, then render and export per group.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;

use tracing::{error, info};

use crate::group::{StablePartitioner, plan_groups, resolve_key_column};
use crate::pdf::{create_pdf_exporter, probe_pdf_capabilities};
use crate::render::TemplateRenderer;
use crate::source::read_source_table;
use crate::spec::{
    EnumGroupingStrategy, EnumSplitEvent, EnumSplitState, ReportSplit, SpecPdfCapabilities,
    SpecPdfJob, SpecSplitOptions, SplitError,
};
use crate::template::{align_columns, probe_template_header};
use crate::util::format_cell_text;

const C_WORKER_THREAD_NAME: &str = "splitkit-split";

////////////////////////////////////////////////////////////////////////////////
// #region Events

/// Forwards events to the caller and tracks the current state.
struct SplitEmitter<'a> {
    sink: &'a mut dyn FnMut(EnumSplitEvent),
    state: EnumSplitState,
}

impl<'a> SplitEmitter<'a> {
    fn new(sink: &'a mut dyn FnMut(EnumSplitEvent)) -> Self {
        Self {
            sink,
            state: EnumSplitState::Idle,
        }
    }

    fn transition(&mut self, state: EnumSplitState) {
        info!(from = ?self.state, to = ?state, "split state");
        self.state = state;
        (self.sink)(EnumSplitEvent::State(state));
    }

    fn status(&mut self, msg: impl Into<String>) {
        (self.sink)(EnumSplitEvent::Status(msg.into()));
    }

    fn progress(&mut self, total: usize, completed: usize) {
        (self.sink)(EnumSplitEvent::Progress { total, completed });
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Run

/// Run a split, probing PDF capabilities first.
pub fn run_split(
    options: &SpecSplitOptions,
    sink: &mut dyn FnMut(EnumSplitEvent),
) -> Result<ReportSplit, SplitError> {
    let caps = probe_pdf_capabilities(options.path_office.as_deref());
    run_split_with_capabilities(options, &caps, sink)
}

/// Run a split against an already probed capability set.
///
/// The first error ends the run in [`EnumSplitState::Failed`]; files written
/// before it stay on disk.
pub fn run_split_with_capabilities(
    options: &SpecSplitOptions,
    caps: &SpecPdfCapabilities,
    sink: &mut dyn FnMut(EnumSplitEvent),
) -> Result<ReportSplit, SplitError> {
    let mut emitter = SplitEmitter::new(sink);
    match run_stages(options, caps, &mut emitter) {
        Ok(report) => {
            emitter.transition(EnumSplitState::Done);
            emitter.status(format!("Done. {report}"));
            Ok(report)
        }
        Err(err) => {
            error!(state = ?emitter.state, error = %err, "split failed");
            emitter.transition(EnumSplitState::Failed);
            emitter.status(format!("Error: {err}. {}", err.remediation()));
            Err(err)
        }
    }
}

fn run_stages(
    options: &SpecSplitOptions,
    caps: &SpecPdfCapabilities,
    emitter: &mut SplitEmitter<'_>,
) -> Result<ReportSplit, SplitError> {
    options.validate()?;
    let mut exporter = create_pdf_exporter(options.rule_pdf_engine, caps)?;
    let mut report = ReportSplit::default();

    emitter.transition(EnumSplitState::Reading);
    emitter.status(format!(
        "Reading sheet {:?} from {}",
        options.sheet_name,
        options.path_source.display()
    ));
    let df = read_source_table(&options.path_source, &options.sheet_name)?;
    let renderer = TemplateRenderer::new(&options.path_template, options.header_rows)?;
    emitter.status(format!("Loaded {} row(s), {} column(s)", df.height(), df.width()));

    emitter.transition(EnumSplitState::Resolving);
    let col_key = resolve_key_column(&df, &options.key_column)?;
    emitter.status(format!("Key column: {col_key}"));

    emitter.transition(EnumSplitState::Aligning);
    let header = probe_template_header(&options.path_template, options.header_rows)?;
    let l_source: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.to_string())
        .collect();
    let cols_output = align_columns(&l_source, header.as_ref());
    if cols_output != l_source {
        emitter.status(format!("Columns aligned to template: {cols_output:?}"));
    }

    emitter.transition(EnumSplitState::Partitioning);
    let (l_groups, strategy) = plan_groups(&df, &col_key, &cols_output, &StablePartitioner)?;
    if strategy != EnumGroupingStrategy::Direct {
        report.warn(format!("grouping used fallback {strategy:?}"));
        emitter.status(format!("Grouping fell back to {strategy:?}"));
    }
    let n_total = l_groups.len();
    emitter.status(format!("Found {n_total} group(s)"));
    emitter.progress(n_total, 0);

    create_output_dir(options)?;

    // Distinct keys can sanitize to one file name; the later group wins.
    let mut set_written: HashSet<PathBuf> = HashSet::new();
    for (n_idx, group) in l_groups.iter().enumerate() {
        let n_pos = n_idx + 1;
        let c_key = format_cell_text(&group.key);

        emitter.transition(EnumSplitState::Rendering(n_pos, n_total));
        let path_xlsx = renderer.render_group(
            group,
            &options.dir_out,
            &options.prefix,
            &options.suffix,
            &mut report,
        )?;
        emitter.status(format!(
            "[{n_pos}/{n_total}] key={c_key:?} -> {}",
            path_xlsx.display()
        ));
        let if_fresh = set_written.insert(path_xlsx.clone());
        if !if_fresh {
            report.warn(format!(
                "group key={c_key:?} overwrote {}",
                path_xlsx.display()
            ));
        }

        if let Some(exporter) = exporter.as_mut() {
            emitter.transition(EnumSplitState::ExportingPdf(n_pos, n_total));
            let job = SpecPdfJob {
                path_xlsx: &path_xlsx,
                path_template: &options.path_template,
                header_rows: options.header_rows,
                df_group: &group.df,
            };
            let path_pdf = exporter.export(&job)?;
            emitter.status(format!(
                "[{n_pos}/{n_total}] {} -> {}",
                exporter.engine(),
                path_pdf.display()
            ));
            if if_fresh {
                report.files_pdf.push(path_pdf);
            }
        }

        if if_fresh {
            report.files_xlsx.push(path_xlsx);
        }
        report.cnt_groups += 1;
        emitter.progress(n_total, n_pos);
    }

    info!(report = %report, "split finished");
    Ok(report)
}

fn create_output_dir(options: &SpecSplitOptions) -> Result<(), SplitError> {
    std::fs::create_dir_all(&options.dir_out).map_err(|err| match err.kind() {
        ErrorKind::PermissionDenied => SplitError::PermissionDenied {
            path: options.dir_out.clone(),
            message: err.to_string(),
        },
        _ => SplitError::OutputWrite {
            path: options.dir_out.clone(),
            message: err.to_string(),
        },
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Worker

/// Handle of a split running on a worker thread.
#[derive(Debug)]
pub struct SplitHandle {
    events: Receiver<EnumSplitEvent>,
    worker: JoinHandle<Result<ReportSplit, SplitError>>,
}

impl SplitHandle {
    /// Event stream; ends when the run finishes.
    pub fn events(&self) -> &Receiver<EnumSplitEvent> {
        &self.events
    }

    /// Wait for the run result.
    pub fn join(self) -> Result<ReportSplit, SplitError> {
        self.worker
            .join()
            .map_err(|_| SplitError::Worker("worker thread panicked".to_string()))?
    }
}

/// Run [`run_split`] on a named worker thread, streaming events over a channel.
pub fn spawn_split(options: SpecSplitOptions) -> Result<SplitHandle, SplitError> {
    let (tx, rx) = mpsc::channel();
    let worker = std::thread::Builder::new()
        .name(C_WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let mut sink = |event: EnumSplitEvent| {
                // A dropped receiver only means nobody is listening.
                let _ = tx.send(event);
            };
            run_split(&options, &mut sink)
        })
        .map_err(|err| SplitError::Worker(err.to_string()))?;
    Ok(SplitHandle { events: rx, worker })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
