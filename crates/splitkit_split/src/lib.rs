//! `splitkit_split` v1:
//! Template-driven spreadsheet split kernel.
//!
//! Modules:
//! - `conf`     : constants and default presets
//! - `spec`     : options, models, events, report and errors
//! - `util`     : pure helper functions
//! - `source`   : source workbook loading
//! - `group`    : key resolution and partitioning
//! - `template` : template probing and column alignment
//! - `package`  : OOXML package cleanup and print geometry
//! - `render`   : per-group template rendering
//! - `pdf`      : PDF export backends
//! - `pipeline` : run orchestration and worker
//! - `config`   : INI persistence
pub mod conf;
pub mod config;
pub mod group;
pub mod package;
pub mod pdf;
pub mod pipeline;
pub mod render;
pub mod source;
pub mod spec;
pub mod template;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use conf::{EnumColumnIdentifier, N_COLS_PROBE_MAX, N_HEADER_ROWS_DEFAULT, TUP_FILENAME_ILLEGAL};
pub use config::{SpecSplitConfig, load_split_config, parse_split_config, save_split_config};
pub use group::{Partitioner, StablePartitioner, plan_groups, resolve_key_column};
pub use pdf::{PdfExporter, create_pdf_exporter, probe_pdf_capabilities};
pub use pipeline::{SplitHandle, run_split, run_split_with_capabilities, spawn_split};
pub use render::TemplateRenderer;
pub use source::{derive_key_column_choices, list_sheet_names, read_source_headers, read_source_table};
pub use spec::{
    EnumCellValue, EnumGroupingStrategy, EnumPdfEngine, EnumSplitEvent, EnumSplitState,
    ReportSplit, SpecGroup, SpecPageSetup, SpecPdfCapabilities, SpecPdfJob, SpecSplitOptions,
    SpecTemplateColumn, SpecTemplateHeader, SplitError,
};
pub use template::{align_columns, probe_page_setup, probe_template_columns, probe_template_header};
pub use util::{derive_output_stem, sanitize_file_part};
