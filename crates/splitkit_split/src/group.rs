//! Key resolution and row partitioning with text fallbacks.

use polars::prelude::{DataFrame, DataType, PolarsResult};
use tracing::{debug, warn};

use crate::conf::{C_COL_KEY_TEXT_TEMP, EnumColumnIdentifier};
use crate::spec::{EnumCellValue, EnumGroupingStrategy, SpecGroup, SplitError};
use crate::util::derive_cell_value_from_any_value;

/// Splits a table into first-seen-ordered partitions on one column.
pub trait Partitioner {
    /// Partition `df` on `col_key`, keeping the key column.
    fn partition(&self, df: &DataFrame, col_key: &str) -> PolarsResult<Vec<DataFrame>>;
}

/// Order-preserving partitioner backed by `partition_by_stable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StablePartitioner;

impl Partitioner for StablePartitioner {
    fn partition(&self, df: &DataFrame, col_key: &str) -> PolarsResult<Vec<DataFrame>> {
        df.partition_by_stable([col_key], true)
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region KeyResolution

/// Resolve a key reference to a column name of `df`.
///
/// Names match exactly first, then ignoring surrounding whitespace on both sides,
/// so a `" ID "` header is reachable as `ID`. A header made only of digits is
/// reachable by position only.
pub fn resolve_key_column(
    df: &DataFrame,
    key_column: &EnumColumnIdentifier,
) -> Result<String, SplitError> {
    let l_names = df.get_column_names_str();
    match key_column {
        EnumColumnIdentifier::Index(n_idx) => {
            if *n_idx == 0 || *n_idx > l_names.len() {
                return Err(SplitError::KeyResolution(format!(
                    "Key column index {n_idx} is out of range; the sheet has {} column(s).",
                    l_names.len()
                )));
            }
            Ok(l_names[n_idx - 1].to_string())
        }
        EnumColumnIdentifier::Name(c_name) => l_names
            .iter()
            .find(|c| **c == c_name.as_str())
            .or_else(|| l_names.iter().find(|c| c.trim() == c_name.trim()))
            .map(|c| c.to_string())
            .ok_or_else(|| {
                SplitError::KeyResolution(format!(
                    "Key column {c_name:?} not found. Available columns: {l_names:?}"
                ))
            }),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Partitioning

fn cast_all_columns_to_text(df: &DataFrame) -> PolarsResult<DataFrame> {
    let l_columns = df
        .get_columns()
        .iter()
        .map(|col| col.cast(&DataType::String))
        .collect::<PolarsResult<Vec<_>>>()?;
    DataFrame::new(l_columns)
}

fn derive_group_key(df_part: &DataFrame, col_key: &str) -> PolarsResult<EnumCellValue> {
    if df_part.height() == 0 {
        return Ok(EnumCellValue::None);
    }
    let value = df_part.column(col_key)?.get(0)?;
    Ok(derive_cell_value_from_any_value(value))
}

fn plan_groups_with(
    df: &DataFrame,
    col_key: &str,
    cols_output: &[String],
    strategy: EnumGroupingStrategy,
    partitioner: &dyn Partitioner,
) -> PolarsResult<Vec<SpecGroup>> {
    let (l_parts, c_col_group) = match strategy {
        EnumGroupingStrategy::Direct => (partitioner.partition(df, col_key)?, col_key),
        EnumGroupingStrategy::AllColumnsText => {
            let df_text = cast_all_columns_to_text(df)?;
            (partitioner.partition(&df_text, col_key)?, col_key)
        }
        EnumGroupingStrategy::KeyColumnText => {
            let mut df_keyed = df.clone();
            let col_text = df
                .column(col_key)?
                .cast(&DataType::String)?
                .with_name(C_COL_KEY_TEXT_TEMP.into());
            df_keyed.with_column(col_text)?;
            (
                partitioner.partition(&df_keyed, C_COL_KEY_TEXT_TEMP)?,
                C_COL_KEY_TEXT_TEMP,
            )
        }
    };
    debug!(strategy = ?strategy, group_col = c_col_group, parts = l_parts.len(), "partitioned");

    let mut l_groups = Vec::with_capacity(l_parts.len());
    for df_part in l_parts {
        if df_part.height() == 0 {
            continue;
        }
        let key = derive_group_key(&df_part, col_key)?;
        let df_out = df_part.select(cols_output.iter().map(String::as_str))?;
        l_groups.push(SpecGroup { key, df: df_out });
    }
    Ok(l_groups)
}

/// Partition `df` on `col_key` in first-seen order, retrying with text casts.
///
/// Each group keeps only `cols_output`, in that order.
pub fn plan_groups(
    df: &DataFrame,
    col_key: &str,
    cols_output: &[String],
    partitioner: &dyn Partitioner,
) -> Result<(Vec<SpecGroup>, EnumGroupingStrategy), SplitError> {
    let mut l_errors = Vec::new();
    for strategy in EnumGroupingStrategy::ORDER {
        match plan_groups_with(df, col_key, cols_output, strategy, partitioner) {
            Ok(l_groups) => return Ok((l_groups, strategy)),
            Err(err) => {
                warn!(strategy = ?strategy, error = %err, "grouping attempt failed");
                l_errors.push(format!("{strategy:?}: {err}"));
            }
        }
    }
    Err(SplitError::GroupingType(l_errors.join("; ")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
