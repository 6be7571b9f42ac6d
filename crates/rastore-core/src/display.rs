//! Human-readable rendering of values
//!
//! Columns and tables show at most [`COLUMN_DISPLAY_MAX`] rows; strings show
//! at most [`STRING_DISPLAY_MAX`] bytes. Tables render as a bordered grid:
//!
//! ```text
//! +----+------+
//! | id | name |
//! +----+------+
//! | 1  | "a"  |
//! +----+------+
//! [1 rows x 2 columns]
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use crate::column::{column_iterate, column_length, value_column_at};
use crate::error::StoreResult;
use crate::registry::Registry;
use crate::types::{Dtype, TypeKind, TypeTag};
use crate::value::{RefKind, Value, ValueKind};

pub const STRING_DISPLAY_MAX: usize = 16;
pub const COLUMN_DISPLAY_MAX: i64 = 16;

/// Render `v` as text
pub fn display_value(registry: &Registry, v: &Arc<Value>) -> StoreResult<String> {
    let mut out = String::new();
    render(registry, v, &mut out)?;
    Ok(out)
}

fn render(registry: &Registry, v: &Arc<Value>, out: &mut String) -> StoreResult<()> {
    if v.ty().is_optional() {
        if let ValueKind::Either { which, payload } = v.kind() {
            if *which == 0 {
                out.push_str("None");
                return Ok(());
            }
            return render(registry, payload, out);
        }
    }

    match v.kind() {
        ValueKind::Record(_) if v.ty().is_data_table() => render_table(registry, v, out)?,
        ValueKind::Record(_) => out.push_str("<record>"),
        ValueKind::NdVector(nd) => match (v.ty().tag(), v.ty().kind()) {
            (Some(TypeTag::String), _) => {
                let data = nd.data();
                out.push('"');
                for b in data.iter().take(STRING_DISPLAY_MAX) {
                    if (0x20..0x7f).contains(b) {
                        out.push(*b as char);
                    } else {
                        let _ = write!(out, "\\x{:02x}", b);
                    }
                }
                if data.len() > STRING_DISPLAY_MAX {
                    out.push_str("...");
                }
                out.push('"');
            }
            (Some(TypeTag::Image), _) => out.push_str("<image>"),
            (_, TypeKind::NdVector { ndim: 0, dtype: Dtype::I64 }) => {
                let _ = write!(out, "{}", v.scalar_i64()?);
            }
            (_, TypeKind::NdVector { ndim: 0, dtype: Dtype::F64 }) => {
                let _ = write!(out, "{:.6}", v.scalar_f64()?);
            }
            (_, TypeKind::NdVector { ndim: 0, dtype: Dtype::Bool }) => {
                out.push(if v.scalar_bool()? { '1' } else { '0' });
            }
            _ => out.push_str("<nd_vector>"),
        },
        ValueKind::Column(_) => render_rows(registry, v, out)?,
        ValueKind::Ref(r) => match &r.kind {
            RefKind::ColumnSubset(_) => render_rows(registry, v, out)?,
            _ => {
                let _ = write!(out, "<ref: {}>", v.ty());
            }
        },
        ValueKind::Thunk(_) => out.push_str("<thunk>"),
        ValueKind::Either { .. } | ValueKind::Index(_) => {
            let _ = write!(out, "<{}>", v.which());
        }
    }
    Ok(())
}

fn render_rows(registry: &Registry, v: &Arc<Value>, out: &mut String) -> StoreResult<()> {
    let n = column_length(registry, v)?;
    let shown = n.min(COLUMN_DISPLAY_MAX);
    let _ = write!(out, "Column<{}>: [", n);
    for i in 0..shown {
        render(registry, &value_column_at(registry, v, i)?, out)?;
        if i < shown - 1 {
            out.push_str(", ");
        }
    }
    if n > shown {
        out.push_str(", ...");
    }
    out.push(']');
    Ok(())
}

fn center(s: &str, width: usize) -> String {
    let pad = width.saturating_sub(s.chars().count());
    let left = pad / 2;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(pad - left))
}

/// Cell lines of the first rows of one column
fn column_cells(registry: &Registry, column: &Arc<Value>) -> StoreResult<Vec<Vec<String>>> {
    let mut rendered = Vec::new();
    let mut failure = None;
    column_iterate(registry, std::slice::from_ref(column), |i, row| {
        if i >= COLUMN_DISPLAY_MAX {
            return false;
        }
        match display_value(registry, &row[0]) {
            Ok(s) => {
                rendered.push(s.trim_matches('\n').split('\n').map(str::to_string).collect());
                true
            }
            Err(e) => {
                failure = Some(e);
                false
            }
        }
    })?;
    match failure {
        Some(e) => Err(e),
        None => Ok(rendered),
    }
}

fn render_table(registry: &Registry, v: &Arc<Value>, out: &mut String) -> StoreResult<()> {
    let fields = v.ty().record_items()?;
    let columns = v.record_entries()?;

    let mut cells = Vec::with_capacity(columns.len());
    let mut widths = Vec::with_capacity(columns.len());
    let mut num_rows = 0;
    for ((name, _), column) in fields.iter().zip(columns) {
        num_rows = column_length(registry, column)?;
        let c = column_cells(registry, column)?;
        let w = c
            .iter()
            .flatten()
            .map(|line| line.chars().count())
            .fold(name.chars().count(), usize::max);
        widths.push(w);
        cells.push(c);
    }
    let shown = cells.first().map_or(0, Vec::len);
    let heights: Vec<usize> = (0..shown)
        .map(|j| cells.iter().map(|c| c.get(j).map_or(0, Vec::len)).max().unwrap_or(0))
        .collect();
    let tallest = heights.iter().copied().max().unwrap_or(0);

    let bar = |out: &mut String| {
        for w in &widths {
            out.push('+');
            out.push_str(&"-".repeat(w + 2));
        }
        out.push_str("+\n");
    };

    out.push('\n');
    bar(out);
    for ((name, _), w) in fields.iter().zip(&widths) {
        let _ = write!(out, "| {} ", center(name, *w));
    }
    out.push_str("|\n");
    bar(out);

    for (j, height) in heights.iter().enumerate() {
        for k in 0..*height {
            for (i, w) in widths.iter().enumerate() {
                let line = cells
                    .get(i)
                    .and_then(|c| c.get(j))
                    .and_then(|lines| lines.get(k))
                    .map_or("", String::as_str);
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "| {}", center(line, *w));
            }
            out.push_str(" |\n");
        }
        if tallest > 1 {
            bar(out);
        }
    }
    if tallest <= 1 {
        bar(out);
    }

    let width = 1 + widths.iter().map(|w| w + 3).sum::<usize>();
    let footer = format!("[{} rows x {} columns]", num_rows, columns.len());
    let _ = write!(out, "{:<width$}", footer, width = width);
    Ok(())
}
