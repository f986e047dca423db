//! Renders a stored `TaskLists` in one of the export formats.

use crate::date::{format_due, format_rfc3339};
use crate::model::{Item, ItemStatus, TaskLists};
use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty JSON of the stored structure.
    Json,
    /// Compact JSON, everything kept.
    Raw,
    Csv,
    /// Indented plain text.
    Outline,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "json" => ExportFormat::Json,
            "raw" => ExportFormat::Raw,
            "csv" => ExportFormat::Csv,
            "outline" | "txt" | "text" => ExportFormat::Outline,
            other => bail!("unknown export format {other:?} (expected json, raw, csv or outline)"),
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RenderOptions {
    /// Keep items whose parent could not be found (depth -99).
    pub show_invalid: bool,
}

pub fn render(lists: &TaskLists, format: ExportFormat, opts: RenderOptions) -> Result<String> {
    match format {
        ExportFormat::Raw => serde_json::to_string(lists).context("render raw"),
        ExportFormat::Json => {
            let filtered = filter_invalid(lists, opts);
            serde_json::to_string_pretty(&filtered).context("render json")
        }
        ExportFormat::Csv => Ok(render_csv(lists, opts)),
        ExportFormat::Outline => Ok(render_outline(lists, opts)),
    }
}

fn keep(item: &Item, opts: RenderOptions) -> bool {
    opts.show_invalid || !item.is_invalid()
}

fn filter_invalid(lists: &TaskLists, opts: RenderOptions) -> TaskLists {
    let mut out = lists.clone();
    for list in &mut out.lists {
        list.items.retain(|i| keep(i, opts));
    }
    out
}

/// RFC 4180: quote when the field holds a comma, quote or line break.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Incomplete => "needsAction",
        ItemStatus::Complete => "completed",
    }
}

fn render_csv(lists: &TaskLists, opts: RenderOptions) -> String {
    let mut out = String::from("list,title,notes,status,due,completed,deleted,hidden,depth\r\n");
    for list in &lists.lists {
        for item in list.items.iter().filter(|i| keep(i, opts)) {
            let row = [
                csv_field(&list.title),
                csv_field(&item.title),
                csv_field(item.notes.as_deref().unwrap_or("")),
                status_label(item.status).to_string(),
                item.due.map(format_due).unwrap_or_default(),
                item.completed.map(format_rfc3339).unwrap_or_default(),
                item.deleted.to_string(),
                item.hidden.to_string(),
                item.depth.to_string(),
            ];
            out.push_str(&row.join(","));
            out.push_str("\r\n");
        }
    }
    out
}

fn render_outline(lists: &TaskLists, opts: RenderOptions) -> String {
    let mut out = String::new();
    for list in &lists.lists {
        let _ = writeln!(out, "# {}", list.title);
        for item in list.items.iter().filter(|i| keep(i, opts)) {
            let depth = item.depth.max(0) as usize;
            let mark = if item.status == ItemStatus::Complete { "[x]" } else { "[ ]" };
            let flag = if item.depth < 0 { "!" } else { "" };
            let _ = write!(out, "{}{flag}{mark} {}", "  ".repeat(depth), item.title);
            if let Some(due) = item.due {
                let _ = write!(out, " (due {})", format_due(due));
            }
            out.push('\n');
        }
        out.push('\n');
    }
    out
}
