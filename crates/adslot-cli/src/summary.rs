//! Terminal output for command results.

use adslot_cache::{Resolution, ResolvedPath};
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::commands::{EntryStatus, IndexRow};

pub fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

/// Two-column description of a resolution.
#[must_use]
pub fn resolution_table(slot_id: &str, resolution: &Resolution) -> Table {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Field"), header_cell("Value")]);
    apply_table_style(&mut table);
    table.add_row(vec![Cell::new("Slot"), Cell::new(slot_id)]);

    match resolution {
        Resolution::Absent => {
            table.add_row(vec![Cell::new("Status"), dim_cell("absent")]);
        }
        Resolution::Ready(asset) => {
            let (source, location) = match &asset.resolved {
                ResolvedPath::Local(path) => ("cached", path.display().to_string()),
                ResolvedPath::Remote(url) => ("pass-through", url.clone()),
            };
            table.add_row(vec![Cell::new("Status"), Cell::new("ready").fg(Color::Green)]);
            table.add_row(vec![Cell::new("Kind"), Cell::new(asset.kind)]);
            table.add_row(vec![Cell::new("Version"), Cell::new(asset.version)]);
            table.add_row(vec![Cell::new("Source"), Cell::new(source)]);
            table.add_row(vec![Cell::new("Location"), Cell::new(location)]);
            if !asset.link.is_empty() {
                table.add_row(vec![Cell::new("Link"), Cell::new(&asset.link)]);
            }
        }
        Resolution::Failed { definition, error } => {
            table.add_row(vec![Cell::new("Status"), Cell::new("failed").fg(Color::Red)]);
            table.add_row(vec![Cell::new("Version"), Cell::new(definition.version)]);
            table.add_row(vec![Cell::new("Locator"), Cell::new(&definition.locator)]);
            table.add_row(vec![Cell::new("Error"), Cell::new(error.user_message())]);
        }
    }
    table
}

/// One row per index entry.
#[must_use]
pub fn index_table(rows: &[IndexRow]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("Key"),
        header_cell("Version"),
        header_cell("Size"),
        header_cell("Fetched"),
        header_cell("Status"),
        header_cell("Path"),
    ]);
    apply_table_style(&mut table);
    if let Some(column) = table.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    if let Some(column) = table.column_mut(2) {
        column.set_cell_alignment(CellAlignment::Right);
    }

    for row in rows {
        table.add_row(vec![
            Cell::new(&row.key),
            Cell::new(row.entry.version),
            Cell::new(row.entry.size_bytes),
            Cell::new(row.entry.fetched_at.format("%Y-%m-%d %H:%M:%S")),
            status_cell(row.status),
            dim_cell(row.entry.local_path.display()),
        ]);
    }
    if rows.is_empty() {
        table.add_row(vec![dim_cell("(empty)")]);
    }
    table
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn status_cell(status: EntryStatus) -> Cell {
    let color = match status {
        EntryStatus::Verified | EntryStatus::Present => Color::Green,
        EntryStatus::Mismatch => Color::Yellow,
        EntryStatus::Missing => Color::Red,
    };
    Cell::new(status.label()).fg(color)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value).fg(Color::DarkGrey)
}
