//! Route listing.

use crate::routing::RouteTable;

/// One row per route, `METHOD PATH NAME`, each column padded to its widest
/// cell plus one space.
pub fn render(table: &dyn RouteTable) -> String {
    let rows: Vec<[String; 3]> = table
        .routes()
        .into_iter()
        .map(|entry| [entry.method, entry.route, entry.name])
        .collect();

    let mut widths = [0usize; 3];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    rows.iter()
        .map(|row| {
            row.iter()
                .zip(widths)
                .map(|(cell, width)| format!("{cell:<w$}", w = width + 1))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
