//! Downloadable exports of a filtered record set.

use rust_xlsxwriter::{Format, Workbook};
use std::fmt::Write as _;

use crate::error::{StoreError, StoreResult};
use crate::query::QueryParams;
use crate::table::Table;

pub const EXPORT_SHEET: &str = "Reporte";
pub const EXPORT_FILE_NAME: &str = "reporte_habitantes.xlsx";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn export_error(e: impl std::fmt::Display) -> StoreError {
    StoreError::PersistFailure(format!("export: {e}"))
}

/// xlsx workbook with the original header row followed by `rows`.
pub fn workbook_bytes(header: &[String], rows: &[&[String]], sheet: &str) -> StoreResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet).map_err(export_error)?;

    for (c, name) in header.iter().enumerate() {
        let c = u16::try_from(c).map_err(export_error)?;
        worksheet
            .write_string_with_format(0, c, name.as_str(), &bold)
            .map_err(export_error)?;
    }
    for (r, row) in rows.iter().enumerate() {
        let r = u32::try_from(r + 1).map_err(export_error)?;
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let c = u16::try_from(c).map_err(export_error)?;
            worksheet
                .write_string(r, c, value.as_str())
                .map_err(export_error)?;
        }
    }
    workbook.save_to_buffer().map_err(export_error)
}

/// Export the given data rows of `table`.
pub fn export_rows(table: &Table, row_indices: &[usize]) -> StoreResult<Vec<u8>> {
    let rows: Vec<&[String]> = row_indices.iter().filter_map(|&i| table.row(i)).collect();
    workbook_bytes(table.header(), &rows, EXPORT_SHEET)
}

/// Printable summary of a filtered record set, limited to a few columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintableReport {
    pub title: String,
    pub search: String,
    pub filter_column: String,
    pub filter_value: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl PrintableReport {
    /// Keep the wanted columns that exist in the header, in header order.
    pub fn build<S: AsRef<str>>(
        table: &Table,
        row_indices: &[usize],
        wanted: &[S],
        title: &str,
        params: &QueryParams,
    ) -> Self {
        let selected: Vec<(usize, String)> = table
            .header()
            .iter()
            .enumerate()
            .map(|(i, h)| (i, h.trim().to_string()))
            .filter(|(_, h)| wanted.iter().any(|w| w.as_ref() == h))
            .collect();

        let rows = row_indices
            .iter()
            .filter_map(|&i| table.row(i))
            .map(|row| {
                selected
                    .iter()
                    .map(|(col, _)| row.get(*col).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        Self {
            title: title.to_string(),
            search: params.search.clone(),
            filter_column: params.filter_column.clone(),
            filter_value: params.filter_value.clone(),
            columns: selected.into_iter().map(|(_, h)| h).collect(),
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Self-contained HTML page, ready to print.
    pub fn render_html(&self) -> String {
        let mut html = String::with_capacity(1024 + self.rows.len() * 128);
        let title = escape_html(&self.title);
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<title>{title}</title>\n<style>\n{REPORT_CSS}</style>\n</head>\n<body>\n<h1>{title}</h1>\n"
        );
        if !self.search.is_empty() {
            let _ = writeln!(
                html,
                "<p>Filtrado global por: \"{}\"</p>",
                escape_html(&self.search)
            );
        }
        if !self.filter_value.is_empty() {
            let _ = writeln!(
                html,
                "<p>Filtrado de columna \"{}\" por: \"{}\"</p>",
                escape_html(&self.filter_column),
                escape_html(&self.filter_value)
            );
        }
        let _ = writeln!(html, "<h3>Cantidad de filas filtradas: {}</h3>", self.row_count());

        html.push_str("<table>\n<thead>\n<tr>");
        for column in &self.columns {
            let _ = write!(html, "<th>{}</th>", escape_html(column));
        }
        html.push_str("</tr>\n</thead>\n<tbody>\n");
        for row in &self.rows {
            html.push_str("<tr>");
            for cell in row {
                let _ = write!(html, "<td>{}</td>", escape_html(cell));
            }
            html.push_str("</tr>\n");
        }
        html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
        html
    }
}

const REPORT_CSS: &str = "body { font-family: Arial, sans-serif; margin: 20px; }
h1, h3 { text-align: center; color: #333; }
p { text-align: center; color: #666; }
table { width: 100%; border-collapse: collapse; margin-top: 20px; }
th, td { border: 1px solid #ccc; padding: 8px; text-align: left; }
th { background-color: #f2f2f2; }
tr:nth-child(even) { background-color: #f9f9f9; }
@media print { body { margin: 0; } }
";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
