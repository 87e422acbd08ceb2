//! CSV adapter for requirement collections.
//!
//! Header: `key,id,title,description,unit,function,lines`. The `lines` cell
//! holds a JSON array (or is empty). Quoting follows RFC 4180: fields
//! containing commas, quotes or newlines are quoted, embedded quotes doubled.

use tracing::warn;

use crate::error::{Error, Result};
use crate::requirements::types::{Location, Requirement, RequirementsCollection};

const HEADER: [&str; 7] = ["key", "id", "title", "description", "unit", "function", "lines"];

/// Parse CSV text into a collection.
pub fn parse_csv(text: &str) -> Result<RequirementsCollection> {
    let mut rows = parse_rows(text)?;
    if rows.is_empty() {
        return Ok(RequirementsCollection::new());
    }
    let header = rows.remove(0);
    let index_of = |name: &str| -> Result<usize> {
        header
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| Error::Requirements(format!("missing CSV column: {name}")))
    };
    let key_col = index_of("key")?;
    let id_col = index_of("id")?;
    let title_col = index_of("title")?;
    let description_col = index_of("description")?;
    let unit_col = index_of("unit")?;
    let function_col = index_of("function")?;
    let lines_col = index_of("lines")?;

    let mut collection = RequirementsCollection::new();
    for row in rows {
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let cell = |col: usize| row.get(col).cloned().unwrap_or_default();
        let lines_cell = cell(lines_col);
        let lines = if lines_cell.is_empty() {
            None
        } else {
            match serde_json::from_str::<Vec<u32>>(&lines_cell) {
                Ok(lines) => Some(lines),
                Err(err) => {
                    warn!("failed to parse 'lines' cell {lines_cell:?}: {err}");
                    None
                }
            }
        };
        let mut location = Location::new(cell(unit_col), cell(function_col));
        location.lines = lines;
        collection.push(Requirement::new(
            cell(key_col),
            cell(id_col),
            cell(title_col),
            cell(description_col),
            location,
        ))?;
    }
    Ok(collection)
}

/// Serialize a collection to CSV text.
pub fn to_csv(collection: &RequirementsCollection) -> String {
    let mut out = String::new();
    out.push_str(&HEADER.join(","));
    out.push('\n');
    for requirement in collection.iter() {
        let lines_cell = match &requirement.location.lines {
            Some(lines) => serde_json::to_string(lines).unwrap_or_default(),
            None => String::new(),
        };
        let cells = [
            requirement.key.as_str(),
            requirement.id.as_str(),
            requirement.title.as_str(),
            requirement.description.as_str(),
            requirement.location.unit.as_str(),
            requirement.location.function.as_str(),
            lines_cell.as_str(),
        ];
        let row: Vec<String> = cells.iter().map(|cell| quote_cell(cell)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

fn quote_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') || cell.contains('\r') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Split CSV text into rows of cells, honoring quoted fields.
fn parse_rows(text: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut cell));
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            '\n' => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            _ => cell.push(c),
        }
    }
    if in_quotes {
        return Err(Error::Requirements("unterminated quoted CSV field".into()));
    }
    if !cell.is_empty() || !row.is_empty() {
        row.push(cell);
        rows.push(row);
    }
    Ok(rows)
}
