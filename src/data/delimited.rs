use csv::ReaderBuilder;

use crate::table::Cell;

/// Reads every record as raw text. Empty fields become `Null`, blank lines are skipped
/// and short rows are padded to the widest row.
pub(super) fn read_rows(bytes: &[u8]) -> Result<Vec<Vec<Cell>>, String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for (i, record) in reader.byte_records().enumerate() {
        let record = record.map_err(|e| format!("record {}: {}", i + 1, e))?;
        if record.iter().all(|f| f.iter().all(u8::is_ascii_whitespace)) {
            continue;
        }
        let row = record
            .iter()
            .map(|field| {
                let s = String::from_utf8_lossy(field);
                if s.is_empty() {
                    Cell::Null
                } else {
                    Cell::Text(s.into_owned())
                }
            })
            .collect::<Vec<_>>();
        rows.push(row);
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in rows.iter_mut() {
        row.resize(width, Cell::Null);
    }
    Ok(rows)
}
