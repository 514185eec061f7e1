//! Simulation output parsing
//!
//! Subprocess simulations report either CSV (header row required, cells
//! typed by content) or JSON (an array of row objects, or an object with a
//! `time_series` array and an optional `kpis` map).

use std::collections::BTreeMap;

use sim_optimizer_types::{CellValue, Table};

/// Parse CSV text into a table; the first line is the header
pub fn parse_csv(text: &str) -> Result<Table, String> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| "empty output".to_string())?;
    let columns = split_csv_line(header);
    if columns.iter().any(|c| c.is_empty()) {
        return Err("header contains an empty column name".to_string());
    }

    let mut table = Table::new(columns);
    for (i, line) in lines.enumerate() {
        let cells: Vec<CellValue> = split_csv_line(line)
            .into_iter()
            .map(|field| type_cell(&field))
            .collect();
        table
            .push_row(cells)
            .map_err(|e| format!("row {}: {}", i + 2, e))?;
    }
    Ok(table)
}

/// Split one CSV line, honoring double-quoted fields with `""` escapes
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields.iter().map(|f| f.trim().to_string()).collect()
}

/// Type a CSV field by content
fn type_cell(field: &str) -> CellValue {
    if field.is_empty() {
        return CellValue::Null;
    }
    match field {
        "true" => return CellValue::Bool(true),
        "false" => return CellValue::Bool(false),
        _ => {}
    }
    if let Ok(num) = field.parse::<f64>() {
        return CellValue::Num(num);
    }
    CellValue::Text(field.to_string())
}

/// Parse JSON text into a table plus any KPIs the simulation reported
pub fn parse_json(text: &str) -> Result<(Table, BTreeMap<String, f64>), String> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;

    match value {
        serde_json::Value::Array(rows) => Ok((rows_to_table(&rows)?, BTreeMap::new())),
        serde_json::Value::Object(map) => {
            let rows = map
                .get("time_series")
                .and_then(|v| v.as_array())
                .ok_or_else(|| "object output requires a 'time_series' array".to_string())?;
            let table = rows_to_table(rows)?;

            let mut kpis = BTreeMap::new();
            if let Some(serde_json::Value::Object(kpi_map)) = map.get("kpis") {
                for (name, v) in kpi_map {
                    let value = v.as_f64().unwrap_or(f64::NAN);
                    kpis.insert(name.clone(), value);
                }
            }
            Ok((table, kpis))
        }
        _ => Err("output must be a JSON array or object".to_string()),
    }
}

/// Build a table from an array of row objects
///
/// The column set is the sorted union of keys across all rows; cells missing
/// from a row are null.
fn rows_to_table(rows: &[serde_json::Value]) -> Result<Table, String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        let object = row
            .as_object()
            .ok_or_else(|| "time series rows must be objects".to_string())?;
        for key in object.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns.sort();

    let mut table = Table::new(columns.clone());
    for row in rows {
        let object = row.as_object().expect("checked above");
        let cells: Vec<CellValue> = columns
            .iter()
            .map(|col| match object.get(col) {
                None | Some(serde_json::Value::Null) => CellValue::Null,
                Some(serde_json::Value::Bool(b)) => CellValue::Bool(*b),
                Some(serde_json::Value::Number(n)) => {
                    CellValue::Num(n.as_f64().unwrap_or(f64::NAN))
                }
                Some(serde_json::Value::String(s)) => CellValue::Text(s.clone()),
                Some(other) => CellValue::Text(other.to_string()),
            })
            .collect();
        table.push_row(cells).map_err(|e| e.to_string())?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_typed_by_content() {
        let table = parse_csv("t,infected,flag,label\n0,10,true,low\n1,50.5,false,high\n").unwrap();
        assert_eq!(table.column_names(), &["t", "infected", "flag", "label"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.numeric_column("infected").unwrap(), vec![10.0, 50.5]);
        assert_eq!(table.rows()[0][2], CellValue::Bool(true));
        assert_eq!(table.rows()[1][3], CellValue::Text("high".into()));
    }

    #[test]
    fn test_csv_quoted_fields() {
        let table = parse_csv("name,value\n\"a,b\",1\n\"say \"\"hi\"\"\",2\n").unwrap();
        assert_eq!(table.rows()[0][0], CellValue::Text("a,b".into()));
        assert_eq!(table.rows()[1][0], CellValue::Text("say \"hi\"".into()));
    }

    #[test]
    fn test_csv_empty_cell_is_null() {
        let table = parse_csv("a,b\n1,\n,2\n").unwrap();
        assert_eq!(table.rows()[0][1], CellValue::Null);
        assert_eq!(table.rows()[1][0], CellValue::Null);
    }

    #[test]
    fn test_csv_requires_header() {
        assert!(parse_csv("").is_err());
        assert!(parse_csv("   \n").is_err());
    }

    #[test]
    fn test_csv_ragged_row_rejected() {
        assert!(parse_csv("a,b\n1,2,3\n").is_err());
    }

    #[test]
    fn test_json_array_of_rows() {
        let (table, kpis) =
            parse_json(r#"[{"t": 0, "y": 1.5}, {"t": 1, "y": 2.5}]"#).unwrap();
        assert!(kpis.is_empty());
        assert_eq!(table.column_names(), &["t", "y"]);
        assert_eq!(table.numeric_column("y").unwrap(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_json_object_with_kpis() {
        let (table, kpis) = parse_json(
            r#"{"time_series": [{"t": 0, "y": 1.0}], "kpis": {"peak": 9.5, "total": 12}}"#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(kpis.get("peak"), Some(&9.5));
        assert_eq!(kpis.get("total"), Some(&12.0));
    }

    #[test]
    fn test_json_missing_cells_are_null() {
        let (table, _) = parse_json(r#"[{"a": 1, "b": 2}, {"a": 3}]"#).unwrap();
        assert_eq!(table.rows()[1][1], CellValue::Null);
    }

    #[test]
    fn test_json_malformed() {
        assert!(parse_json("not json").is_err());
        assert!(parse_json("42").is_err());
        assert!(parse_json(r#"{"rows": []}"#).is_err());
    }
}
