//! Sheet selection and column normalization for bulletin workbooks
//!
//! Bulletin headers drift between releases ("Precio máximo", "PRECIO MAX",
//! "precio\nmaximo", ...). Headers are folded to a plain ASCII snake form and
//! matched against a fixed synonym list per canonical field; the first synonym
//! present wins and fields with no match are left empty.

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::collections::HashMap;
use std::io::Cursor;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::types::{CanonicalField, PriceRecord};

#[derive(Debug, thiserror::Error)]
pub enum BulletinError {
    #[error("not a valid spreadsheet: {0}")]
    NotAWorkbook(#[source] calamine::Error),
    #[error("no sheet name contains '{keyword}' (sheets: {found:?})")]
    NoMatchingSheets { keyword: String, found: Vec<String> },
    #[error("sheet '{sheet}' has no header row after skipping {skip_rows} rows")]
    NoHeaderRow { sheet: String, skip_rows: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) if s.trim().is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.trim().to_string()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(value) => Cell::Text(value.to_string()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Number(f) => Some(format_number(*f)),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => parse_number(s),
            Cell::Number(f) => Some(*f),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Parse numbers written as text, including Chilean "1.234,5" notation
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let value = match cleaned.parse::<f64>() {
        Ok(v) => v,
        Err(_) if cleaned.contains(',') => cleaned.replace('.', "").replace(',', ".").parse().ok()?,
        Err(_) => return None,
    };
    value.is_finite().then_some(value)
}

/// A sheet as read from the workbook. Row indexes are absolute: row 0 is the
/// first row of the sheet even when it is blank.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

/// Read the sheets whose name satisfies `wanted`. A sheet that cannot be read
/// is skipped with a warning.
pub fn read_workbook(
    bytes: &[u8],
    wanted: impl Fn(&str) -> bool,
) -> Result<Vec<RawSheet>, BulletinError> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(BulletinError::NotAWorkbook)?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        if !wanted(&name) {
            continue;
        }

        let range = match workbook.worksheet_range(&name) {
            Ok(r) => r,
            Err(e) => {
                warn!(sheet = %name, error = %e, "could not read sheet");
                continue;
            }
        };

        // calamine ranges begin at the first used cell
        let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);
        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); first_row];
        rows.extend(range.rows().map(|row| row.iter().map(Cell::from_data).collect()));

        sheets.push(RawSheet { name, rows });
    }

    Ok(sheets)
}

pub fn sheet_matches(name: &str, keyword: &str) -> bool {
    name.to_lowercase().contains(&keyword.to_lowercase())
}

/// Sheet names of a workbook, without reading any cells
pub fn sheet_names(bytes: &[u8]) -> Result<Vec<String>, BulletinError> {
    let workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(BulletinError::NotAWorkbook)?;
    Ok(workbook.sheet_names())
}

/// Trim, lowercase, turn spaces and newlines into `_`, strip accents
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(' ', "_")
        .replace('\n', "_")
        .nfkd()
        .filter(char::is_ascii)
        .collect()
}

/// Which column feeds each canonical field
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    columns: HashMap<CanonicalField, (usize, &'static str)>,
}

impl ColumnMap {
    /// Resolve normalized headers. For each field, synonyms are tried in
    /// priority order; a repeated header resolves to its left-most column.
    pub fn resolve(headers: &[String]) -> Self {
        let mut columns = HashMap::new();
        for field in CanonicalField::ALL {
            let found = field.synonyms().iter().find_map(|synonym| {
                headers
                    .iter()
                    .position(|h| h.as_str() == *synonym)
                    .map(|idx| (idx, *synonym))
            });
            if let Some(found) = found {
                columns.insert(field, found);
            }
        }
        Self { columns }
    }

    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).map(|(idx, _)| *idx)
    }

    /// The header that was matched for `field`
    pub fn matched_header(&self, field: CanonicalField) -> Option<&'static str> {
        self.columns.get(&field).map(|(_, header)| *header)
    }

    pub fn missing(&self) -> Vec<CanonicalField> {
        CanonicalField::ALL
            .into_iter()
            .filter(|f| !self.columns.contains_key(f))
            .collect()
    }

    fn cell<'a>(&self, row: &'a [Cell], field: CanonicalField) -> Option<&'a Cell> {
        self.column(field).and_then(|idx| row.get(idx))
    }

    fn text(&self, row: &[Cell], field: CanonicalField) -> Option<String> {
        self.cell(row, field).and_then(Cell::as_text)
    }

    fn number(&self, row: &[Cell], field: CanonicalField) -> Option<f64> {
        self.cell(row, field).and_then(Cell::as_number)
    }
}

/// Map one bulletin sheet onto canonical records.
///
/// Row `skip_rows` is the header row; everything below it is data. Blank rows
/// and rows without a product are dropped.
pub fn normalize_sheet(
    sheet: &RawSheet,
    skip_rows: usize,
    bulletin_date: &str,
) -> Result<Vec<PriceRecord>, BulletinError> {
    let header_row = sheet
        .rows
        .get(skip_rows)
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .ok_or_else(|| BulletinError::NoHeaderRow {
            sheet: sheet.name.clone(),
            skip_rows,
        })?;

    let headers: Vec<String> = header_row
        .iter()
        .map(|c| c.as_text().map(|h| normalize_header(&h)).unwrap_or_default())
        .collect();
    let map = ColumnMap::resolve(&headers);

    if map.column(CanonicalField::Product).is_none() {
        warn!(sheet = %sheet.name, ?headers, "no product column found");
    }
    let missing = map.missing();
    if !missing.is_empty() {
        debug!(sheet = %sheet.name, ?missing, "columns left empty");
    }
    for field in CanonicalField::ALL {
        if let Some(header) = map.matched_header(field) {
            debug!(sheet = %sheet.name, column = field.column(), header, "column matched");
        }
    }

    let records = sheet.rows[skip_rows + 1..]
        .iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .filter_map(|row| {
            let product = map.text(row, CanonicalField::Product)?;
            Some(PriceRecord {
                product,
                variety: map.text(row, CanonicalField::Variety),
                grade: map.text(row, CanonicalField::Grade),
                volume: map.number(row, CanonicalField::Volume),
                price_max: map.number(row, CanonicalField::PriceMax),
                price_min: map.number(row, CanonicalField::PriceMin),
                price_avg: map.number(row, CanonicalField::PriceAvg),
                unit: map.text(row, CanonicalField::Unit),
                origin: map.text(row, CanonicalField::Origin),
                market: sheet.name.clone(),
                bulletin_date: bulletin_date.to_string(),
            })
        })
        .collect();

    Ok(records)
}

/// Read a bulletin, keep the sheets named after `keyword` and normalize each.
/// A sheet that fails is skipped; the others still count.
pub fn normalize_bulletin(
    bytes: &[u8],
    keyword: &str,
    skip_rows: usize,
    bulletin_date: &str,
) -> Result<Vec<PriceRecord>, BulletinError> {
    let names = sheet_names(bytes)?;
    if !names.iter().any(|n| sheet_matches(n, keyword)) {
        return Err(BulletinError::NoMatchingSheets {
            keyword: keyword.to_string(),
            found: names,
        });
    }

    let sheets = read_workbook(bytes, |name| sheet_matches(name, keyword))?;

    let mut records = Vec::new();
    for sheet in &sheets {
        match normalize_sheet(sheet, skip_rows, bulletin_date) {
            Ok(rows) => {
                info!(sheet = %sheet.name, rows = rows.len(), "sheet processed");
                records.extend(rows);
            }
            Err(e) => warn!(sheet = %sheet.name, error = %e, "skipping sheet"),
        }
    }

    Ok(records)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn headers(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|h| normalize_header(h)).collect()
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("  Precio Máximo "), "precio_maximo");
        assert_eq!(normalize_header("Unidad de\ncomercialización"), "unidad_de_comercializacion");
        assert_eq!(normalize_header("ORIGEN"), "origen");
        assert_eq!(normalize_header("Año"), "ano");
    }

    #[test]
    fn test_first_listed_synonym_wins() {
        // "especie" sits left of "producto" but "producto" is listed first
        let map = ColumnMap::resolve(&headers(&["Especie", "Producto", "Cantidad", "Volumen"]));
        assert_eq!(map.column(CanonicalField::Product), Some(1));
        assert_eq!(map.matched_header(CanonicalField::Product), Some("producto"));
        assert_eq!(map.column(CanonicalField::Volume), Some(3));
    }

    #[test]
    fn test_later_synonyms_used_when_earlier_absent() {
        let map = ColumnMap::resolve(&headers(&[
            "Especie",
            "Precio Max",
            "PrecioMinimo",
            "Precio Prom",
            "Cantidad",
            "Unidad de comercialización",
        ]));
        assert_eq!(map.column(CanonicalField::Product), Some(0));
        assert_eq!(map.column(CanonicalField::PriceMax), Some(1));
        assert_eq!(map.column(CanonicalField::PriceMin), Some(2));
        assert_eq!(map.column(CanonicalField::PriceAvg), Some(3));
        assert_eq!(map.column(CanonicalField::Volume), Some(4));
        assert_eq!(map.column(CanonicalField::Unit), Some(5));
        assert_eq!(
            map.missing(),
            vec![CanonicalField::Variety, CanonicalField::Grade, CanonicalField::Origin]
        );
    }

    #[test]
    fn test_every_synonym_resolves() {
        for field in CanonicalField::ALL {
            for synonym in field.synonyms() {
                let map = ColumnMap::resolve(&[String::from("otra"), synonym.to_string()]);
                assert_eq!(map.column(field), Some(1), "{} -> {:?}", synonym, field);
            }
        }
    }

    #[test]
    fn test_repeated_header_uses_leftmost() {
        let map = ColumnMap::resolve(&headers(&["Origen", "Producto", "Origen"]));
        assert_eq!(map.column(CanonicalField::Origin), Some(0));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("750"), Some(750.0));
        assert_eq!(parse_number(" 1.234,5 "), Some(1234.5));
        assert_eq!(parse_number("$ 900"), Some(900.0));
        assert_eq!(parse_number("12.5"), Some(12.5));
        assert_eq!(parse_number("s/i"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_normalize_sheet() {
        let mut rows = vec![vec![text("Boletín")], vec![]];
        rows.push(HEADERS.iter().map(|h| text(h)).collect());
        rows.push(vec![
            text("Tomate"),
            text("Larga Vida"),
            text("1ra"),
            Cell::Number(500.0),
            Cell::Number(900.0),
            Cell::Number(600.0),
            Cell::Number(750.0),
            text("kg"),
            text("Melipilla"),
        ]);
        rows.push(vec![Cell::Empty; 9]);
        rows.push(vec![Cell::Empty, text("sin producto")]);
        let sheet = RawSheet {
            name: "Hortalizas_Lo_Valledor".to_string(),
            rows,
        };

        let records = normalize_sheet(&sheet, 2, "2024-01-10").unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.product, "Tomate");
        assert_eq!(r.variety.as_deref(), Some("Larga Vida"));
        assert_eq!(r.grade.as_deref(), Some("1ra"));
        assert_eq!(r.volume, Some(500.0));
        assert_eq!(r.price_max, Some(900.0));
        assert_eq!(r.price_min, Some(600.0));
        assert_eq!(r.price_avg, Some(750.0));
        assert_eq!(r.unit.as_deref(), Some("kg"));
        assert_eq!(r.origin.as_deref(), Some("Melipilla"));
        assert_eq!(r.market, "Hortalizas_Lo_Valledor");
        assert_eq!(r.bulletin_date, "2024-01-10");
    }

    #[test]
    fn test_unmatched_fields_are_absent() {
        let sheet = RawSheet {
            name: "Hortalizas".to_string(),
            rows: vec![
                vec![text("Especie"), text("Precio")],
                vec![text("Lechuga"), Cell::Number(300.0)],
            ],
        };
        let records = normalize_sheet(&sheet, 0, "2024-01-10").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product, "Lechuga");
        assert_eq!(records[0].price_avg, None);
        assert_eq!(records[0].origin, None);
    }

    #[test]
    fn test_missing_header_row() {
        let sheet = RawSheet {
            name: "Hortalizas".to_string(),
            rows: vec![vec![text("Boletín")]],
        };
        assert!(matches!(
            normalize_sheet(&sheet, 8, "2024-01-10"),
            Err(BulletinError::NoHeaderRow { .. })
        ));
    }

    #[test]
    fn test_normalize_bulletin_from_xlsx() {
        let bytes = workbook_bytes(
            &[
                ("Hortalizas_Mayorista", &HEADERS[..], vec![tomato_row()]),
                ("Frutas_Mayorista", &HEADERS[..], vec![tomato_row()]),
            ],
            8,
        );

        let records = normalize_bulletin(&bytes, "hortalizas", 8, "2024-01-10").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].market, "Hortalizas_Mayorista");
        assert!(records[0].product.eq_ignore_ascii_case("tomate"));
        assert_eq!(records[0].price_avg, Some(750.0));
        assert_eq!(records[0].unit.as_deref(), Some("kg"));
    }

    #[test]
    fn test_header_offset_counts_leading_blank_rows() {
        // nothing above the header and nothing in column A
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Hortalizas_X").unwrap();
        for (col, header) in HEADERS.iter().enumerate() {
            worksheet.write_string(8, 1 + col as u16, *header).unwrap();
        }
        for (col, value) in tomato_row().iter().enumerate() {
            match value.parse::<f64>() {
                Ok(n) => worksheet.write_number(9, 1 + col as u16, n).unwrap(),
                Err(_) => worksheet.write_string(9, 1 + col as u16, *value).unwrap(),
            };
        }
        let bytes = workbook.save_to_buffer().unwrap();

        let sheets = read_workbook(&bytes, |_| true).unwrap();
        assert_eq!(sheets[0].rows.len(), 10);
        assert!(sheets[0].rows[..8].iter().all(|row| row.is_empty()));

        let records = normalize_bulletin(&bytes, "hortalizas", 8, "2024-01-10").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product, "Tomate");
        assert_eq!(records[0].price_avg, Some(750.0));
        assert_eq!(records[0].market, "Hortalizas_X");
    }

    #[test]
    fn test_failing_sheet_is_skipped() {
        let bytes = workbook_bytes(
            &[
                ("Hortalizas_A", &HEADERS[..], vec![tomato_row()]),
                ("Hortalizas_B", &[][..], vec![]),
            ],
            8,
        );

        let records = normalize_bulletin(&bytes, "hortalizas", 8, "2024-01-10").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].market, "Hortalizas_A");
    }

    #[test]
    fn test_no_matching_sheet() {
        let bytes = workbook_bytes(&[("Frutas", &HEADERS[..], vec![tomato_row()])], 8);
        assert!(matches!(
            normalize_bulletin(&bytes, "hortalizas", 8, "2024-01-10"),
            Err(BulletinError::NoMatchingSheets { .. })
        ));
    }

    #[test]
    fn test_not_a_workbook() {
        assert!(matches!(
            normalize_bulletin(b"<html>nope</html>", "hortalizas", 8, "2024-01-10"),
            Err(BulletinError::NotAWorkbook(_))
        ));
    }
}
