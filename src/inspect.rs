//! Ad-hoc look at a single spreadsheet that has not gone through ingestion

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::normalize::{normalize_header, read_workbook, sheet_names, Cell, RawSheet};
use crate::report::{format_price, format_table};

pub const DEFAULT_PRODUCT: &str = "tomate";

const PREVIEW_ROWS: usize = 5;

/// Load one sheet from a local `.xlsx`/`.xls`/`.ods` workbook or a `.csv` file.
/// Without `sheet`, the first sheet of the workbook is used.
pub fn load_sheet(path: &Path, sheet: Option<&str>) -> Result<RawSheet> {
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        return load_csv(path);
    }

    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let names = sheet_names(&bytes)?;
    let wanted = match sheet {
        Some(name) => match names.iter().find(|n| n.eq_ignore_ascii_case(name)) {
            Some(n) => n.clone(),
            None => bail!("No sheet named '{}' (sheets: {})", name, names.join(", ")),
        },
        None => match names.first() {
            Some(n) => n.clone(),
            None => bail!("{} has no sheets", path.display()),
        },
    };

    let mut sheets = read_workbook(&bytes, |name| name == wanted)?;
    match sheets.pop() {
        Some(s) => Ok(s),
        None => bail!("Sheet '{}' could not be read", wanted),
    }
}

fn load_csv(path: &Path) -> Result<RawSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    let field = field.trim();
                    if field.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(RawSheet { name, rows })
}

#[derive(Debug, Default)]
pub struct Inspection {
    pub headers: Vec<String>,
    pub total_rows: usize,
    pub preview: Vec<Vec<String>>,
    pub product_column: Option<String>,
    pub price_column: Option<String>,
    pub matches: Vec<Vec<String>>,
    pub mean_price: Option<f64>,
    pub warnings: Vec<String>,
}

fn first_header_containing(headers: &[String], needles: &[&str]) -> Option<usize> {
    headers.iter().position(|h| {
        let folded = normalize_header(h);
        needles.iter().any(|n| folded.contains(n))
    })
}

fn row_text(row: &[Cell], width: usize) -> Vec<String> {
    (0..width)
        .map(|i| row.get(i).and_then(Cell::as_text).unwrap_or_default())
        .collect()
}

/// Use the first row after `skip_rows` as the header, pick the product and
/// price columns by name, and keep the rows whose product contains `product`
pub fn inspect_sheet(sheet: &RawSheet, skip_rows: usize, product: &str) -> Inspection {
    let mut inspection = Inspection::default();

    let Some(header_row) = sheet.rows.get(skip_rows) else {
        inspection
            .warnings
            .push(format!("Sheet '{}' has no rows after skipping {}", sheet.name, skip_rows));
        return inspection;
    };

    let headers: Vec<String> = header_row
        .iter()
        .map(|c| c.as_text().unwrap_or_default())
        .collect();
    let width = headers.len();
    let body: Vec<&Vec<Cell>> = sheet.rows[skip_rows + 1..]
        .iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();

    inspection.total_rows = body.len();
    inspection.preview = body
        .iter()
        .take(PREVIEW_ROWS)
        .map(|row| row_text(row, width))
        .collect();

    let product_col = first_header_containing(&headers, &["especie", "producto"]);
    let price_col = first_header_containing(&headers, &["precio"]);
    inspection.product_column = product_col.map(|i| headers[i].clone());
    inspection.price_column = price_col.map(|i| headers[i].clone());

    let Some(product_col) = product_col else {
        inspection
            .warnings
            .push("No column named like 'producto' or 'especie'".to_string());
        inspection.headers = headers;
        return inspection;
    };

    let wanted = product.trim().to_lowercase();
    let selected: Vec<&Vec<Cell>> = body
        .iter()
        .copied()
        .filter(|row| {
            row.get(product_col)
                .and_then(Cell::as_text)
                .is_some_and(|p| p.to_lowercase().contains(&wanted))
        })
        .collect();
    inspection.matches = selected.iter().map(|row| row_text(row, width)).collect();

    if selected.is_empty() {
        inspection
            .warnings
            .push(format!("No rows where the product contains '{}'", product));
    }

    match price_col {
        Some(col) => {
            let prices: Vec<f64> = selected
                .iter()
                .filter_map(|row| row.get(col).and_then(Cell::as_number))
                .collect();
            if !prices.is_empty() {
                inspection.mean_price = Some(prices.iter().sum::<f64>() / prices.len() as f64);
            }
        }
        None => inspection
            .warnings
            .push("No column named like 'precio'".to_string()),
    }

    inspection.headers = headers;
    inspection
}

pub fn render_inspection(inspection: &Inspection, product: &str) -> String {
    let mut out = String::new();
    let headers: Vec<&str> = inspection.headers.iter().map(String::as_str).collect();

    out.push_str(&format!("{} data rows\n", inspection.total_rows));
    if !headers.is_empty() {
        out.push_str("\nFirst rows\n");
        out.push_str(&format_table(&headers, &inspection.preview));
    }

    if let Some(ref col) = inspection.product_column {
        out.push_str(&format!(
            "\nRows where '{}' contains \"{}\": {}\n",
            col,
            product,
            inspection.matches.len()
        ));
        if !inspection.matches.is_empty() {
            out.push_str(&format_table(&headers, &inspection.matches));
        }
    }

    if let (Some(col), Some(mean)) = (&inspection.price_column, inspection.mean_price) {
        out.push_str(&format!("\nAverage '{}': {}\n", col, format_price(mean)));
    }

    for warning in &inspection.warnings {
        out.push_str(&format!("\nWarning: {}\n", warning));
    }
    out
}

pub fn run_inspect(path: &str, sheet: Option<&str>, skip_rows: usize, product: &str) -> Result<()> {
    let path = Path::new(path);
    if !path.exists() {
        bail!("File {} not found", path.display());
    }

    let sheet = load_sheet(path, sheet)?;
    println!("Loaded sheet '{}' from {}", sheet.name, path.display());
    let inspection = inspect_sheet(&sheet, skip_rows, product);
    print!("{}", render_inspection(&inspection, product));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::test_support::{tomato_row, workbook_bytes, HEADERS};

    fn text_sheet(rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            name: "Hoja1".to_string(),
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|c| {
                            if c.is_empty() {
                                Cell::Empty
                            } else {
                                Cell::Text(c.to_string())
                            }
                        })
                        .collect()
                })
                .collect(),
        }
    }

    #[test]
    fn test_picks_first_matching_columns() {
        let sheet = text_sheet(&[
            &["Especie", "Variedad", "Precio mínimo", "Precio máximo"],
            &["Tomate", "Larga vida", "600", "900"],
            &["Tomate Cherry", "", "1100", "1500"],
            &["Lechuga", "Escarola", "200", "300"],
            &["", "", "", ""],
        ]);

        let inspection = inspect_sheet(&sheet, 0, "TOMATE");
        assert_eq!(inspection.total_rows, 3);
        assert_eq!(inspection.product_column.as_deref(), Some("Especie"));
        assert_eq!(inspection.price_column.as_deref(), Some("Precio mínimo"));
        assert_eq!(inspection.matches.len(), 2);
        assert_eq!(inspection.mean_price, Some(850.0));
        assert!(inspection.warnings.is_empty());

        let text = render_inspection(&inspection, "TOMATE");
        assert!(text.contains("Rows where 'Especie' contains \"TOMATE\": 2"));
        assert!(text.contains("Average 'Precio mínimo': $850"));
    }

    #[test]
    fn test_missing_columns_warn() {
        let sheet = text_sheet(&[&["Nombre", "Valor"], &["Tomate", "750"]]);
        let inspection = inspect_sheet(&sheet, 0, "tomate");
        assert_eq!(inspection.product_column, None);
        assert!(inspection.matches.is_empty());
        assert_eq!(inspection.warnings.len(), 1);
        assert!(render_inspection(&inspection, "tomate").contains("Warning: No column named like"));

        let sheet = text_sheet(&[&["Producto", "Volumen"], &["Tomate", "500"]]);
        let inspection = inspect_sheet(&sheet, 0, "tomate");
        assert_eq!(inspection.matches.len(), 1);
        assert_eq!(inspection.mean_price, None);
        assert_eq!(inspection.warnings, ["No column named like 'precio'"]);
    }

    #[test]
    fn test_no_matching_rows_warns() {
        let sheet = text_sheet(&[&["Producto", "Precio"], &["Lechuga", "250"]]);
        let inspection = inspect_sheet(&sheet, 0, "tomate");
        assert!(inspection.matches.is_empty());
        assert_eq!(inspection.warnings, ["No rows where the product contains 'tomate'"]);
    }

    #[test]
    fn test_skip_rows_past_end() {
        let sheet = text_sheet(&[&["Producto"]]);
        let inspection = inspect_sheet(&sheet, 8, "tomate");
        assert_eq!(inspection.warnings.len(), 1);
        assert_eq!(inspection.total_rows, 0);
    }

    #[test]
    fn test_load_workbook_and_csv() {
        let dir = tempfile::tempdir().unwrap();

        let xlsx = dir.path().join("boletin.xlsx");
        fs::write(
            &xlsx,
            workbook_bytes(
                &[
                    ("Portada", &["Boletín diario"][..], vec![]),
                    ("Hortalizas_Mayorista", &HEADERS[..], vec![tomato_row()]),
                ],
                8,
            ),
        )
        .unwrap();

        let first = load_sheet(&xlsx, None).unwrap();
        assert_eq!(first.name, "Portada");
        let sheet = load_sheet(&xlsx, Some("hortalizas_mayorista")).unwrap();
        assert_eq!(sheet.name, "Hortalizas_Mayorista");
        let inspection = inspect_sheet(&sheet, 8, DEFAULT_PRODUCT);
        assert_eq!(inspection.matches.len(), 1);
        assert!(load_sheet(&xlsx, Some("Frutas")).is_err());

        let csv_path = dir.path().join("boletin.csv");
        fs::write(&csv_path, "producto,precio_promedio\nTomate,750\nTomate,850\n").unwrap();
        let sheet = load_sheet(&csv_path, None).unwrap();
        assert_eq!(sheet.name, "boletin");
        let inspection = inspect_sheet(&sheet, 0, DEFAULT_PRODUCT);
        assert_eq!(inspection.mean_price, Some(800.0));
    }
}
