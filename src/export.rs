use anyhow::{bail, Context, Result};
use csv::Writer;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::config::Settings;
use crate::dashboard::Filter;
use crate::store::Store;
use crate::types::PriceRecord;
use crate::utils::osc8_file_link;

/// Write records as CSV with the stored column names as the header row
pub fn write_csv<W: Write>(out: W, records: &[PriceRecord]) -> Result<()> {
    let mut writer = Writer::from_writer(out);
    // serialize only emits the header along with the first row
    if records.is_empty() {
        writer.write_record(PriceRecord::COLUMNS)?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn run_export(
    settings: &Settings,
    database: Option<&str>,
    filter: &Filter,
    output: Option<&str>,
) -> Result<()> {
    let db_path = database.unwrap_or(settings.database.as_str());
    if !Path::new(db_path).exists() {
        bail!("Database {} not found. Run 'odepa-boletines ingest' first.", db_path);
    }

    let store = Store::open(db_path)?;
    let records = store.query(filter)?;

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create CSV file: {}", path))?;
            write_csv(file, &records)?;
            println!(
                "Exported {} rows to {}",
                records.len(),
                osc8_file_link(path, path)
            );
        }
        None => write_csv(io::stdout().lock(), &records)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::test_support::record;

    #[test]
    fn test_csv_uses_column_names() {
        let mut buf = Vec::new();
        let row = record("Tomate", "Hortalizas_Mayorista", "2024-01-10", Some(750.0));
        write_csv(&mut buf, &[row]).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some(
                "producto,variedad,calidad,volumen,precio_maximo,precio_minimo,\
                 precio_promedio,unidad,origen,mercado,fecha_boletin"
            )
        );
        assert_eq!(
            lines.next(),
            Some("Tomate,,,100.0,850.0,650.0,750.0,kg,Melipilla,Hortalizas_Mayorista,2024-01-10")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_empty_export_keeps_header() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), format!("{}\n", PriceRecord::COLUMNS.join(",")));

        let mut buf = Vec::new();
        let row = record("Tomate", "Hortalizas_Mayorista", "2024-01-10", Some(750.0));
        write_csv(&mut buf, &[row]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().next(), Some(PriceRecord::COLUMNS.join(",").as_str()));
    }

    #[test]
    fn test_export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("boletines.db");
        let csv_path = dir.path().join("tomate.csv");
        {
            let mut store = Store::open(&db).unwrap();
            store
                .append_bulletin(
                    "2024-01-10",
                    &[
                        record("Tomate", "Hortalizas_Mayorista", "2024-01-10", Some(750.0)),
                        record("Lechuga", "Hortalizas_Mayorista", "2024-01-10", Some(250.0)),
                    ],
                )
                .unwrap();
        }

        run_export(
            &Settings::default(),
            db.to_str(),
            &Filter::product("tomate"),
            csv_path.to_str(),
        )
        .unwrap();

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let rows: Vec<PriceRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product, "Tomate");
        assert_eq!(rows[0].price_avg, Some(750.0));
    }
}
