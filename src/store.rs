//! SQLite store for normalized bulletin rows

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::dashboard::Filter;
use crate::init_database;
use crate::types::PriceRecord;

pub const TABLE: &str = "precios";

const COLUMNS: &str = "producto, variedad, calidad, volumen, precio_maximo, precio_minimo, \
                       precio_promedio, unidad, origen, mercado, fecha_boletin";

/// Result of offering one bulletin's rows to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(usize),
    /// Rows for this date are already stored; nothing was written
    AlreadyPresent,
    Empty,
}

pub struct Store {
    conn: Connection,
    table: String,
}

fn record_from_row(row: &Row) -> rusqlite::Result<PriceRecord> {
    Ok(PriceRecord {
        product: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
        variety: row.get(1)?,
        grade: row.get(2)?,
        volume: row.get(3)?,
        price_max: row.get(4)?,
        price_min: row.get(5)?,
        price_avg: row.get(6)?,
        unit: row.get(7)?,
        origin: row.get(8)?,
        market: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
        bulletin_date: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

impl Store {
    /// Open (creating if needed) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        init_database(&conn)?;
        Ok(Self {
            conn,
            table: TABLE.to_string(),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;
        Ok(Self {
            conn,
            table: TABLE.to_string(),
        })
    }

    /// Open a database produced elsewhere without altering it. Uses the
    /// `precios` table when present, otherwise the first table in the file.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let table = if tables.iter().any(|t| t == TABLE) {
            TABLE.to_string()
        } else {
            match tables.into_iter().next() {
                Some(t) => t,
                None => bail!("{} contains no tables", path.display()),
            }
        };

        Ok(Self { conn, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted_table(&self) -> String {
        format!("\"{}\"", self.table.replace('"', "\"\""))
    }

    pub fn has_bulletin(&self, bulletin_date: &str) -> Result<bool> {
        has_bulletin(&self.conn, &self.quoted_table(), bulletin_date)
    }

    /// Append one bulletin's rows unless rows for `bulletin_date` already
    /// exist. The check and the inserts share one transaction.
    pub fn append_bulletin(
        &mut self,
        bulletin_date: &str,
        records: &[PriceRecord],
    ) -> Result<AppendOutcome> {
        if let Some(stray) = records.iter().find(|r| r.bulletin_date != bulletin_date) {
            bail!(
                "record for {} dated {} in batch for {}",
                stray.product,
                stray.bulletin_date,
                bulletin_date
            );
        }

        let table = self.quoted_table();
        let tx = self.conn.transaction()?;

        if has_bulletin(&tx, &table, bulletin_date)? {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        if records.is_empty() {
            return Ok(AppendOutcome::Empty);
        }

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                table, COLUMNS
            ))?;
            for r in records {
                stmt.execute(params![
                    r.product,
                    r.variety,
                    r.grade,
                    r.volume,
                    r.price_max,
                    r.price_min,
                    r.price_avg,
                    r.unit,
                    r.origin,
                    r.market,
                    r.bulletin_date,
                ])?;
            }
        }

        tx.commit()?;
        Ok(AppendOutcome::Inserted(records.len()))
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.quoted_table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Rows matching `filter`, ordered by date then market then product.
    /// Date bounds go to SQL; the rest of the filter runs on the rows.
    pub fn query(&self, filter: &Filter) -> Result<Vec<PriceRecord>> {
        let lower = filter.date.as_deref().or(filter.from.as_deref()).unwrap_or("");
        let upper = filter.date.as_deref().or(filter.to.as_deref()).unwrap_or("\u{10FFFF}");

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} WHERE fecha_boletin >= ?1 AND fecha_boletin <= ?2 \
             ORDER BY fecha_boletin, mercado, producto",
            COLUMNS,
            self.quoted_table()
        ))?;
        let rows = stmt.query_map(params![lower, upper], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            let record = row?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn distinct(&self, column: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
            col = column,
            table = self.quoted_table()
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn bulletin_dates(&self) -> Result<Vec<String>> {
        self.distinct("fecha_boletin")
    }

    pub fn markets(&self) -> Result<Vec<String>> {
        self.distinct("mercado")
    }

    pub fn products(&self) -> Result<Vec<String>> {
        self.distinct("producto")
    }

    pub fn origins(&self) -> Result<Vec<String>> {
        self.distinct("origen")
    }

    pub fn latest_date(&self) -> Result<Option<String>> {
        let latest = self
            .conn
            .query_row(
                &format!("SELECT MAX(fecha_boletin) FROM {}", self.quoted_table()),
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(latest)
    }
}

fn has_bulletin(conn: &Connection, table: &str, bulletin_date: &str) -> Result<bool> {
    let exists: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE fecha_boletin = ?1)", table),
        [bulletin_date],
        |row| row.get(0),
    )?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::test_support::record;

    fn batch(date: &str) -> Vec<PriceRecord> {
        vec![
            record("Tomate", "Hortalizas_Lo_Valledor", date, Some(750.0)),
            record("Tomatillo", "Hortalizas_Lo_Valledor", date, Some(1200.0)),
            record("Lechuga", "Hortalizas_Vega_Central", date, None),
        ]
    }

    #[test]
    fn test_append_is_idempotent_per_date() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(!store.has_bulletin("2024-01-10").unwrap());

        let outcome = store.append_bulletin("2024-01-10", &batch("2024-01-10")).unwrap();
        assert_eq!(outcome, AppendOutcome::Inserted(3));
        assert_eq!(store.count().unwrap(), 3);
        assert!(store.has_bulletin("2024-01-10").unwrap());

        // A corrected re-upload for the same date is ignored too
        let mut corrected = batch("2024-01-10");
        corrected.truncate(1);
        let outcome = store.append_bulletin("2024-01-10", &corrected).unwrap();
        assert_eq!(outcome, AppendOutcome::AlreadyPresent);
        assert_eq!(store.count().unwrap(), 3);

        let outcome = store.append_bulletin("2024-01-11", &batch("2024-01-11")).unwrap();
        assert_eq!(outcome, AppendOutcome::Inserted(3));
        assert_eq!(store.count().unwrap(), 6);
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(
            store.append_bulletin("2024-01-10", &[]).unwrap(),
            AppendOutcome::Empty
        );
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_batch_with_foreign_date_is_rejected() {
        let mut store = Store::open_in_memory().unwrap();
        assert!(store.append_bulletin("2024-01-11", &batch("2024-01-10")).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_round_trip_and_query() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_bulletin("2024-01-10", &batch("2024-01-10")).unwrap();
        store.append_bulletin("2024-01-11", &batch("2024-01-11")).unwrap();

        let all = store.query(&Filter::default()).unwrap();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], record("Tomate", "Hortalizas_Lo_Valledor", "2024-01-10", Some(750.0)));

        let tomat = store.query(&Filter::product("tomat")).unwrap();
        assert_eq!(tomat.len(), 4);

        let filter = Filter {
            product: Some("tomate".to_string()),
            from: Some("2024-01-11".to_string()),
            ..Filter::default()
        };
        let rows = store.query(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bulletin_date, "2024-01-11");
    }

    #[test]
    fn test_distinct_values() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.latest_date().unwrap(), None);
        store.append_bulletin("2024-01-11", &batch("2024-01-11")).unwrap();
        store.append_bulletin("2024-01-10", &batch("2024-01-10")).unwrap();

        assert_eq!(store.bulletin_dates().unwrap(), ["2024-01-10", "2024-01-11"]);
        assert_eq!(
            store.markets().unwrap(),
            ["Hortalizas_Lo_Valledor", "Hortalizas_Vega_Central"]
        );
        assert_eq!(store.products().unwrap(), ["Lechuga", "Tomate", "Tomatillo"]);
        assert_eq!(store.origins().unwrap(), ["Melipilla"]);
        assert_eq!(store.latest_date().unwrap().as_deref(), Some("2024-01-11"));
    }

    #[test]
    fn test_open_existing_falls_back_to_first_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otro.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(&format!(
                "CREATE TABLE boletin ({});
                 INSERT INTO boletin VALUES ('Tomate', NULL, NULL, 10, 900, 600, 750, 'kg', NULL, 'Hortalizas', '2024-01-10');",
                COLUMNS
            ))
            .unwrap();
        }

        let store = Store::open_existing(&path).unwrap();
        assert_eq!(store.table(), "boletin");
        assert_eq!(store.count().unwrap(), 1);
        let rows = store.query(&Filter::product("tomate")).unwrap();
        assert_eq!(rows[0].price_avg, Some(750.0));
    }
}
