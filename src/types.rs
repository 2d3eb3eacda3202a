//! Canonical price record and manifest types

use serde::{Deserialize, Serialize};

/// One observation from a bulletin: a product/variety/grade quoted at one
/// market on one bulletin date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    #[serde(rename = "producto")]
    pub product: String,
    #[serde(rename = "variedad")]
    pub variety: Option<String>,
    #[serde(rename = "calidad")]
    pub grade: Option<String>,
    #[serde(rename = "volumen")]
    pub volume: Option<f64>,
    #[serde(rename = "precio_maximo")]
    pub price_max: Option<f64>,
    #[serde(rename = "precio_minimo")]
    pub price_min: Option<f64>,
    #[serde(rename = "precio_promedio")]
    pub price_avg: Option<f64>,
    #[serde(rename = "unidad")]
    pub unit: Option<String>,
    #[serde(rename = "origen")]
    pub origin: Option<String>,
    #[serde(rename = "mercado")]
    pub market: String,
    #[serde(rename = "fecha_boletin")]
    pub bulletin_date: String,
}

impl PriceRecord {
    /// Serialized column names, in field order
    pub const COLUMNS: [&'static str; 11] = [
        "producto",
        "variedad",
        "calidad",
        "volumen",
        "precio_maximo",
        "precio_minimo",
        "precio_promedio",
        "unidad",
        "origen",
        "mercado",
        "fecha_boletin",
    ];
}

/// The nine fields read out of a bulletin sheet. `market` and
/// `bulletin_date` come from the sheet name and the manifest instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalField {
    Product,
    Variety,
    Grade,
    Volume,
    PriceMax,
    PriceMin,
    PriceAvg,
    Unit,
    Origin,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 9] = [
        CanonicalField::Product,
        CanonicalField::Variety,
        CanonicalField::Grade,
        CanonicalField::Volume,
        CanonicalField::PriceMax,
        CanonicalField::PriceMin,
        CanonicalField::PriceAvg,
        CanonicalField::Unit,
        CanonicalField::Origin,
    ];

    /// Column name in the `precios` table
    pub fn column(&self) -> &'static str {
        match self {
            CanonicalField::Product => "producto",
            CanonicalField::Variety => "variedad",
            CanonicalField::Grade => "calidad",
            CanonicalField::Volume => "volumen",
            CanonicalField::PriceMax => "precio_maximo",
            CanonicalField::PriceMin => "precio_minimo",
            CanonicalField::PriceAvg => "precio_promedio",
            CanonicalField::Unit => "unidad",
            CanonicalField::Origin => "origen",
        }
    }

    /// Normalized header names that feed this field, highest priority first
    pub fn synonyms(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::Product => &["producto", "especie"],
            CanonicalField::Variety => &["variedad"],
            CanonicalField::Grade => &["calidad"],
            CanonicalField::Volume => &["volumen", "cantidad"],
            CanonicalField::PriceMax => &["precio_maximo", "precio_max", "preciomaximo"],
            CanonicalField::PriceMin => &["precio_minimo", "precio_min", "preciominimo"],
            CanonicalField::PriceAvg => &["precio_promedio", "precio_prom", "preciopromedio"],
            CanonicalField::Unit => &["unidad", "unidad_de_comercializacion"],
            CanonicalField::Origin => &["origen"],
        }
    }
}

/// Entry of the index manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// ISO `YYYY-MM-DD`
    pub date: String,
    pub url: String,
    pub name: String,
}
