use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::dashboard::{
    group_average, mean_price, sort_by_price_desc, trend, units, Filter, GroupKey, GroupStat,
};
use crate::report::format_price;
use crate::store::Store;
use crate::types::PriceRecord;
use crate::utils::osc8_file_link;

const CHART_WIDTH: f64 = 720.0;
const CHART_HEIGHT: f64 = 240.0;
const CHART_PAD: f64 = 36.0;
const BAR_HEIGHT: f64 = 22.0;

// HTML generation helpers
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Slugify a name for URL use
fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// One distinct slug per name; clashes get a numeric suffix
fn unique_slugs<'a>(names: impl IntoIterator<Item = &'a str>) -> HashMap<String, String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut slugs = HashMap::new();
    for name in names {
        let mut base = slugify(name);
        if base.is_empty() {
            base = "producto".to_string();
        }
        let mut slug = base.clone();
        let mut n = 1;
        while used.contains(&slug) {
            n += 1;
            slug = format!("{}-{}", base, n);
        }
        used.insert(slug.clone());
        slugs.insert(name.to_string(), slug);
    }
    slugs
}

/// CSS styles for the site
fn css_styles() -> &'static str {
    r#"
:root {
    --primary: #7b1e1e;
    --primary-light: #a83232;
    --accent: #2f855a;
    --bg: #f7fafc;
    --card-bg: #ffffff;
    --text: #1a202c;
    --text-muted: #718096;
    --border: #e2e8f0;
    --shadow: 0 4px 6px -1px rgba(0, 0, 0, 0.1), 0 2px 4px -1px rgba(0, 0, 0, 0.06);
    --radius: 8px;
}

* {
    box-sizing: border-box;
    margin: 0;
    padding: 0;
}

body {
    font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
    background: var(--bg);
    color: var(--text);
    line-height: 1.6;
}

.container {
    max-width: 1100px;
    margin: 0 auto;
    padding: 0 24px;
}

/* Header */
header {
    background: linear-gradient(135deg, var(--primary) 0%, var(--primary-light) 100%);
    color: white;
    padding: 24px 0;
    box-shadow: var(--shadow);
}

header h1 {
    font-size: 1.75rem;
    font-weight: 700;
    letter-spacing: -0.025em;
}

header h1 a {
    color: white;
    text-decoration: none;
}

header nav {
    margin-top: 16px;
    display: flex;
    gap: 24px;
    flex-wrap: wrap;
}

header nav a {
    color: rgba(255, 255, 255, 0.9);
    text-decoration: none;
    font-size: 0.875rem;
    font-weight: 500;
}

header nav a.active {
    color: white;
    text-decoration: underline;
}

/* Main content */
main {
    padding: 48px 0;
}

h2 {
    font-size: 1.5rem;
    font-weight: 700;
    margin-bottom: 24px;
    color: var(--primary);
}

h3 {
    font-size: 1.25rem;
    font-weight: 600;
    margin: 32px 0 16px;
}

.muted {
    margin-bottom: 24px;
    color: var(--text-muted);
}

.warning {
    margin-bottom: 24px;
    padding: 12px 16px;
    border-radius: var(--radius);
    background: #fefcbf;
    color: #744210;
}

/* Headline metrics */
.metrics {
    display: grid;
    grid-template-columns: repeat(auto-fill, minmax(180px, 1fr));
    gap: 16px;
    margin-bottom: 32px;
}

.metric {
    padding: 16px;
    background: var(--card-bg);
    border-radius: var(--radius);
    box-shadow: var(--shadow);
}

.metric-value {
    font-size: 1.5rem;
    font-weight: 700;
    color: var(--primary);
}

.metric-label {
    font-size: 0.875rem;
    color: var(--text-muted);
}

/* Tables */
table {
    width: 100%;
    border-collapse: collapse;
    background: var(--card-bg);
    box-shadow: var(--shadow);
    border-radius: var(--radius);
    overflow: hidden;
}

th, td {
    padding: 8px 12px;
    border-bottom: 1px solid var(--border);
    text-align: right;
    font-variant-numeric: tabular-nums;
}

th:first-child, td:first-child {
    text-align: left;
}

th {
    background: #edf2f7;
    font-size: 0.875rem;
}

td a {
    color: var(--primary);
}

/* Charts */
.chart {
    margin-bottom: 16px;
    background: var(--card-bg);
    border-radius: var(--radius);
    box-shadow: var(--shadow);
}

.chart svg {
    display: block;
    width: 100%;
    height: auto;
}

/* Product index */
.product-grid {
    display: grid;
    grid-template-columns: repeat(auto-fill, minmax(220px, 1fr));
    gap: 16px;
}

.product-link {
    display: block;
    padding: 16px;
    background: var(--card-bg);
    border-radius: var(--radius);
    box-shadow: var(--shadow);
    text-decoration: none;
    color: var(--text);
}

.product-name {
    font-weight: 600;
}

.product-price {
    font-size: 0.875rem;
    color: var(--text-muted);
}

/* Breadcrumb */
.breadcrumb {
    display: flex;
    gap: 8px;
    margin-bottom: 24px;
    font-size: 0.875rem;
    color: var(--text-muted);
}

.breadcrumb a {
    color: var(--primary);
    text-decoration: none;
}

/* Footer */
footer {
    background: var(--primary);
    color: rgba(255, 255, 255, 0.8);
    padding: 32px 0;
    margin-top: 64px;
    text-align: center;
    font-size: 0.875rem;
}

footer a {
    color: white;
}
"#
}

/// Generate page header HTML. `root` is the relative path back to the site root.
fn page_header(title: &str, current_path: &str, root: &str) -> String {
    let nav_items = [
        ("index.html", "Summary"),
        ("markets/index.html", "Markets"),
        ("products/index.html", "Products"),
    ];

    let nav_html: String = nav_items
        .iter()
        .map(|(path, label)| {
            let active = if *path == current_path {
                " class=\"active\""
            } else {
                ""
            };
            format!("<a href=\"{}{}\"{}>{}</a>", root, path, active, label)
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{} - ODEPA wholesale prices</title>
    <style>{}</style>
</head>
<body>
    <header>
        <div class="container">
            <h1><a href="{}index.html">ODEPA wholesale prices</a></h1>
            <nav>{}</nav>
        </div>
    </header>
    <main>
        <div class="container">
"#,
        html_escape(title),
        css_styles(),
        root,
        nav_html
    )
}

/// Generate page footer HTML
fn page_footer() -> &'static str {
    r#"
        </div>
    </main>
    <footer>
        <div class="container">
            <p>Built from the daily wholesale bulletins published by <a href="https://www.odepa.gob.cl">ODEPA</a>.</p>
            <p>Not affiliated with ODEPA. Check the original bulletins before relying on these figures.</p>
        </div>
    </footer>
</body>
</html>
"#
}

fn format_opt_price(value: Option<f64>) -> String {
    value.map(format_price).unwrap_or_else(|| "-".to_string())
}

fn metric_html(value: &str, label: &str) -> String {
    format!(
        r#"<div class="metric"><div class="metric-value">{}</div><div class="metric-label">{}</div></div>"#,
        html_escape(value),
        html_escape(label)
    )
}

fn units_warning_html<'a>(records: impl IntoIterator<Item = &'a PriceRecord>) -> String {
    let units = units(records);
    if units.len() <= 1 {
        return String::new();
    }
    format!(
        r#"<p class="warning">This selection mixes units ({}); averages compare unlike quantities.</p>"#,
        html_escape(&units.into_iter().collect::<Vec<_>>().join(", "))
    )
}

/// Statistics table; `link` maps a group key to an optional href
fn stats_table_html(key: GroupKey, stats: &[GroupStat], link: impl Fn(&str) -> Option<String>) -> String {
    let mut html = format!(
        "<table><thead><tr><th>{}</th><th>Avg price</th><th>Min</th><th>Max</th><th>Volume</th><th>Rows</th><th>Priced</th></tr></thead><tbody>",
        key.label()
    );
    for stat in stats {
        let label = match link(&stat.key) {
            Some(href) => format!(
                r#"<a href="{}">{}</a>"#,
                html_escape(&href),
                html_escape(&stat.key)
            ),
            None => html_escape(&stat.key),
        };
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            label,
            format_opt_price(stat.mean_price),
            format_opt_price(stat.price_min),
            format_opt_price(stat.price_max),
            format_price(stat.volume).trim_start_matches('$'),
            stat.rows,
            stat.priced
        ));
    }
    html.push_str("</tbody></table>");
    html
}

/// Inline SVG line chart of (label, value) points, in order
fn line_chart_svg(points: &[(String, f64)]) -> String {
    if points.is_empty() {
        return String::new();
    }

    let min = points.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = points.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let plot_w = CHART_WIDTH - 2.0 * CHART_PAD;
    let plot_h = CHART_HEIGHT - 2.0 * CHART_PAD;

    let coords: Vec<(f64, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, (_, v))| {
            let x = if points.len() == 1 {
                CHART_WIDTH / 2.0
            } else {
                CHART_PAD + plot_w * i as f64 / (points.len() - 1) as f64
            };
            let y = if max > min {
                CHART_PAD + plot_h * (max - v) / (max - min)
            } else {
                CHART_HEIGHT / 2.0
            };
            (x, y)
        })
        .collect();

    let mut svg = format!(
        r#"<svg viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg" role="img">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    );
    svg.push_str(&format!(
        r##"<line x1="{p}" y1="{b}" x2="{r}" y2="{b}" stroke="#cbd5e0"/>"##,
        p = CHART_PAD,
        b = CHART_HEIGHT - CHART_PAD,
        r = CHART_WIDTH - CHART_PAD
    ));
    svg.push_str(&format!(
        r##"<text x="4" y="{}" font-size="11" fill="#718096">{}</text><text x="4" y="{}" font-size="11" fill="#718096">{}</text>"##,
        CHART_PAD - 8.0,
        format_price(max),
        CHART_HEIGHT - CHART_PAD + 16.0,
        format_price(min)
    ));

    if coords.len() > 1 {
        let path: Vec<String> = coords.iter().map(|(x, y)| format!("{:.1},{:.1}", x, y)).collect();
        svg.push_str(&format!(
            r##"<polyline fill="none" stroke="#a83232" stroke-width="2" points="{}"/>"##,
            path.join(" ")
        ));
    }
    for ((label, value), (x, y)) in points.iter().zip(&coords) {
        svg.push_str(&format!(
            r##"<circle cx="{:.1}" cy="{:.1}" r="3.5" fill="#7b1e1e"><title>{}: {}</title></circle>"##,
            x,
            y,
            html_escape(label),
            format_price(*value)
        ));
    }

    let (first, last) = (&points[0].0, &points[points.len() - 1].0);
    svg.push_str(&format!(
        r##"<text x="{}" y="{}" font-size="11" fill="#718096">{}</text>"##,
        CHART_PAD,
        CHART_HEIGHT - 6.0,
        html_escape(first)
    ));
    if points.len() > 1 {
        svg.push_str(&format!(
            r##"<text x="{}" y="{}" font-size="11" fill="#718096" text-anchor="end">{}</text>"##,
            CHART_WIDTH - CHART_PAD,
            CHART_HEIGHT - 6.0,
            html_escape(last)
        ));
    }

    svg.push_str("</svg>");
    svg
}

/// Inline SVG horizontal bar chart, one bar per (label, value)
fn bar_chart_svg(bars: &[(String, f64)]) -> String {
    if bars.is_empty() {
        return String::new();
    }

    let max = bars.iter().map(|(_, v)| *v).fold(0.0, f64::max);
    let label_w = 220.0;
    let value_w = 80.0;
    let plot_w = CHART_WIDTH - label_w - value_w;
    let height = BAR_HEIGHT * bars.len() as f64 + 8.0;

    let mut svg = format!(
        r#"<svg viewBox="0 0 {} {}" xmlns="http://www.w3.org/2000/svg" role="img">"#,
        CHART_WIDTH, height
    );
    for (i, (label, value)) in bars.iter().enumerate() {
        let y = 4.0 + BAR_HEIGHT * i as f64;
        let w = if max > 0.0 { plot_w * value / max } else { 0.0 };
        svg.push_str(&format!(
            r##"<text x="{}" y="{:.1}" font-size="12" text-anchor="end">{}</text><rect x="{}" y="{:.1}" width="{:.1}" height="{}" fill="#a83232"/><text x="{:.1}" y="{:.1}" font-size="12" fill="#718096">{}</text>"##,
            label_w - 8.0,
            y + BAR_HEIGHT * 0.7,
            html_escape(label),
            label_w,
            y + 2.0,
            w,
            BAR_HEIGHT - 4.0,
            label_w + w + 6.0,
            y + BAR_HEIGHT * 0.7,
            format_price(*value)
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn chart_html(svg: String) -> String {
    if svg.is_empty() {
        return String::new();
    }
    format!(r#"<div class="chart">{}</div>"#, svg)
}

/// (key, mean price) for the groups that have a price
fn priced_points(stats: &[GroupStat]) -> Vec<(String, f64)> {
    stats
        .iter()
        .filter_map(|s| s.mean_price.map(|p| (s.key.clone(), p)))
        .collect()
}

fn filter_note(filter: &Filter) -> String {
    let description = filter.describe();
    if description.is_empty() {
        String::new()
    } else {
        format!(r#"<p class="muted">Filtered: {}</p>"#, html_escape(&description))
    }
}

/// Generate homepage
fn generate_homepage(
    records: &[PriceRecord],
    filter: &Filter,
    slugs: &HashMap<String, String>,
    output_dir: &Path,
) -> Result<()> {
    let mut html = page_header("Summary", "index.html", "");

    let first = records.iter().map(|r| r.bulletin_date.as_str()).min().unwrap_or("");
    let latest = records.iter().map(|r| r.bulletin_date.as_str()).max().unwrap_or("");
    let markets = group_average(records, GroupKey::Market);
    let products = group_average(records, GroupKey::Product);
    let dates = trend(records);

    html.push_str("<h2>Wholesale price summary</h2>");
    html.push_str(&filter_note(filter));
    html.push_str(r#"<div class="metrics">"#);
    html.push_str(&metric_html(&format_opt_price(mean_price(records)), "Average price"));
    html.push_str(&metric_html(&records.len().to_string(), "Rows"));
    html.push_str(&metric_html(&dates.len().to_string(), "Bulletins"));
    html.push_str(&metric_html(&markets.len().to_string(), "Markets"));
    html.push_str(&metric_html(&products.len().to_string(), "Products"));
    html.push_str("</div>");
    html.push_str(&format!(
        r#"<p class="muted">Bulletins from {} to {}</p>"#,
        html_escape(first),
        html_escape(latest)
    ));
    html.push_str(&units_warning_html(records));

    html.push_str("<h3>Average price by bulletin</h3>");
    html.push_str(&chart_html(line_chart_svg(&priced_points(&dates))));

    let latest_rows: Vec<&PriceRecord> = records.iter().filter(|r| r.bulletin_date == latest).collect();
    let mut latest_products = group_average(latest_rows.iter().copied(), GroupKey::Product);
    sort_by_price_desc(&mut latest_products);
    html.push_str(&format!("<h3>Products on {}</h3>", html_escape(latest)));
    html.push_str(&stats_table_html(GroupKey::Product, &latest_products, |name| {
        slugs.get(name).map(|slug| format!("products/{}/index.html", slug))
    }));

    html.push_str(page_footer());
    fs::write(output_dir.join("index.html"), html)?;
    Ok(())
}

/// Generate the market comparison page
fn generate_markets_page(records: &[PriceRecord], filter: &Filter, output_dir: &Path) -> Result<()> {
    let page_dir = output_dir.join("markets");
    fs::create_dir_all(&page_dir)?;

    let mut html = page_header("Markets", "markets/index.html", "../");
    html.push_str(
        r#"<nav class="breadcrumb"><a href="../index.html">Home</a> <span>/</span> <span>Markets</span></nav>"#,
    );
    html.push_str("<h2>Market comparison</h2>");
    html.push_str(&filter_note(filter));
    html.push_str(&units_warning_html(records));

    let mut markets = group_average(records, GroupKey::Market);
    sort_by_price_desc(&mut markets);
    html.push_str(&chart_html(bar_chart_svg(&priced_points(&markets))));
    html.push_str(&stats_table_html(GroupKey::Market, &markets, |_| None));

    let mut origins = group_average(records, GroupKey::Origin);
    sort_by_price_desc(&mut origins);
    html.push_str("<h3>By origin</h3>");
    html.push_str(&stats_table_html(GroupKey::Origin, &origins, |_| None));

    html.push_str(page_footer());
    fs::write(page_dir.join("index.html"), html)?;
    Ok(())
}

/// Generate the product index and one trend page per product
fn generate_product_pages(
    records: &[PriceRecord],
    slugs: &HashMap<String, String>,
    output_dir: &Path,
) -> Result<usize> {
    let products_dir = output_dir.join("products");
    fs::create_dir_all(&products_dir)?;

    let products = group_average(records, GroupKey::Product);

    let mut index = page_header("Products", "products/index.html", "../");
    index.push_str(
        r#"<nav class="breadcrumb"><a href="../index.html">Home</a> <span>/</span> <span>Products</span></nav>"#,
    );
    index.push_str("<h2>Products</h2>");
    index.push_str(r#"<div class="product-grid">"#);
    for stat in &products {
        let Some(slug) = slugs.get(&stat.key) else {
            continue;
        };
        index.push_str(&format!(
            r#"<a class="product-link" href="{}/index.html"><div class="product-name">{}</div><div class="product-price">{} avg, {} rows</div></a>"#,
            slug,
            html_escape(&stat.key),
            format_opt_price(stat.mean_price),
            stat.rows
        ));
    }
    index.push_str("</div>");
    index.push_str(page_footer());
    fs::write(products_dir.join("index.html"), index)?;

    let mut by_product: HashMap<&str, Vec<&PriceRecord>> = HashMap::new();
    for record in records {
        by_product.entry(record.product.as_str()).or_default().push(record);
    }

    let mut pages = 0;
    for (name, rows) in &by_product {
        let Some(slug) = slugs.get(*name) else {
            continue;
        };
        let page_dir = products_dir.join(slug);
        fs::create_dir_all(&page_dir)?;

        let mut html = page_header(name, "", "../../");
        html.push_str(&format!(
            r#"<nav class="breadcrumb"><a href="../../index.html">Home</a> <span>/</span> <a href="../index.html">Products</a> <span>/</span> <span>{}</span></nav>"#,
            html_escape(name)
        ));
        html.push_str(&format!("<h2>{}</h2>", html_escape(name)));
        html.push_str(r#"<div class="metrics">"#);
        html.push_str(&metric_html(
            &format_opt_price(mean_price(rows.iter().copied())),
            "Average price",
        ));
        html.push_str(&metric_html(&rows.len().to_string(), "Rows"));
        html.push_str("</div>");
        html.push_str(&units_warning_html(rows.iter().copied()));

        let dates = trend(rows.iter().copied());
        html.push_str("<h3>Price trend</h3>");
        html.push_str(&chart_html(line_chart_svg(&priced_points(&dates))));

        let mut markets = group_average(rows.iter().copied(), GroupKey::Market);
        sort_by_price_desc(&mut markets);
        html.push_str("<h3>By market</h3>");
        html.push_str(&stats_table_html(GroupKey::Market, &markets, |_| None));

        html.push_str("<h3>By bulletin</h3>");
        html.push_str(&stats_table_html(GroupKey::Date, &dates, |_| None));

        html.push_str(page_footer());
        fs::write(page_dir.join("index.html"), html)?;
        pages += 1;
    }

    Ok(pages)
}

/// Write the whole site for `records` into `output_dir`, replacing its contents
pub fn generate_site(records: &[PriceRecord], filter: &Filter, output_dir: &Path) -> Result<usize> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir)
            .with_context(|| format!("Failed to clean {}", output_dir.display()))?;
    }
    fs::create_dir_all(output_dir)?;

    let names: Vec<String> = group_average(records, GroupKey::Product)
        .into_iter()
        .map(|s| s.key)
        .collect();
    let slugs = unique_slugs(names.iter().map(String::as_str));

    println!("Generating product pages...");
    let pages = generate_product_pages(records, &slugs, output_dir)?;

    println!("Generating market page...");
    generate_markets_page(records, filter, output_dir)?;

    println!("Generating homepage...");
    generate_homepage(records, filter, &slugs, output_dir)?;

    Ok(pages + 3)
}

pub fn run_generate(
    settings: &Settings,
    database: Option<&str>,
    output: Option<&str>,
    filter: &Filter,
) -> Result<()> {
    let db_path = database.unwrap_or(settings.database.as_str());
    if !Path::new(db_path).exists() {
        bail!("Database {} not found. Run 'odepa-boletines ingest' first.", db_path);
    }

    println!("Loading rows...");
    let store = Store::open(db_path)?;
    let records = store.query(filter)?;
    println!("Loaded {} rows", records.len());

    if records.is_empty() {
        println!("No rows to publish. Run 'odepa-boletines ingest' first or widen the filter.");
        return Ok(());
    }

    let output_dir = PathBuf::from(output.unwrap_or(settings.output_dir.as_str()));
    let pages = generate_site(&records, filter, &output_dir)?;

    let index = output_dir.join("index.html");
    let index = index.to_string_lossy();
    println!("Done! Generated {} pages, open {}", pages, osc8_file_link(&index, &index));
    Ok(())
}
