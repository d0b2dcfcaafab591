use prettytable::{format, Cell, Row, Table};

use crate::geofile::feature::{field_value_to_string, geometry_to_wkt, Feature};

use super::query::ResultPage;

const MAX_CELL_WIDTH: usize = 40;

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_WIDTH {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
    truncated.push_str("...");
    truncated
}

fn geometry_cell(feature: &Feature) -> String {
    match &feature.geometry {
        Some(geometry) => geometry_to_wkt(geometry).unwrap_or_else(|err| {
            log::debug!("Could not render geometry as WKT: {}", err);
            "<invalid geometry>".to_string()
        }),
        None => String::new(),
    }
}

fn feature_row(feature: &Feature, attribute_names: &[String]) -> Row {
    let mut cells = vec![
        Cell::new(&feature.fid.map(|fid| fid.to_string()).unwrap_or_default()),
        Cell::new(&truncate(&geometry_cell(feature))),
    ];
    cells.extend(attribute_names.iter().map(|name| {
        let value = feature
            .attribute(name)
            .map(|value| truncate(&field_value_to_string(value)))
            .unwrap_or_default();
        Cell::new(&value)
    }));
    Row::new(cells)
}

/// Table of the features on a result page, one column per attribute plus feature id and WKT.
pub fn render_page(page: &ResultPage) -> String {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
    let mut titles = vec![Cell::new("fid"), Cell::new("geometry")];
    titles.extend(page.attribute_names.iter().map(|name| Cell::new(name)));
    table.set_titles(Row::new(titles));
    for feature in &page.features {
        table.add_row(feature_row(feature, &page.attribute_names));
    }
    format!(
        "{}{} matching features of {}, page {}/{}\n",
        table,
        page.total_matches,
        page.type_name,
        page.page,
        page.page_count()
    )
}

/// Full WKT of every feature, one per line.
pub fn render_geometries(features: &[Feature]) -> String {
    let mut text = String::new();
    for feature in features {
        let fid = feature.fid.map(|fid| fid.to_string()).unwrap_or_default();
        text.push_str(&format!("{}\t{}\n", fid, geometry_cell(feature)));
    }
    text.push_str(&format!("{} geometries\n", features.len()));
    text
}
