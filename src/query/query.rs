use anyhow::anyhow;

use crate::cql::Filter;
use crate::geofile::datastore::FeatureSource;
use crate::geofile::feature::Feature;

/// One page of a filtered table query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPage {
    pub type_name: String,
    pub attribute_names: Vec<String>,
    pub features: Vec<Feature>,
    /// 1-based page number.
    pub page: usize,
    pub page_size: usize,
    pub total_matches: usize,
}

impl ResultPage {
    pub fn page_count(&self) -> usize {
        self.total_matches.div_ceil(self.page_size.max(1)).max(1)
    }
}

/// Keep the `page`th window of `page_size` features matching `filter`, counting every match.
pub fn paginate<I>(
    features: I,
    filter: &Filter,
    page: usize,
    page_size: usize,
) -> anyhow::Result<(Vec<Feature>, usize)>
where
    I: IntoIterator<Item = anyhow::Result<Feature>>,
{
    if page == 0 || page_size == 0 {
        return Err(anyhow!("Pages and page sizes start at 1"));
    }
    let first = (page - 1).checked_mul(page_size).ok_or_else(|| {
        anyhow!("Page {} is out of range for pages of {} features", page, page_size)
    })?;
    let mut selected = Vec::new();
    let mut matches = 0;
    for feature in features {
        let feature = feature?;
        if !filter.evaluate(&feature) {
            continue;
        }
        if matches >= first && selected.len() < page_size {
            selected.push(feature);
        }
        matches += 1;
    }
    Ok((selected, matches))
}

/// Filtered table route: the requested page of matching features with all attributes.
pub fn select_features(
    source: &mut FeatureSource,
    filter: &Filter,
    page: usize,
    page_size: usize,
) -> anyhow::Result<ResultPage> {
    let schema = source.schema().clone();
    filter.validate(&schema)?;
    let (features, total_matches) = paginate(source.features(), filter, page, page_size)?;
    log::info!(
        "{} features of {} match {}",
        total_matches,
        schema.type_name,
        filter
    );
    Ok(ResultPage {
        type_name: schema.type_name.clone(),
        attribute_names: schema.attribute_names(),
        features,
        page,
        page_size,
        total_matches,
    })
}

/// Count route. `INCLUDE` uses the driver's feature count, anything else is a full scan.
pub fn count_features(source: &mut FeatureSource, filter: &Filter) -> anyhow::Result<u64> {
    filter.validate(source.schema())?;
    if filter.is_include() {
        return Ok(source.feature_count());
    }
    let mut count = 0;
    for feature in source.features() {
        if filter.evaluate(&feature?) {
            count += 1;
        }
    }
    Ok(count)
}

/// Geometry route: matching features carrying only their geometry. Attributes the filter does
/// not read are not fetched from the data source.
pub fn select_geometries(
    source: &mut FeatureSource,
    filter: &Filter,
) -> anyhow::Result<Vec<Feature>> {
    filter.validate(source.schema())?;
    let needed = filter.referenced_attributes();
    let ignored: Vec<String> = source
        .schema()
        .attribute_names()
        .into_iter()
        .filter(|name| !needed.contains(name))
        .collect();
    log::debug!("Skipping attributes {:?}", ignored);
    source.set_ignored_attributes(&ignored)?;

    let selected = collect_geometries(source.features(), filter);
    source.set_ignored_attributes(&[])?;
    selected
}

fn collect_geometries<I>(features: I, filter: &Filter) -> anyhow::Result<Vec<Feature>>
where
    I: IntoIterator<Item = anyhow::Result<Feature>>,
{
    let mut selected = Vec::new();
    for feature in features {
        let mut feature = feature?;
        if filter.evaluate(&feature) {
            feature.retain_attributes(&[]);
            selected.push(feature);
        }
    }
    Ok(selected)
}
