use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use gdal::vector::LayerAccess;
use indicatif::ProgressBar;

use super::feature::{to_gdal_geometry, Feature};
use super::schema::Schema;

pub const SHAPEFILE_DRIVER: &str = "ESRI Shapefile";

/// Files making up one shapefile dataset.
pub const SIDECAR_EXTENSIONS: [&str; 8] = ["shp", "shx", "dbf", "prj", "cpg", "qix", "sbn", "sbx"];

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Write a `.qix` spatial index next to the shapefile.
    pub spatial_index: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            spatial_index: true,
        }
    }
}

/// Normalise an output path to a `.shp` file. A missing extension is added, any other extension
/// is rejected.
pub fn shapefile_output_path(filepath: &Path) -> anyhow::Result<PathBuf> {
    match filepath.extension().and_then(|ext| ext.to_str()) {
        None => Ok(filepath.with_extension("shp")),
        Some(ext) if ext.eq_ignore_ascii_case("shp") => Ok(filepath.to_path_buf()),
        Some(ext) => Err(anyhow!(
            "Output {:?} must be a shapefile (.shp), not .{}",
            filepath,
            ext
        )),
    }
}

/// Directory plus file stem: every sidecar of a shapefile shares it.
fn shapefile_base(filepath: &Path) -> anyhow::Result<PathBuf> {
    let parent = match filepath.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let parent = parent
        .canonicalize()
        .with_context(|| format!("Directory {:?} not found", parent))?;
    let stem = filepath
        .file_stem()
        .ok_or_else(|| anyhow!("{:?} has no file name", filepath))?;
    Ok(parent.join(stem))
}

/// Fail if writing `output` would overwrite any file of the `source` dataset.
pub fn ensure_distinct_location(source: &Path, output: &Path) -> anyhow::Result<()> {
    if shapefile_base(source)? == shapefile_base(output)? {
        return Err(anyhow!("Cannot replace {:?}", source));
    }
    Ok(())
}

/// Whether `filepath` has the extension of one of the files of a shapefile dataset.
pub fn is_shapefile_sidecar(filepath: &Path) -> bool {
    filepath
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| {
            SIDECAR_EXTENSIONS
                .iter()
                .any(|sidecar| sidecar.eq_ignore_ascii_case(ext))
        })
}

/// Move every existing sidecar of the shapefile at `filepath` into `dir`.
///
/// Returns the original and new path of each moved file. If a move fails, the files moved so far
/// are put back.
fn move_shapefile_aside(filepath: &Path, dir: &Path) -> anyhow::Result<Vec<(PathBuf, PathBuf)>> {
    let mut moved = Vec::new();
    for ext in SIDECAR_EXTENSIONS {
        let sidecar = filepath.with_extension(ext);
        let Some(file_name) = sidecar.file_name() else {
            continue;
        };
        if !sidecar.exists() {
            continue;
        }
        let aside = dir.join(file_name);
        if let Err(err) = fs::rename(&sidecar, &aside) {
            restore_files(&moved);
            return Err(err).with_context(|| format!("Moving {:?} aside", sidecar));
        }
        moved.push((sidecar, aside));
    }
    Ok(moved)
}

/// Move files back to where [`move_shapefile_aside`] found them.
fn restore_files(moved: &[(PathBuf, PathBuf)]) {
    for (original, aside) in moved {
        if let Err(err) = fs::rename(aside, original) {
            log::error!("Could not restore {:?} from {:?}: {}", original, aside, err);
        }
    }
}

/// Move `files` into `dir`, recording each target in `installed`.
fn install_files(
    files: &[PathBuf],
    dir: &Path,
    installed: &mut Vec<PathBuf>,
) -> anyhow::Result<()> {
    for file in files {
        let Some(file_name) = file.file_name() else {
            continue;
        };
        let target = dir.join(file_name);
        fs::rename(file, &target)
            .with_context(|| format!("Moving {:?} to {:?}", file, target))?;
        installed.push(target);
    }
    Ok(())
}

/// Atomic creation of a new shapefile.
///
/// The OGR shapefile driver has no transactions, so features are written to a staging directory
/// next to the output. `commit` moves the finished files into place, dropping the transaction
/// without committing deletes everything that was written.
pub struct ShapefileTransaction {
    output_filepath: PathBuf,
    staging_dir: PathBuf,
    dataset: Option<gdal::Dataset>,
    // Attribute name in the schema to the field name the driver created (DBF names are
    // truncated to 10 characters).
    field_names: HashMap<String, String>,
    features_written: usize,
    finished: bool,
}

impl ShapefileTransaction {
    pub fn begin(
        output_filepath: &Path,
        schema: &Schema,
        options: &WriteOptions,
    ) -> anyhow::Result<Self> {
        let output_filepath = shapefile_output_path(output_filepath)?;
        let file_name = output_filepath
            .file_name()
            .ok_or_else(|| anyhow!("{:?} has no file name", output_filepath))?
            .to_os_string();
        let stem = output_filepath
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| anyhow!("{:?} has no valid file stem", output_filepath))?
            .to_string();
        let output_dir = shapefile_base(&output_filepath)?
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("{:?} has no parent directory", output_filepath))?;

        let staging_dir = output_dir.join(format!(".{}.{}.staging", stem, std::process::id()));
        if staging_dir.exists() {
            log::warn!("Removing stale staging directory {:?}", staging_dir);
            fs::remove_dir_all(&staging_dir)?;
        }
        fs::create_dir(&staging_dir)
            .with_context(|| format!("Creating staging directory {:?}", staging_dir))?;
        log::debug!("Staging shapefile in {:?}", staging_dir);

        // From here on a failure drops the transaction, which removes the staging directory.
        let mut transaction = Self {
            output_filepath: output_dir.join(&file_name),
            staging_dir,
            dataset: None,
            field_names: HashMap::new(),
            features_written: 0,
            finished: false,
        };

        let driver = gdal::DriverManager::get_driver_by_name(SHAPEFILE_DRIVER)
            .context("Getting GDAL driver")?;
        let mut dataset = driver.create_vector_only(transaction.staging_dir.join(&file_name))?;
        let layer_creation_options = ["SPATIAL_INDEX=YES"];
        let layer = dataset.create_layer(gdal::LayerOptions {
            name: &stem,
            srs: schema.crs.as_ref(),
            ty: schema.geometry_type,
            options: if options.spatial_index {
                Some(&layer_creation_options)
            } else {
                None
            },
        })?;

        for field in &schema.fields {
            let field_defn = gdal::vector::FieldDefn::new(&field.name, field.field_type)?;
            if field.width > 0 {
                field_defn.set_width(field.width);
            }
            if field.precision > 0 {
                field_defn.set_precision(field.precision);
            }
            field_defn
                .add_to_layer(&layer)
                .with_context(|| format!("Creating field '{}'", field.name))?;
        }
        let created_names: Vec<String> = layer.defn().fields().map(|field| field.name()).collect();
        if created_names.len() != schema.fields.len() {
            return Err(anyhow!(
                "Driver created {} fields, expected {}",
                created_names.len(),
                schema.fields.len()
            ));
        }
        transaction.field_names = schema
            .fields
            .iter()
            .map(|field| field.name.clone())
            .zip(created_names)
            .collect();
        drop(layer);

        transaction.dataset = Some(dataset);
        Ok(transaction)
    }

    pub fn output_filepath(&self) -> &Path {
        &self.output_filepath
    }

    pub fn features_written(&self) -> usize {
        self.features_written
    }

    pub fn append(&mut self, feature: &Feature) -> anyhow::Result<()> {
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| anyhow!("Shapefile transaction is closed"))?;
        let layer = dataset
            .layers()
            .next()
            .ok_or_else(|| anyhow!("Staged shapefile has no layer"))?;

        let mut gdal_feature = gdal::vector::Feature::new(layer.defn())?;
        if let Some(geometry) = &feature.geometry {
            gdal_feature.set_geometry(to_gdal_geometry(geometry)?)?;
        }
        for (name, value) in &feature.attributes {
            let Some(value) = value else {
                continue;
            };
            let field_name = self
                .field_names
                .get(name)
                .ok_or_else(|| anyhow!("Attribute '{}' is not part of the schema", name))?;
            gdal_feature.set_field(field_name, value)?;
        }
        gdal_feature.create(&layer)?;
        self.features_written += 1;
        Ok(())
    }

    /// Close the write handle and move the staged files into place.
    ///
    /// An existing shapefile at the output path is replaced. Its files are kept in the staging
    /// directory until every new file is in place, and restored if that fails.
    pub fn commit(mut self) -> anyhow::Result<PathBuf> {
        // Dropping the dataset flushes and closes every sidecar.
        self.dataset.take();

        let staged_files = fs::read_dir(&self.staging_dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<PathBuf>, _>>()?;
        let output_dir = self
            .output_filepath
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let replaced_dir = self.staging_dir.join("replaced");
        fs::create_dir(&replaced_dir)
            .with_context(|| format!("Creating directory {:?}", replaced_dir))?;
        let replaced = move_shapefile_aside(&self.output_filepath, &replaced_dir)?;

        let mut installed = Vec::new();
        if let Err(err) = install_files(&staged_files, &output_dir, &mut installed) {
            for target in &installed {
                if let Err(remove_err) = fs::remove_file(target) {
                    log::error!("Could not remove {:?}: {}", target, remove_err);
                }
            }
            restore_files(&replaced);
            // Dropping the transaction removes the staging directory.
            return Err(err.context(format!("Committing {:?}", self.output_filepath)));
        }
        if !replaced.is_empty() {
            log::info!("Replaced existing shapefile {:?}", self.output_filepath);
        }
        fs::remove_dir_all(&self.staging_dir)?;
        self.finished = true;
        log::info!(
            "Committed {} features to {:?}",
            self.features_written,
            self.output_filepath
        );
        Ok(self.output_filepath.clone())
    }

    /// Discard everything written so far.
    pub fn rollback(mut self) -> anyhow::Result<()> {
        self.dataset.take();
        self.finished = true;
        fs::remove_dir_all(&self.staging_dir)
            .with_context(|| format!("Removing staging directory {:?}", self.staging_dir))?;
        log::info!("Rolled back write to {:?}", self.output_filepath);
        Ok(())
    }
}

impl Drop for ShapefileTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.dataset.take();
        match fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => log::info!("Rolled back write to {:?}", self.output_filepath),
            Err(err) => log::warn!(
                "Could not remove staging directory {:?}: {}",
                self.staging_dir,
                err
            ),
        }
    }
}

/// Write all features to a new shapefile in one transaction.
pub fn write_features_to_shapefile(
    features: &[Feature],
    output_filepath: &Path,
    schema: &Schema,
    options: &WriteOptions,
) -> anyhow::Result<PathBuf> {
    let mut transaction = ShapefileTransaction::begin(output_filepath, schema, options)?;
    log::info!(
        "Writing {} features to {:?}",
        features.len(),
        transaction.output_filepath()
    );
    let bar = ProgressBar::new(features.len() as u64);
    for feature in features {
        transaction.append(feature)?;
        bar.inc(1);
    }
    bar.finish_and_clear();
    transaction.commit()
}
