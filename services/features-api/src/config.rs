//! Features configuration loading.

use std::path::Path;

use anyhow::{Context, Result};
use features_datasource::FeaturesConfig;

/// Overrides `baseUrl` of the config file.
pub const BASE_URL_ENV: &str = "FEATURES_BASE_URL";

/// Load configuration from a YAML file.
///
/// Relative GeoPackage paths are resolved against the directory of the config file.
pub fn load_config(path: &Path) -> Result<FeaturesConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read: {:?}", path))?;
    let mut config = FeaturesConfig::from_yaml(&content).with_context(|| format!("Failed to parse: {:?}", path))?;

    if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
        config.base_url = base_url;
    }
    if let Some(dir) = path.parent() {
        resolve_paths(&mut config, dir);
    }

    tracing::info!(
        "Loaded {} collections and {} additional datasources from {:?}",
        config.collections.len(),
        config.datasources.additional.len(),
        path
    );
    Ok(config)
}

fn resolve_paths(config: &mut FeaturesConfig, dir: &Path) {
    let datasources = std::iter::once(&mut config.datasources.default_wgs84)
        .chain(config.datasources.additional.iter_mut().map(|a| &mut a.datasource));
    for datasource in datasources {
        if let Some(gpkg) = datasource.geopackage.as_mut() {
            if gpkg.file.is_relative() {
                gpkg.file = dir.join(&gpkg.file);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_resolves_relative_geopackage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "collections:\n  - id: addresses\ndatasources:\n  defaultWGS84:\n    geopackage:\n      file: data/addresses.gpkg\n"
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        let gpkg = config.datasources.default_wgs84.geopackage.unwrap();
        assert_eq!(gpkg.file, dir.path().join("data/addresses.gpkg"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/does/not/exist.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
