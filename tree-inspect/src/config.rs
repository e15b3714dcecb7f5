use anyhow::{Context, Result, bail};
use log::{info, warn};
use shared::{AppSection, MigrationStrategy, TreeConfig};
use std::path::Path;

pub fn load_config(path: &Path) -> Result<TreeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = TreeConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    check_version(&config.app)?;
    Ok(config)
}

/// A missing path means defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<TreeConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(TreeConfig::default()),
    }
}

fn check_version(app: &AppSection) -> Result<()> {
    if !app.needs_migration() {
        return Ok(());
    }
    match app.get_migration_strategy() {
        MigrationStrategy::None => Ok(()),
        MigrationStrategy::Upgrade(description) => {
            info!(
                "Config format {} is older than {}: {description}",
                app.version,
                AppSection::CURRENT_VERSION
            );
            Ok(())
        }
        MigrationStrategy::Recreate => {
            warn!("Config format {} is unknown", app.version);
            bail!(
                "unsupported config version '{}' (expected {})",
                app.version,
                AppSection::CURRENT_VERSION
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{SortBy, SortOrder};

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tree-inspect-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_tree_section() {
        let path = write_temp(
            "ok.toml",
            concat!(
                "[app]\nversion = \"1.0.0\"\n\n",
                "[tree]\nsort_by = \"updated_at\"\nsort_order = \"desc\"\n",
            ),
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.tree.sort_by, SortBy::UpdatedAt);
        assert_eq!(config.tree.sort_order, SortOrder::Desc);
        assert!(config.tree.collapse_emptied_parents);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_unknown_versions_and_accepts_upgradable_ones() {
        let unknown = write_temp("unknown.toml", "[app]\nversion = \"7.0.0\"\n");
        assert!(load_config(&unknown).is_err());
        std::fs::remove_file(unknown).ok();

        let old = write_temp("old.toml", "[app]\nversion = \"0.9.0\"\n");
        assert!(load_config(&old).is_ok());
        std::fs::remove_file(old).ok();
    }

    #[test]
    fn missing_path_uses_defaults() {
        assert_eq!(load_or_default(None).unwrap(), TreeConfig::default());
        assert!(load_config(Path::new("/nonexistent/tree.toml")).is_err());
    }
}
