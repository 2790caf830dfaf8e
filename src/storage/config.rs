//! TOML Configuration Management
//!
//! Reads and writes the workflow configuration file. Relative paths inside
//! the file are resolved against the file's own directory.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::WorkflowConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::resolve_against;

/// Configuration service for one workflow configuration file
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: WorkflowConfig,
}

impl ConfigService {
    /// Load and validate the configuration at `path`
    pub fn load(path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = path.into();
        let config = Self::load_from_file(&config_path)?;
        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<WorkflowConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            AppError::config(format!("Cannot read configuration '{}': {}", path.display(), e))
        })?;
        let mut config: WorkflowConfig = toml::from_str(&content)?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.input.catalog = resolve_against(base, &config.input.catalog);
        config.run.output_dir = resolve_against(base, &config.run.output_dir);

        config.validate()?;
        Ok(config)
    }

    /// Write a configuration file with pretty formatting. Existing files are
    /// left alone unless `overwrite` is set.
    pub fn write_template(path: &Path, config: &WorkflowConfig, overwrite: bool) -> AppResult<()> {
        if path.exists() && !overwrite {
            return Err(AppError::config(format!(
                "Refusing to overwrite existing configuration '{}'",
                path.display()
            )));
        }
        let content = toml::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Consume the service, returning the configuration
    pub fn into_config(self) -> WorkflowConfig {
        self.config
    }

    /// Path the configuration was loaded from
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_from_file(&self.config_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("genomes")).unwrap();
        let path = dir.path().join("workflow.toml");
        fs::write(
            &path,
            "[input]\ncatalog = \"genomes\"\n\n[run]\noutput_dir = \"results\"\n",
        )
        .unwrap();

        let service = ConfigService::load(&path).unwrap();
        assert_eq!(service.get_config().input.catalog, dir.path().join("genomes"));
        assert_eq!(service.get_config().run.output_dir, dir.path().join("results"));
        assert_eq!(service.config_path(), path.as_path());
    }

    #[test]
    fn test_invalid_config_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("workflow.toml");
        fs::write(&path, "[input]\ncatalog = \"missing\"\n").unwrap();
        let err = ConfigService::load(&path).unwrap_err();
        assert!(err.is_configuration());

        fs::write(&path, "[resources\n").unwrap();
        assert!(ConfigService::load(&path).unwrap_err().is_configuration());

        assert!(ConfigService::load(dir.path().join("absent.toml"))
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_write_template_then_load() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("assemblies")).unwrap();
        let path = dir.path().join("workflow.toml");

        ConfigService::write_template(&path, &WorkflowConfig::default(), false).unwrap();
        assert!(ConfigService::write_template(&path, &WorkflowConfig::default(), false).is_err());

        let mut service = ConfigService::load(&path).unwrap();
        assert_eq!(service.get_config().run.max_chunk_size, 150);
        service.reload().unwrap();
        assert_eq!(service.into_config().clustering.tool.program, "poppunk");
    }
}
