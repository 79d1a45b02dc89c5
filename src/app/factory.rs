use crate::{
    app::{backend::AppBackend, local::AppLocal, remote::AppRemote},
    config::Config,
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable pointing the CLI at a running daemon
pub const ADDR_ENV: &str = "TRACEBACK_ADDR";
/// Environment variable overriding the base directory
pub const BASE_PATH_ENV: &str = "TRACEBACK_BASE_PATH";

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Backend for CLI commands: the daemon when `TRACEBACK_ADDR` is set,
    /// otherwise an in-process application over the local store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_backend(paths: &AppPaths) -> Result<Arc<dyn AppBackend>> {
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            log::info!("Using remote backend: {}", addr);
            return Ok(Arc::new(AppRemote::new(&addr)));
        }

        Ok(Arc::new(Self::create_local_app(paths)?))
    }

    /// Create a local application instance
    pub fn create_local_app(paths: &AppPaths) -> Result<AppLocal> {
        let config = Config::load_with(&paths.base_path.to_string_lossy())?;
        AppLocal::new(config, paths)
    }

    /// Get application paths, creating the base directory
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var(BASE_PATH_ENV) {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/traceback"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    /// Capture store file name, relative to `base_path`
    pub captures_file: String,
}

impl AppPaths {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            captures_file: "captures.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_paths() {
        let paths = AppPaths::new("/test/base");

        assert_eq!(paths.base_path, PathBuf::from("/test/base"));
        assert_eq!(paths.captures_file, "captures.json");
    }
}
