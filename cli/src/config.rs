use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "mealprep").context("Could not determine home directory")?;
        Self::from_data_dir(proj_dirs.data_dir())
    }

    pub fn from_data_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        Ok(Config {
            db_path: data_dir.join("mealprep.db"),
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Load the API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)`.
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        Ok((key, true))
    }
}
