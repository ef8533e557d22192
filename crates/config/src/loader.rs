use std::path::Path;

use anyhow::Context;

use crate::Config;

/// Load and parse the TOML configuration from disk.
pub(crate) fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read configuration from {}", path.display()))?;

    let config: Config =
        toml::from_str(&contents).with_context(|| format!("Failed to parse configuration from {}", path.display()))?;

    log::debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_error() {
        let result = load("/nonexistent/petal.toml");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = std::env::temp_dir();
        let path = dir.join("petal-loader-test-invalid.toml");
        std::fs::write(&path, "server = not toml").unwrap();

        let result = load(&path);
        assert!(result.is_err());

        std::fs::remove_file(&path).ok();
    }
}
