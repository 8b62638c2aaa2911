use std::path::PathBuf;

use anyhow::{bail, Result};

/// `$XDG_CONFIG_HOME/trayd/config.json`, or `~/.config/trayd/config.json`.
pub fn default_config_file() -> Result<PathBuf> {
    config_file_from(std::env::var("XDG_CONFIG_HOME").ok(), std::env::var("HOME").ok())
}

fn config_file_from(xdg_config_home: Option<String>, home: Option<String>) -> Result<PathBuf> {
    let config_dir = match (xdg_config_home, home) {
        (Some(dir), _) if !dir.is_empty() => PathBuf::from(dir),
        (_, Some(home)) if !home.is_empty() => PathBuf::from(home).join(".config"),
        _ => bail!("Neither XDG_CONFIG_HOME nor HOME is set"),
    };
    Ok(config_dir.join("trayd").join("config.json"))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_config_file_location() {
        let some = |s: &str| Some(s.to_string());
        assert_eq!(
            config_file_from(some("/xdg"), some("/home/me")).unwrap(),
            PathBuf::from("/xdg/trayd/config.json")
        );
        assert_eq!(config_file_from(some(""), some("/home/me")).unwrap(), PathBuf::from("/home/me/.config/trayd/config.json"));
        assert!(config_file_from(None, None).is_err());
    }
}
