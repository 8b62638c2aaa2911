use std::{collections::HashMap, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BarPosition {
    #[default]
    Top,
    Bottom,
}

/// Buttons and scroll directions, in the order of their X11 button numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Button {
    Left,
    Middle,
    Right,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
}

/// What clicking a tray icon does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ItemAction {
    None,
    Activate,
    SecondaryActivate,
    ContextMenu,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
}

fn default_bindings() -> HashMap<Button, ItemAction> {
    HashMap::from([
        (Button::Left, ItemAction::Activate),
        (Button::Middle, ItemAction::SecondaryActivate),
        (Button::Right, ItemAction::ContextMenu),
        (Button::ScrollUp, ItemAction::ScrollUp),
        (Button::ScrollDown, ItemAction::ScrollDown),
        (Button::ScrollLeft, ItemAction::ScrollLeft),
        (Button::ScrollRight, ItemAction::ScrollRight),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrayConfig {
    /// Icon theme to look in before falling back to hicolor.
    pub icon_theme: Option<String>,
    /// Extra base directories to look for icons in.
    pub icon_dirs: Vec<PathBuf>,
    /// Padding around icons and menu rows, in logical pixels.
    #[default = 2]
    pub padding: u32,
    pub position: BarPosition,
    /// Buttons that are not bound fall back to the defaults.
    #[default(_code = "default_bindings()")]
    pub bindings: HashMap<Button, ItemAction>,
}

impl TrayConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: TrayConfig = serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        for (button, action) in default_bindings() {
            config.bindings.entry(button).or_insert(action);
        }
        Ok(config)
    }

    /// Read the config at `path`. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn action_for(&self, button: Button) -> ItemAction {
        self.bindings.get(&button).copied().unwrap_or(ItemAction::None)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = TrayConfig::default();
        assert_eq!(config.padding, 2);
        assert_eq!(config.position, BarPosition::Top);
        assert_eq!(config.action_for(Button::Right), ItemAction::ContextMenu);
        assert_eq!(config.action_for(Button::ScrollDown), ItemAction::ScrollDown);
    }

    #[test]
    fn test_from_json_merges_bindings() {
        let config = TrayConfig::from_json(
            r#"{ "icon_theme": "Papirus", "position": "bottom", "bindings": { "left": "context-menu", "middle": "none" } }"#,
        )
        .unwrap();
        assert_eq!(config.icon_theme.as_deref(), Some("Papirus"));
        assert_eq!(config.position, BarPosition::Bottom);
        assert_eq!(config.action_for(Button::Left), ItemAction::ContextMenu);
        assert_eq!(config.action_for(Button::Middle), ItemAction::None);
        assert_eq!(config.action_for(Button::Right), ItemAction::ContextMenu);
    }

    #[test]
    fn test_from_json_rejects_unknown_keys() {
        assert!(matches!(TrayConfig::from_json(r#"{ "paddin": 3 }"#), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = TrayConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(loaded, TrayConfig::default());
    }

    #[test]
    fn test_button_names() {
        assert_eq!("scroll-up".parse::<Button>(), Ok(Button::ScrollUp));
    }
}
