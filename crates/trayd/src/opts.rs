use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq, Eq)]
pub struct Opt {
    pub log_debug: bool,
    pub config_path: Option<PathBuf>,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(author = "ElKowar", version, about)]
struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// override path to the configuration file (defaults to $XDG_CONFIG_HOME/trayd/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Action {
    /// Run the StatusNotifierWatcher and host, and log item changes until interrupted.
    #[command(name = "daemon", alias = "d")]
    Daemon,

    /// Print the registered items with their status, icon and title.
    #[command(name = "list", alias = "ls")]
    List,

    /// Fetch and print the menu of an item.
    #[command(name = "menu", alias = "m")]
    Menu {
        /// Id of the item, as printed by `trayd list`.
        item: String,
    },

    /// Click an entry in the menu of an item.
    #[command(name = "click")]
    Click {
        /// Id of the item, as printed by `trayd list`.
        item: String,

        /// Id of the menu entry, as printed by `trayd menu`.
        id: i32,
    },
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { action, log_debug, config } = other;
        Opt { action, log_debug, config_path: config }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Opt {
        RawOpt::try_parse_from(args).unwrap().into()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        assert_eq!(
            parse(&["trayd", "click", ":1.5/StatusNotifierItem", "3", "--debug", "-c", "/tmp/tray.json"]),
            Opt {
                log_debug: true,
                config_path: Some(PathBuf::from("/tmp/tray.json")),
                action: Action::Click { item: ":1.5/StatusNotifierItem".to_string(), id: 3 },
            }
        );
    }

    #[test]
    fn test_aliases() {
        assert_eq!(parse(&["trayd", "d"]).action, Action::Daemon);
        assert_eq!(parse(&["trayd", "ls"]).action, Action::List);
        assert_eq!(parse(&["trayd", "m", "org.example.App"]).action, Action::Menu { item: "org.example.App".to_string() });
    }

    #[test]
    fn test_click_needs_a_numeric_id() {
        assert!(RawOpt::try_parse_from(["trayd", "click", "org.example.App", "quit"]).is_err());
    }
}
