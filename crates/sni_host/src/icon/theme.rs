//! Parsing of freedesktop `index.theme` files.
//!
//! See <https://specifications.freedesktop.org/icon-theme-spec/latest/>.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThemeError {
    #[error("line {0}: expected a [group] or key=value")]
    Syntax(usize),
    #[error("no [Icon Theme] group")]
    MissingIconThemeGroup,
    #[error("directory {dir:?}: invalid {key} {value:?}")]
    InvalidValue { dir: String, key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString)]
pub enum SubdirKind {
    Fixed,
    Scalable,
    #[default]
    Threshold,
}

/// One entry of the `Directories` key, with its settings from its own group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSubdir {
    pub name: String,
    /// Nominal size. Zero when the group does not declare one.
    pub size: i32,
    pub min_size: i32,
    pub max_size: i32,
    pub kind: SubdirKind,
}

impl ThemeSubdir {
    fn new(name: &str, group: Option<&[(String, String)]>) -> Result<Self, ThemeError> {
        let get = |key: &'static str| -> Result<Option<i32>, ThemeError> {
            match group.and_then(|entries| entries.iter().find(|(k, _)| k == key)) {
                Some((_, value)) => value.parse().map(Some).map_err(|_| ThemeError::InvalidValue {
                    dir: name.to_owned(),
                    key,
                    value: value.clone(),
                }),
                None => Ok(None),
            }
        };
        let kind = match group.and_then(|entries| entries.iter().find(|(k, _)| k == "Type")) {
            Some((_, value)) => value.parse().map_err(|_| ThemeError::InvalidValue {
                dir: name.to_owned(),
                key: "Type",
                value: value.clone(),
            })?,
            None => SubdirKind::default(),
        };

        let size = get("Size")?.unwrap_or(0);
        let (min_size, max_size) = match kind {
            SubdirKind::Fixed => (size, size),
            SubdirKind::Scalable => (get("MinSize")?.unwrap_or(size), get("MaxSize")?.unwrap_or(size)),
            SubdirKind::Threshold => {
                let threshold = get("Threshold")?.unwrap_or(2);
                (size - threshold, size + threshold)
            }
        };
        Ok(ThemeSubdir { name: name.to_owned(), size, min_size, max_size, kind })
    }

    /// How far this directory is from `target`, zero meaning it is a perfect fit.
    pub fn distance(&self, target: i32) -> i32 {
        if self.kind != SubdirKind::Fixed && self.min_size <= target && target <= self.max_size {
            0
        } else {
            (target - self.size).abs()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeIndex {
    pub name: Option<String>,
    pub comment: Option<String>,
    pub inherits: Vec<String>,
    pub subdirs: Vec<ThemeSubdir>,
}

type Group = (String, Vec<(String, String)>);

fn parse_groups(text: &str) -> Result<Vec<Group>, ThemeError> {
    let mut groups: Vec<Group> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            groups.push((name.trim().to_owned(), Vec::new()));
        } else if let (Some((key, value)), Some((_, entries))) = (line.split_once('='), groups.last_mut()) {
            entries.push((key.trim().to_owned(), value.trim().to_owned()));
        } else {
            return Err(ThemeError::Syntax(idx + 1));
        }
    }
    Ok(groups)
}

fn split_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

impl ThemeIndex {
    pub fn parse(text: &str) -> Result<Self, ThemeError> {
        let groups = parse_groups(text)?;
        let (_, theme) = groups.iter().find(|(name, _)| name == "Icon Theme").ok_or(ThemeError::MissingIconThemeGroup)?;
        let value = |key: &str| theme.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

        let subdirs = split_list(value("Directories").unwrap_or_default())
            .iter()
            .map(|dir| {
                let group = groups.iter().find(|(name, _)| name == dir).map(|(_, entries)| entries.as_slice());
                ThemeSubdir::new(dir, group)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ThemeIndex {
            name: value("Name").map(str::to_owned),
            comment: value("Comment").map(str::to_owned),
            inherits: split_list(value("Inherits").unwrap_or_default()),
            subdirs,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_index() {
        let index = ThemeIndex::parse(
            "# comment\n[Icon Theme]\nName=Test\nComment=A theme\nInherits=Adwaita, hicolor\nDirectories=16x16/apps,scalable/apps,22x22/apps,48x48/apps\n\n[16x16/apps]\nSize=16\nType=Fixed\n\n[scalable/apps]\nSize=48\nMinSize=8\nMaxSize=512\nType=Scalable\n\n[22x22/apps]\nSize=22\n",
        )
        .unwrap();

        assert_eq!(index.name.as_deref(), Some("Test"));
        assert_eq!(index.comment.as_deref(), Some("A theme"));
        assert_eq!(index.inherits, vec!["Adwaita".to_string(), "hicolor".to_string()]);
        assert_eq!(
            index.subdirs,
            vec![
                ThemeSubdir { name: "16x16/apps".into(), size: 16, min_size: 16, max_size: 16, kind: SubdirKind::Fixed },
                ThemeSubdir {
                    name: "scalable/apps".into(),
                    size: 48,
                    min_size: 8,
                    max_size: 512,
                    kind: SubdirKind::Scalable
                },
                ThemeSubdir {
                    name: "22x22/apps".into(),
                    size: 22,
                    min_size: 20,
                    max_size: 24,
                    kind: SubdirKind::Threshold
                },
                ThemeSubdir { name: "48x48/apps".into(), size: 0, min_size: -2, max_size: 2, kind: SubdirKind::Threshold },
            ]
        );
    }

    #[test]
    fn test_distance() {
        let fixed = ThemeSubdir { name: "22".into(), size: 22, min_size: 22, max_size: 22, kind: SubdirKind::Fixed };
        assert_eq!(fixed.distance(24), 2);
        assert_eq!(fixed.distance(22), 0);
        let scalable = ThemeSubdir { name: "s".into(), size: 48, min_size: 8, max_size: 512, kind: SubdirKind::Scalable };
        assert_eq!(scalable.distance(24), 0);
        assert_eq!(scalable.distance(600), 552);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ThemeIndex::parse("[Other]\nName=x\n"), Err(ThemeError::MissingIconThemeGroup));
        assert_eq!(ThemeIndex::parse("[Icon Theme]\njunk\n"), Err(ThemeError::Syntax(2)));
        assert!(matches!(
            ThemeIndex::parse("[Icon Theme]\nDirectories=a\n[a]\nSize=big\n"),
            Err(ThemeError::InvalidValue { key: "Size", .. })
        ));
    }
}
