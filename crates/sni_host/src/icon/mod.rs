//! Locating icon files on disk, following the freedesktop icon theme rules.

use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
};

use itertools::Itertools;

mod theme;
pub use theme::*;

/// Image formats a renderer is expected to handle.
pub const EXTENSIONS: &[&str] = &["png", "svg", "xpm"];

pub const FALLBACK_THEME: &str = "hicolor";

/// Size range given to icons found outside any theme.
const UNTHEMED_MIN_SIZE: i32 = 1;
const UNTHEMED_MAX_SIZE: i32 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconTheme {
    /// Name of the theme's directory, which is what `Inherits` refers to.
    pub id: String,
    pub dir: PathBuf,
    pub index: ThemeIndex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconMatch {
    pub path: PathBuf,
    pub min_size: i32,
    pub max_size: i32,
}

/// The standard icon base directories that exist on this system, most specific first.
pub fn default_basedirs() -> Vec<PathBuf> {
    let env_dir = |key: &str| std::env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from);
    let home = env_dir("HOME");

    let mut dirs = Vec::new();
    if let Some(home) = &home {
        dirs.push(home.join(".icons"));
    }
    match (env_dir("XDG_DATA_HOME"), &home) {
        (Some(data_home), _) => dirs.push(data_home.join("icons")),
        (None, Some(home)) => dirs.push(home.join(".local/share/icons")),
        (None, None) => {}
    }
    let data_dirs = std::env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "/usr/local/share:/usr/share".to_owned());
    dirs.extend(data_dirs.split(':').filter(|d| !d.is_empty()).map(|d| Path::new(d).join("icons")));
    dirs.push(PathBuf::from("/usr/share/pixmaps"));

    dirs.into_iter().unique().filter(|dir| dir.is_dir()).collect()
}

/// Read every theme found directly below the given base directories.
pub fn load_themes(basedirs: &[PathBuf]) -> Vec<IconTheme> {
    let mut themes = Vec::new();
    for basedir in basedirs {
        let entries = match std::fs::read_dir(basedir) {
            Ok(entries) => entries,
            Err(e) => {
                log::debug!("skipping icon dir {}: {}", basedir.display(), e);
                continue;
            }
        };
        let dirs = entries.filter_map(|entry| entry.ok()).map(|entry| entry.path()).filter(|p| p.is_dir()).sorted();
        for dir in dirs {
            let index_path = dir.join("index.theme");
            let text = match std::fs::read_to_string(&index_path) {
                Ok(text) => text,
                Err(_) => continue,
            };
            match ThemeIndex::parse(&text) {
                Ok(index) => {
                    let id = dir.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
                    themes.push(IconTheme { id, dir, index });
                }
                Err(e) => log::warn!("could not parse icon theme {}: {}", index_path.display(), e),
            }
        }
    }
    themes
}

#[derive(Default)]
struct BestMatch {
    sized: Option<(i32, IconMatch)>,
    fallback: Option<IconMatch>,
}

impl BestMatch {
    fn offer(&mut self, path: PathBuf, subdir: &ThemeSubdir, target: i32) {
        let candidate = IconMatch { path, min_size: subdir.min_size, max_size: subdir.max_size };
        if subdir.size == 0 {
            self.fallback.get_or_insert(candidate);
            return;
        }
        let distance = subdir.distance(target);
        if self.sized.as_ref().map_or(true, |(best, _)| distance < *best) {
            self.sized = Some((distance, candidate));
        }
    }

    fn offer_unthemed(&mut self, path: PathBuf) {
        self.fallback.get_or_insert(IconMatch { path, min_size: UNTHEMED_MIN_SIZE, max_size: UNTHEMED_MAX_SIZE });
    }

    fn is_exact(&self) -> bool {
        matches!(self.sized, Some((0, _)))
    }

    fn finish(self) -> Option<IconMatch> {
        self.sized.map(|(_, found)| found).or(self.fallback)
    }
}

fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    EXTENSIONS.iter().map(|ext| dir.join(format!("{}.{}", name, ext))).find(|path| path.is_file())
}

/// Icon lookup over a fixed set of base directories.
#[derive(Debug, Clone, Default)]
pub struct IconResolver {
    basedirs: Vec<PathBuf>,
    themes: Vec<IconTheme>,
    /// Themes below app-provided directories, keyed by the directory list they were read from.
    extra_themes: RefCell<HashMap<Vec<PathBuf>, Rc<[IconTheme]>>>,
}

impl IconResolver {
    pub fn new(basedirs: Vec<PathBuf>) -> Self {
        let themes = load_themes(&basedirs);
        log::debug!("found {} icon themes in {} base directories", themes.len(), basedirs.len());
        IconResolver { basedirs, themes, extra_themes: RefCell::default() }
    }

    /// Use the standard base directories, followed by `extra`.
    pub fn from_env(extra: &[PathBuf]) -> Self {
        let mut basedirs = default_basedirs();
        basedirs.extend(extra.iter().cloned());
        Self::new(basedirs)
    }

    pub fn themes(&self) -> &[IconTheme] {
        &self.themes
    }

    fn themes_below(&self, extra_dirs: &[PathBuf]) -> Rc<[IconTheme]> {
        if extra_dirs.is_empty() {
            return Rc::from(Vec::new());
        }
        let mut cache = self.extra_themes.borrow_mut();
        if let Some(themes) = cache.get(extra_dirs) {
            return themes.clone();
        }
        let themes: Rc<[IconTheme]> = load_themes(extra_dirs).into();
        cache.insert(extra_dirs.to_vec(), themes.clone());
        themes
    }

    /// Find the file for `name` closest to `size`.
    ///
    /// Searches `theme`, everything it inherits from and then hicolor, followed by the themes
    /// and loose files in `extra_dirs` and the base directories. Within that order the closest
    /// size wins, and the first match found wins a tie. Matches from directories without a
    /// declared size are only used when nothing sized matches.
    pub fn find_icon(&self, theme: Option<&str>, extra_dirs: &[PathBuf], name: &str, size: i32) -> Option<IconMatch> {
        if name.is_empty() {
            return None;
        }
        let extra_themes = self.themes_below(extra_dirs);
        let all_themes: Vec<&IconTheme> = self.themes.iter().chain(extra_themes.iter()).collect();

        let mut order: Vec<&str> = Vec::new();
        if let Some(theme) = theme {
            inheritance_chain(theme, &all_themes, &mut order);
        }
        inheritance_chain(FALLBACK_THEME, &all_themes, &mut order);
        for theme in extra_themes.iter() {
            inheritance_chain(&theme.id, &all_themes, &mut order);
        }

        let mut best = BestMatch::default();
        'themes: for theme_id in order {
            for theme in all_themes.iter().filter(|theme| theme.id == theme_id) {
                for subdir in &theme.index.subdirs {
                    if let Some(path) = find_file(&theme.dir.join(&subdir.name), name) {
                        best.offer(path, subdir, size);
                        if best.is_exact() {
                            break 'themes;
                        }
                    }
                }
            }
        }

        if best.sized.is_none() {
            for dir in extra_dirs.iter().chain(self.basedirs.iter()) {
                if let Some(path) = find_file(dir, name) {
                    best.offer_unthemed(path);
                }
            }
        }
        best.finish()
    }
}

fn inheritance_chain<'a>(theme: &'a str, themes: &[&'a IconTheme], order: &mut Vec<&'a str>) {
    if order.contains(&theme) {
        return;
    }
    order.push(theme);
    for found in themes.iter().filter(|found| found.id == theme) {
        for parent in &found.index.inherits {
            inheritance_chain(parent, themes, order);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn hicolor_index(base: &Path) {
        write(
            &base.join("hicolor/index.theme"),
            "[Icon Theme]\nName=Hicolor\nDirectories=16x16/apps,22x22/apps,32x32/apps\n\n[16x16/apps]\nSize=16\nType=Fixed\n\n[22x22/apps]\nSize=22\nType=Fixed\n\n[32x32/apps]\nSize=32\nType=Fixed\n",
        );
    }

    #[test]
    fn test_find_icon_closest_size() {
        let base = tempfile::tempdir().unwrap();
        write(
            &base.path().join("Test/index.theme"),
            "[Icon Theme]\nName=Test\nInherits=hicolor\nDirectories=22x22/apps\n\n[22x22/apps]\nSize=22\n",
        );
        write(&base.path().join("Test/22x22/apps/foo.png"), "");
        hicolor_index(base.path());

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);

        let found = resolver.find_icon(Some("Test"), &[], "foo", 24).unwrap();
        assert_eq!(found.path, base.path().join("Test/22x22/apps/foo.png"));
        assert_eq!((found.min_size, found.max_size), (20, 24));
        assert_eq!(resolver.find_icon(Some("Test"), &[], "bar", 24), None);
    }

    #[test]
    fn test_find_icon_prefers_smaller_difference_across_themes() {
        let base = tempfile::tempdir().unwrap();
        write(
            &base.path().join("Test/index.theme"),
            "[Icon Theme]\nInherits=hicolor\nDirectories=16x16/apps\n[16x16/apps]\nSize=16\nType=Fixed\n",
        );
        write(&base.path().join("Test/16x16/apps/foo.png"), "");
        hicolor_index(base.path());
        write(&base.path().join("hicolor/32x32/apps/foo.svg"), "");
        write(&base.path().join("hicolor/22x22/apps/foo.png"), "");

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);

        let found = resolver.find_icon(Some("Test"), &[], "foo", 24).unwrap();
        assert_eq!(found.path, base.path().join("hicolor/22x22/apps/foo.png"));
        let found = resolver.find_icon(Some("Test"), &[], "foo", 16).unwrap();
        assert_eq!(found.path, base.path().join("Test/16x16/apps/foo.png"));
    }

    #[test]
    fn test_find_icon_ties_go_to_first_searched() {
        let base = tempfile::tempdir().unwrap();
        write(
            &base.path().join("Test/index.theme"),
            "[Icon Theme]\nInherits=hicolor\nDirectories=22x22/apps\n[22x22/apps]\nSize=22\nType=Fixed\n",
        );
        write(&base.path().join("Test/22x22/apps/foo.png"), "");
        hicolor_index(base.path());
        write(&base.path().join("hicolor/22x22/apps/foo.png"), "");

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);
        let found = resolver.find_icon(Some("Test"), &[], "foo", 24).unwrap();
        assert_eq!(found.path, base.path().join("Test/22x22/apps/foo.png"));
    }

    #[test]
    fn test_find_icon_sized_beats_unsized() {
        let base = tempfile::tempdir().unwrap();
        write(
            &base.path().join("hicolor/index.theme"),
            "[Icon Theme]\nDirectories=misc,64x64/apps\n[64x64/apps]\nSize=64\nType=Fixed\n",
        );
        write(&base.path().join("hicolor/misc/foo.png"), "");
        write(&base.path().join("hicolor/64x64/apps/foo.png"), "");
        write(&base.path().join("hicolor/misc/baz.png"), "");

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);
        let found = resolver.find_icon(None, &[], "foo", 16).unwrap();
        assert_eq!(found.path, base.path().join("hicolor/64x64/apps/foo.png"));
        let found = resolver.find_icon(None, &[], "baz", 16).unwrap();
        assert_eq!(found.path, base.path().join("hicolor/misc/baz.png"));
    }

    #[test]
    fn test_find_icon_survives_inheritance_cycles() {
        let base = tempfile::tempdir().unwrap();
        write(&base.path().join("A/index.theme"), "[Icon Theme]\nInherits=B\nDirectories=\n");
        write(&base.path().join("B/index.theme"), "[Icon Theme]\nInherits=A\nDirectories=apps\n[apps]\nSize=24\n");
        write(&base.path().join("B/apps/foo.png"), "");

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);
        let found = resolver.find_icon(Some("A"), &[], "foo", 24).unwrap();
        assert_eq!(found.path, base.path().join("B/apps/foo.png"));
    }

    #[test]
    fn test_find_icon_in_extra_dirs() {
        let base = tempfile::tempdir().unwrap();
        let app = tempfile::tempdir().unwrap();
        hicolor_index(base.path());
        write(&app.path().join("loose.png"), "");
        write(&base.path().join("pixmap.xpm"), "");

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);
        let extra = vec![app.path().to_path_buf()];

        let found = resolver.find_icon(None, &extra, "loose", 24).unwrap();
        assert_eq!(found, IconMatch { path: app.path().join("loose.png"), min_size: 1, max_size: 512 });
        let found = resolver.find_icon(None, &[], "pixmap", 24).unwrap();
        assert_eq!(found.path, base.path().join("pixmap.xpm"));
        assert_eq!(resolver.find_icon(None, &[], "loose", 24), None);
    }

    #[test]
    fn test_extra_themes_are_read_once() {
        let base = tempfile::tempdir().unwrap();
        let app = tempfile::tempdir().unwrap();
        write(&app.path().join("AppTheme/index.theme"), "[Icon Theme]\nDirectories=apps\n[apps]\nSize=24\n");
        write(&app.path().join("AppTheme/apps/foo.png"), "");

        let resolver = IconResolver::new(vec![base.path().to_path_buf()]);
        let extra = vec![app.path().to_path_buf()];
        assert_eq!(resolver.find_icon(None, &extra, "foo", 24).unwrap().path, app.path().join("AppTheme/apps/foo.png"));

        std::fs::remove_file(app.path().join("AppTheme/index.theme")).unwrap();
        assert_eq!(resolver.find_icon(None, &extra, "foo", 24).unwrap().path, app.path().join("AppTheme/apps/foo.png"));
    }

    #[test]
    fn test_no_themes_means_not_found() {
        let resolver = IconResolver::new(vec![]);
        assert_eq!(resolver.find_icon(Some("Adwaita"), &[], "foo", 24), None);
    }
}
