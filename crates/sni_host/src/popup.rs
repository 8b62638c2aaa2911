//! On-screen popups for open menu levels.
//!
//! At most one chain of popups exists at a time. Level 0 shows the root menu of one tray item,
//! and every further level shows the submenu opened from a row of the level before it.

use std::path::PathBuf;

use crate::{
    config::BarPosition,
    error::SurfaceError,
    input::{Hotspot, OutputId, Rect, SurfaceId},
    menu::{IconSource, MenuItem, MenuTree, PngImage, ToggleType},
};

/// Measures label text, in logical pixels.
pub trait TextMeasure {
    fn measure(&self, text: &str) -> (i32, i32);
}

/// The windowing layer popups are created on.
pub trait Windowing {
    fn create_popup(&mut self, request: &PopupRequest) -> Result<SurfaceId, SurfaceError>;
    fn draw(&mut self, surface: SurfaceId, frame: &MenuFrame) -> Result<(), SurfaceError>;
    fn destroy_popup(&mut self, surface: SurfaceId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Where and how big a popup should be. Everything is in logical pixels, relative to the parent
/// popup, or to the bar surface of `output` when there is no parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupRequest {
    pub output: OutputId,
    pub parent: Option<SurfaceId>,
    pub anchor: Rect,
    pub anchor_corner: Corner,
    pub gravity: Corner,
    pub width: i32,
    pub height: i32,
}

/// Finds the file for a named menu icon at a size in buffer pixels.
pub type IconLookup<'a> = &'a dyn Fn(&str, i32) -> Option<PathBuf>;

/// The icon drawn in a row's indicator column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EntryIcon {
    #[default]
    None,
    File(PathBuf),
    Png(PngImage),
}

impl EntryIcon {
    fn resolve(item: &MenuItem, size: i32, lookup: IconLookup<'_>) -> Self {
        match &item.icon {
            IconSource::None => EntryIcon::None,
            IconSource::Pixmap(image) => EntryIcon::Png(image.clone()),
            IconSource::Name(name) => match lookup(name.as_str(), size) {
                Some(path) => EntryIcon::File(path),
                None => {
                    log::debug!("no icon named {:?} for menu item {}", name, item.id);
                    EntryIcon::None
                }
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    Separator,
    Entry { label: String, enabled: bool, toggle: ToggleType, checked: bool, icon: EntryIcon, submenu: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuRow {
    pub id: i32,
    pub rect: Rect,
    pub kind: RowKind,
}

impl MenuRow {
    pub fn is_interactive(&self) -> bool {
        matches!(self.kind, RowKind::Entry { enabled: true, .. })
    }
}

/// Everything needed to draw one menu level, in buffer pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuFrame {
    pub menu: i32,
    pub width: i32,
    pub height: i32,
    pub scale: i32,
    pub padding: i32,
    /// Width of the toggle and icon column on the left, zero if no row needs it.
    pub indicator_width: i32,
    /// Width of the submenu arrow column on the right, zero if no row needs it.
    pub arrow_width: i32,
    pub rows: Vec<MenuRow>,
    pub hovered: Option<i32>,
}

impl MenuFrame {
    pub fn hotspots(&self) -> Vec<Hotspot<i32>> {
        self.rows.iter().filter(|row| row.is_interactive()).map(|row| Hotspot { rect: row.rect, target: row.id }).collect()
    }

    pub fn row(&self, id: i32) -> Option<&MenuRow> {
        self.rows.iter().find(|row| row.id == id)
    }
}

/// Lay out the children of `menu`. Returns `None` if there is nothing visible to show. Named icons
/// are looked up at the text height.
pub fn layout_menu(
    tree: &MenuTree,
    menu: i32,
    measure: &dyn TextMeasure,
    icons: IconLookup<'_>,
    padding: i32,
    scale: i32,
) -> Option<MenuFrame> {
    let scale = scale.max(1);
    let visible: Vec<_> = tree.children(menu).filter(|item| item.visible).collect();
    if visible.is_empty() {
        return None;
    }

    let sizes: Vec<(i32, i32)> =
        visible.iter().map(|item| if item.is_separator { (0, 0) } else { measure.measure(&item.label) }).collect();
    let text_height = sizes.iter().map(|(_, h)| *h).max().unwrap_or(0);
    let column = (text_height + 2 * padding) * scale;
    let entry_icons: Vec<EntryIcon> = visible
        .iter()
        .map(|item| if item.is_separator { EntryIcon::None } else { EntryIcon::resolve(item, text_height * scale, icons) })
        .collect();
    let indicator_width = if visible
        .iter()
        .zip(&entry_icons)
        .any(|(item, icon)| !item.is_separator && (item.toggle_type != ToggleType::None || *icon != EntryIcon::None))
    {
        column
    } else {
        0
    };
    let arrow_width = if visible.iter().any(|item| !item.is_separator && item.is_submenu()) { column } else { 0 };

    let width = sizes
        .iter()
        .map(|(text_width, _)| indicator_width + 2 * padding * scale + text_width * scale + arrow_width)
        .max()
        .unwrap_or(0);

    let mut y = 0;
    let mut rows = Vec::with_capacity(visible.len());
    for ((item, (_, text)), icon) in visible.iter().zip(&sizes).zip(entry_icons) {
        let (height, kind) = if item.is_separator {
            (scale, RowKind::Separator)
        } else {
            let kind = RowKind::Entry {
                label: item.label.clone(),
                enabled: item.enabled,
                toggle: item.toggle_type,
                checked: item.toggle_state == 1,
                icon,
                submenu: item.is_submenu(),
            };
            ((text + 2 * padding) * scale, kind)
        };
        rows.push(MenuRow { id: item.id, rect: Rect::new(0, y, width, height), kind });
        y += height;
    }

    Some(MenuFrame { menu, width, height: y, scale, padding, indicator_width, arrow_width, rows, hovered: None })
}

/// Placement of the root popup, below a top bar or above a bottom one.
pub fn root_request(output: OutputId, anchor: Rect, frame: &MenuFrame, position: BarPosition) -> PopupRequest {
    let (anchor_corner, gravity) = match position {
        BarPosition::Top => (Corner::BottomLeft, Corner::BottomRight),
        BarPosition::Bottom => (Corner::TopLeft, Corner::TopRight),
    };
    PopupRequest {
        output,
        parent: None,
        anchor: anchor.unscaled(frame.scale),
        anchor_corner,
        gravity,
        width: frame.width / frame.scale,
        height: frame.height / frame.scale,
    }
}

/// Placement of a submenu, to the right of the row it was opened from.
pub fn submenu_request(parent: &PopupNode, row: &MenuRow, frame: &MenuFrame, position: BarPosition) -> PopupRequest {
    let (anchor_corner, gravity) = match position {
        BarPosition::Top => (Corner::TopRight, Corner::BottomRight),
        BarPosition::Bottom => (Corner::BottomRight, Corner::TopRight),
    };
    PopupRequest {
        output: parent.output,
        parent: Some(parent.surface),
        anchor: row.rect.unscaled(parent.frame.scale),
        anchor_corner,
        gravity,
        width: frame.width / frame.scale,
        height: frame.height / frame.scale,
    }
}

/// One displayed menu level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupNode {
    pub menu: i32,
    pub surface: SurfaceId,
    pub output: OutputId,
    pub frame: MenuFrame,
}

/// The open popups of one tray item, root first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupChain {
    pub item: String,
    pub nodes: Vec<PopupNode>,
}

#[derive(Debug, Default)]
pub struct Popups {
    chain: Option<PopupChain>,
}

impl Popups {
    pub fn chain(&self) -> Option<&PopupChain> {
        self.chain.as_ref()
    }

    pub fn item(&self) -> Option<&str> {
        self.chain.as_ref().map(|chain| chain.item.as_str())
    }

    pub fn depth(&self) -> usize {
        self.chain.as_ref().map_or(0, |chain| chain.nodes.len())
    }

    pub fn level_of(&self, surface: SurfaceId) -> Option<usize> {
        self.chain.as_ref()?.nodes.iter().position(|node| node.surface == surface)
    }

    pub fn node(&self, level: usize) -> Option<&PopupNode> {
        self.chain.as_ref()?.nodes.get(level)
    }

    pub fn node_mut(&mut self, level: usize) -> Option<&mut PopupNode> {
        self.chain.as_mut()?.nodes.get_mut(level)
    }

    pub fn nodes(&self) -> &[PopupNode] {
        self.chain.as_ref().map_or(&[], |chain| chain.nodes.as_slice())
    }

    /// Start a new chain. Any previous chain must have been closed already.
    pub fn open_root(&mut self, item: &str, node: PopupNode) {
        debug_assert!(self.chain.is_none());
        self.chain = Some(PopupChain { item: item.to_owned(), nodes: vec![node] });
    }

    /// Add a level below the current deepest one.
    pub fn push(&mut self, node: PopupNode) {
        if let Some(chain) = &mut self.chain {
            chain.nodes.push(node);
        }
    }

    /// Destroy the popups at `level` and below, deepest first. Returns the closed levels in the
    /// order they were destroyed.
    pub fn close_from(&mut self, level: usize, windowing: &mut dyn Windowing) -> Vec<PopupNode> {
        let chain = match &mut self.chain {
            Some(chain) => chain,
            None => return Vec::new(),
        };
        let mut closed = Vec::new();
        while chain.nodes.len() > level {
            if let Some(node) = chain.nodes.pop() {
                windowing.destroy_popup(node.surface);
                closed.push(node);
            }
        }
        if chain.nodes.is_empty() {
            self.chain = None;
        }
        closed
    }

    pub fn close_all(&mut self, windowing: &mut dyn Windowing) -> Vec<PopupNode> {
        self.close_from(0, windowing)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::menu::{LayoutNode, MenuValue, PropertyMap};
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    /// Every character is 6 wide, text is 10 high.
    struct FixedMeasure;

    impl TextMeasure for FixedMeasure {
        fn measure(&self, text: &str) -> (i32, i32) {
            (6 * text.chars().count() as i32, 10)
        }
    }

    #[derive(Default)]
    struct Recorder {
        destroyed: Vec<SurfaceId>,
    }

    impl Windowing for Recorder {
        fn create_popup(&mut self, _request: &PopupRequest) -> Result<SurfaceId, SurfaceError> {
            Ok(SurfaceId(0))
        }

        fn draw(&mut self, _surface: SurfaceId, _frame: &MenuFrame) -> Result<(), SurfaceError> {
            Ok(())
        }

        fn destroy_popup(&mut self, surface: SurfaceId) {
            self.destroyed.push(surface);
        }
    }

    fn no_icons(_name: &str, _size: i32) -> Option<PathBuf> {
        None
    }

    fn entry(id: i32, properties: PropertyMap) -> LayoutNode {
        LayoutNode::new(id, properties, vec![])
    }

    fn tree() -> MenuTree {
        MenuTree::from_layout(
            1,
            LayoutNode::new(
                0,
                PropertyMap::new(),
                vec![
                    entry(1, hashmap! { "label".to_string() => MenuValue::Str("Open".to_string()) }),
                    entry(2, hashmap! { "type".to_string() => MenuValue::Str("separator".to_string()) }),
                    entry(
                        3,
                        hashmap! {
                            "label".to_string() => MenuValue::Str("Disabled".to_string()),
                            "enabled".to_string() => MenuValue::Bool(false),
                        },
                    ),
                    entry(4, hashmap! { "visible".to_string() => MenuValue::Bool(false) }),
                    LayoutNode::new(
                        5,
                        hashmap! {
                            "label".to_string() => MenuValue::Str("More".to_string()),
                            "children-display".to_string() => MenuValue::Str("submenu".to_string()),
                        },
                        vec![entry(6, hashmap! { "label".to_string() => MenuValue::Str("x".to_string()) })],
                    ),
                ],
            ),
        )
    }

    fn node(menu: i32, surface: u64) -> PopupNode {
        let frame = layout_menu(&tree(), 0, &FixedMeasure, &no_icons, 2, 1).unwrap();
        PopupNode { menu, surface: SurfaceId(surface), output: OutputId(0), frame }
    }

    #[test]
    fn test_layout_metrics() {
        let frame = layout_menu(&tree(), 0, &FixedMeasure, &no_icons, 2, 2).unwrap();
        // 10 high text plus 2 padding on each side, doubled for scale 2
        let row = 28;
        assert_eq!(frame.indicator_width, 0);
        assert_eq!(frame.arrow_width, row);
        // "Disabled" is the widest label: 2 * (2 + 48 + 2) + arrow column
        assert_eq!(frame.width, 104 + row);
        assert_eq!(
            frame.rows.iter().map(|row| (row.id, row.rect)).collect::<Vec<_>>(),
            vec![
                (1, Rect::new(0, 0, 132, row)),
                (2, Rect::new(0, row, 132, 2)),
                (3, Rect::new(0, row + 2, 132, row)),
                (5, Rect::new(0, 2 * row + 2, 132, row)),
            ]
        );
        assert_eq!(frame.height, 3 * row + 2);
    }

    #[test]
    fn test_only_enabled_entries_get_hotspots() {
        let frame = layout_menu(&tree(), 0, &FixedMeasure, &no_icons, 2, 1).unwrap();
        let targets: Vec<i32> = frame.hotspots().into_iter().map(|spot| spot.target).collect();
        assert_eq!(targets, vec![1, 5]);
    }

    #[test]
    fn test_empty_menu_has_no_frame() {
        assert_eq!(layout_menu(&tree(), 6, &FixedMeasure, &no_icons, 2, 1), None);
        assert_eq!(layout_menu(&tree(), 42, &FixedMeasure, &no_icons, 2, 1), None);
    }

    #[test]
    fn test_indicator_column_for_toggles() {
        let tree = MenuTree::from_layout(
            1,
            LayoutNode::new(
                0,
                PropertyMap::new(),
                vec![entry(
                    1,
                    hashmap! {
                        "label".to_string() => MenuValue::Str("ab".to_string()),
                        "toggle-type".to_string() => MenuValue::Str("checkmark".to_string()),
                        "toggle-state".to_string() => MenuValue::Int(1),
                    },
                )],
            ),
        );
        let frame = layout_menu(&tree, 0, &FixedMeasure, &no_icons, 1, 1).unwrap();
        assert_eq!(frame.indicator_width, 12);
        assert_eq!(frame.width, 12 + 2 + 12);
        assert!(matches!(frame.rows[0].kind, RowKind::Entry { checked: true, toggle: ToggleType::Checkmark, .. }));
    }

    #[test]
    fn test_named_icons_are_looked_up() {
        let tree = MenuTree::from_layout(
            1,
            LayoutNode::new(
                0,
                PropertyMap::new(),
                vec![
                    entry(
                        1,
                        hashmap! {
                            "label".to_string() => MenuValue::Str("Open".to_string()),
                            "icon-name".to_string() => MenuValue::Str("document-open".to_string()),
                        },
                    ),
                    entry(
                        2,
                        hashmap! {
                            "label".to_string() => MenuValue::Str("Gone".to_string()),
                            "icon-name".to_string() => MenuValue::Str("missing".to_string()),
                        },
                    ),
                ],
            ),
        );
        let lookup = |name: &str, size: i32| {
            assert_eq!(size, 20);
            (name == "document-open").then(|| PathBuf::from("/icons/document-open.png"))
        };
        let frame = layout_menu(&tree, 0, &FixedMeasure, &lookup, 1, 2).unwrap();
        let icons: Vec<&EntryIcon> = frame
            .rows
            .iter()
            .filter_map(|row| match &row.kind {
                RowKind::Entry { icon, .. } => Some(icon),
                RowKind::Separator => None,
            })
            .collect();
        assert_eq!(icons, vec![&EntryIcon::File(PathBuf::from("/icons/document-open.png")), &EntryIcon::None]);
        assert_eq!(frame.indicator_width, 24);
    }

    #[test]
    fn test_requests_follow_bar_position() {
        let parent = node(0, 1);
        let request = root_request(OutputId(0), Rect::new(100, 0, 20, 20), &parent.frame, BarPosition::Top);
        assert_eq!((request.anchor_corner, request.gravity), (Corner::BottomLeft, Corner::BottomRight));
        assert_eq!(request.parent, None);

        let row = parent.frame.row(5).unwrap();
        let request = submenu_request(&parent, row, &parent.frame, BarPosition::Bottom);
        assert_eq!((request.anchor_corner, request.gravity), (Corner::BottomRight, Corner::TopRight));
        assert_eq!(request.parent, Some(SurfaceId(1)));
        assert_eq!(request.anchor, row.rect);
    }

    #[test]
    fn test_close_from_goes_deepest_first() {
        let mut popups = Popups::default();
        let mut windowing = Recorder::default();
        popups.open_root("item", node(0, 1));
        popups.push(node(5, 2));
        popups.push(node(9, 3));
        assert_eq!(popups.depth(), 3);

        let menus = |closed: Vec<PopupNode>| closed.into_iter().map(|node| node.menu).collect::<Vec<_>>();
        assert_eq!(menus(popups.close_from(1, &mut windowing)), vec![9, 5]);
        assert_eq!(windowing.destroyed, vec![SurfaceId(3), SurfaceId(2)]);
        assert_eq!(popups.depth(), 1);

        assert_eq!(menus(popups.close_all(&mut windowing)), vec![0]);
        assert_eq!(popups.item(), None);
        assert!(popups.close_all(&mut windowing).is_empty());
    }
}
