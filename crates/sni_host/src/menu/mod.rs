//! Mirror of a remote application's `com.canonical.dbusmenu` tree.
//!
//! The tree is an arena keyed by menu item id. Parent and child links are ids into the same map,
//! so replacing a subtree is a matter of building the new nodes on the side and then swapping
//! them in, with nothing ever pointing at a half built node.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

mod layout;
pub use layout::*;

/// Id of the implicit root of every menu.
pub const ROOT_ID: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToggleType {
    #[default]
    None,
    Checkmark,
    Radio,
}

/// PNG data from an `icon-data` property. Only the header is inspected here, actual decoding is up
/// to whoever draws the menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PngImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PngImage {
    const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        if data.len() < 24 || data[..8] != Self::SIGNATURE || &data[12..16] != b"IHDR" {
            return None;
        }
        let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
        let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        if width == 0 || height == 0 {
            return None;
        }
        Some(PngImage { width, height, data })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IconSource {
    #[default]
    None,
    Name(String),
    Pixmap(PngImage),
}

/// One entry of a menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub id: i32,
    pub parent: Option<i32>,
    pub label: String,
    pub is_separator: bool,
    pub enabled: bool,
    pub visible: bool,
    pub icon: IconSource,
    pub toggle_type: ToggleType,
    /// -1 unknown, 0 off, 1 on.
    pub toggle_state: i32,
    /// Present iff this item is a submenu, even when that submenu is currently empty.
    pub children: Option<Vec<i32>>,

    icon_name: Option<String>,
    icon_data: Option<PngImage>,
}

impl MenuItem {
    pub fn new(id: i32, parent: Option<i32>) -> Self {
        MenuItem {
            id,
            parent,
            label: String::new(),
            is_separator: false,
            enabled: true,
            visible: true,
            icon: IconSource::None,
            toggle_type: ToggleType::None,
            toggle_state: -1,
            children: None,
            icon_name: None,
            icon_data: None,
        }
    }

    pub fn is_submenu(&self) -> bool {
        self.children.is_some()
    }

    /// Whether clicking or hovering this entry does anything.
    pub fn is_interactive(&self) -> bool {
        self.visible && self.enabled && !self.is_separator
    }

    /// Apply one entry of a property map. `children-display` is structural and never handled
    /// here.
    pub fn apply_property(&mut self, key: &str, value: &MenuValue) {
        match key {
            "type" => self.is_separator = value.as_str() == Some("separator"),
            "label" => self.label = value.as_str().map(strip_mnemonic).unwrap_or_default(),
            "enabled" => self.enabled = value.as_bool().unwrap_or(true),
            "visible" => self.visible = value.as_bool().unwrap_or(true),
            "icon-name" => self.icon_name = value.as_str().filter(|name| !name.is_empty()).map(str::to_owned),
            "icon-data" => {
                self.icon_data = match value {
                    MenuValue::Bytes(bytes) => {
                        let image = PngImage::from_bytes(bytes.clone());
                        if image.is_none() {
                            log::warn!("menu item {} has icon-data that is not a png image", self.id);
                        }
                        image
                    }
                    _ => None,
                }
            }
            "toggle-type" => {
                self.toggle_type = match value.as_str() {
                    Some("checkmark") => ToggleType::Checkmark,
                    Some("radio") => ToggleType::Radio,
                    _ => ToggleType::None,
                }
            }
            "toggle-state" => self.toggle_state = value.as_int().unwrap_or(-1),
            "children-display" | "shortcut" | "disposition" => {}
            other => log::debug!("ignoring unknown menu property {:?} on item {}", other, self.id),
        }
        self.update_icon();
    }

    /// Reset a property to its default, as requested by `ItemsPropertiesUpdated`.
    pub fn reset_property(&mut self, key: &str) {
        match key {
            "type" => self.is_separator = false,
            "label" => self.label.clear(),
            "enabled" => self.enabled = true,
            "visible" => self.visible = true,
            "icon-name" => self.icon_name = None,
            "icon-data" => self.icon_data = None,
            "toggle-type" => self.toggle_type = ToggleType::None,
            "toggle-state" => self.toggle_state = -1,
            _ => {}
        }
        self.update_icon();
    }

    // icon-name wins over icon-data
    fn update_icon(&mut self) {
        self.icon = match (&self.icon_name, &self.icon_data) {
            (Some(name), _) => IconSource::Name(name.clone()),
            (None, Some(image)) => IconSource::Pixmap(image.clone()),
            (None, None) => IconSource::None,
        };
    }
}

/// Strip the mnemonic markers from a label. An underscore hides itself and keeps the character
/// after it, so `__` turns into a literal `_`. A trailing lone underscore is dropped.
pub fn strip_mnemonic(label: &str) -> String {
    let mut result = String::with_capacity(label.len());
    let mut chars = label.chars();
    while let Some(c) = chars.next() {
        if c == '_' {
            match chars.next() {
                Some(next) => result.push(next),
                None => break,
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MenuError {
    #[error("layout for menu item {0}, which is not in the tree")]
    UnknownRoot(i32),
}

/// The menu of one tray item.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MenuTree {
    nodes: HashMap<i32, MenuItem>,
    revision: u32,
}

impl MenuTree {
    /// Build a tree from the reply to `GetLayout(0)`.
    pub fn from_layout(revision: u32, layout: LayoutNode) -> Self {
        let mut nodes = HashMap::new();
        stage_node(layout, None, true, &mut nodes, &|_| false);
        MenuTree { nodes, revision }
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&MenuItem> {
        self.nodes.get(&ROOT_ID)
    }

    pub fn get(&self, id: i32) -> Option<&MenuItem> {
        self.nodes.get(&id)
    }

    pub fn parent_of(&self, id: i32) -> Option<&MenuItem> {
        self.nodes.get(&id)?.parent.and_then(|parent| self.nodes.get(&parent))
    }

    /// Children of a submenu, in order. Empty for leaves and unknown ids.
    pub fn children(&self, id: i32) -> impl Iterator<Item = &MenuItem> {
        self.nodes
            .get(&id)
            .and_then(|item| item.children.as_deref())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(child))
    }

    /// All ids below `id`, depth first, not including `id` itself.
    pub fn descendants(&self, id: i32) -> Vec<i32> {
        let mut result = Vec::new();
        let mut stack: Vec<i32> = self.children(id).map(|item| item.id).collect();
        stack.reverse();
        while let Some(next) = stack.pop() {
            result.push(next);
            let mut children: Vec<i32> = self.children(next).map(|item| item.id).collect();
            children.reverse();
            stack.extend(children);
        }
        result
    }

    /// Whether `id` lies strictly below `ancestor`.
    pub fn is_descendant(&self, id: i32, ancestor: i32) -> bool {
        let mut current = self.nodes.get(&id).and_then(|item| item.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.nodes.get(&parent).and_then(|item| item.parent);
        }
        false
    }

    /// Swap in the reply to `GetLayout(layout.id)`.
    ///
    /// The new nodes are built completely before anything in the tree is touched. Returns the ids
    /// that were below the replaced root before the swap; any of them may now be gone.
    pub fn replace_subtree(&mut self, revision: u32, layout: LayoutNode) -> Result<Vec<i32>, MenuError> {
        let root_id = layout.id;
        let parent = match self.nodes.get(&root_id) {
            Some(root) => root.parent,
            None => return Err(MenuError::UnknownRoot(root_id)),
        };

        let old_descendants = self.descendants(root_id);
        let replaced: HashSet<i32> = old_descendants.iter().copied().chain(std::iter::once(root_id)).collect();

        let mut staged = HashMap::new();
        let nodes = &self.nodes;
        stage_node(layout, parent, true, &mut staged, &|id| nodes.contains_key(&id) && !replaced.contains(&id));

        for id in &replaced {
            self.nodes.remove(id);
        }
        self.nodes.extend(staged);
        self.revision = revision;
        Ok(old_descendants)
    }

    /// Apply an `ItemsPropertiesUpdated` signal. Structure is never touched. Returns the ids that
    /// were found and changed.
    pub fn update_properties(&mut self, updated: &[(i32, PropertyMap)], removed: &[(i32, Vec<String>)]) -> Vec<i32> {
        let mut changed = Vec::new();
        for (id, properties) in updated {
            if let Some(item) = self.nodes.get_mut(id) {
                for (key, value) in properties {
                    item.apply_property(key, value);
                }
                changed.push(*id);
            }
        }
        for (id, keys) in removed {
            if let Some(item) = self.nodes.get_mut(id) {
                for key in keys {
                    item.reset_property(key);
                }
                changed.push(*id);
            }
        }
        changed.sort_unstable();
        changed.dedup();
        changed
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, item: &MenuItem, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        if item.is_separator {
            writeln!(f, "{}{:>4}  ----", indent, item.id)?;
        } else {
            let toggle = match (item.toggle_type, item.toggle_state) {
                (ToggleType::Checkmark, 1) => "[x] ",
                (ToggleType::Checkmark, _) => "[ ] ",
                (ToggleType::Radio, 1) => "(*) ",
                (ToggleType::Radio, _) => "( ) ",
                (ToggleType::None, _) => "",
            };
            write!(f, "{}{:>4}  {}{}", indent, item.id, toggle, item.label)?;
            if item.is_submenu() {
                write!(f, " >")?;
            }
            if !item.enabled {
                write!(f, " (disabled)")?;
            }
            if !item.visible {
                write!(f, " (hidden)")?;
            }
            writeln!(f)?;
        }
        for child in self.children(item.id) {
            self.fmt_node(f, child, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for MenuTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for child in self.children(ROOT_ID) {
            self.fmt_node(f, child, 0)?;
        }
        Ok(())
    }
}

/// Convert a decoded layout node and its children into menu items in `staged`. Ids already present
/// in `staged`, or reported `taken`, are skipped along with their subtree. Only nodes with
/// `children-display=submenu`, and the root, keep their children.
fn stage_node(
    node: LayoutNode,
    parent: Option<i32>,
    force_submenu: bool,
    staged: &mut HashMap<i32, MenuItem>,
    taken: &dyn Fn(i32) -> bool,
) -> Option<i32> {
    let id = node.id;
    if staged.contains_key(&id) || taken(id) {
        log::warn!("menu item id {} appears more than once in layout, skipping it", id);
        return None;
    }

    let mut item = MenuItem::new(id, parent);
    let mut submenu = force_submenu;
    for (key, value) in &node.properties {
        if key == "children-display" {
            submenu |= value.as_str() == Some("submenu");
        } else {
            item.apply_property(key, value);
        }
    }
    staged.insert(id, item);

    if !submenu {
        if !node.children.is_empty() {
            log::debug!("menu item {} has children but is not a submenu, dropping them", id);
        }
        return Some(id);
    }
    let children: Vec<i32> =
        node.children.into_iter().filter_map(|child| stage_node(child, Some(id), false, staged, taken)).collect();
    if let Some(item) = staged.get_mut(&id) {
        item.children = Some(children);
    }
    Some(id)
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;
    use pretty_assertions::assert_eq;

    fn label(text: &str) -> PropertyMap {
        hashmap! { "label".to_string() => MenuValue::Str(text.to_string()) }
    }

    fn leaf(id: i32, text: &str) -> LayoutNode {
        LayoutNode::new(id, label(text), vec![])
    }

    fn sample_layout() -> LayoutNode {
        LayoutNode::new(
            0,
            hashmap! { "children-display".to_string() => MenuValue::Str("submenu".to_string()) },
            vec![
                leaf(1, "_Open"),
                LayoutNode::new(
                    2,
                    hashmap! {
                        "label".to_string() => MenuValue::Str("Recent".to_string()),
                        "children-display".to_string() => MenuValue::Str("submenu".to_string()),
                    },
                    vec![leaf(3, "a.txt"), leaf(4, "b.txt")],
                ),
                LayoutNode::new(5, hashmap! { "type".to_string() => MenuValue::Str("separator".to_string()) }, vec![]),
                leaf(6, "Quit"),
            ],
        )
    }

    #[test]
    fn test_strip_mnemonic() {
        assert_eq!(strip_mnemonic("_Open"), "Open");
        assert_eq!(strip_mnemonic("Save__As"), "Save_As");
        assert_eq!(strip_mnemonic("Save _As"), "Save As");
        assert_eq!(strip_mnemonic("Trailing_"), "Trailing");
        assert_eq!(strip_mnemonic("plain"), "plain");
        assert_eq!(strip_mnemonic(""), "");
    }

    #[test]
    fn test_from_layout_builds_links() {
        let tree = MenuTree::from_layout(3, sample_layout());
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.revision(), 3);
        assert_eq!(tree.root().and_then(|root| root.children.clone()), Some(vec![1, 2, 5, 6]));
        assert_eq!(tree.get(1).map(|item| item.label.as_str()), Some("Open"));
        assert_eq!(tree.get(2).and_then(|item| item.children.clone()), Some(vec![3, 4]));
        assert_eq!(tree.parent_of(4).map(|item| item.id), Some(2));
        assert!(tree.get(5).map_or(false, |item| item.is_separator));
        assert!(!tree.get(6).map_or(true, |item| item.is_submenu()));
        assert_eq!(tree.descendants(0), vec![1, 2, 3, 4, 5, 6]);
        assert!(tree.is_descendant(3, 0));
        assert!(!tree.is_descendant(3, 1));
    }

    #[test]
    fn test_empty_submenu_is_still_a_submenu() {
        let layout = LayoutNode::new(
            0,
            PropertyMap::new(),
            vec![LayoutNode::new(
                1,
                hashmap! { "children-display".to_string() => MenuValue::Str("submenu".to_string()) },
                vec![],
            )],
        );
        let tree = MenuTree::from_layout(1, layout);
        assert_eq!(tree.get(1).and_then(|item| item.children.clone()), Some(vec![]));
    }

    #[test]
    fn test_children_without_submenu_display_are_a_leaf() {
        let layout = LayoutNode::new(
            0,
            PropertyMap::new(),
            vec![LayoutNode::new(2, label("Plain"), vec![leaf(3, "hidden child")]), leaf(4, "Quit")],
        );
        let tree = MenuTree::from_layout(1, layout);

        assert!(!tree.get(2).map_or(true, |item| item.is_submenu()));
        assert!(tree.get(3).is_none());
        assert_eq!(tree.children(2).count(), 0);
        assert_eq!(tree.descendants(0), vec![2, 4]);
    }

    #[test]
    fn test_changed_ids_are_unique() {
        let mut tree = MenuTree::from_layout(1, sample_layout());
        let changed = tree.update_properties(
            &[(4, label("c.txt")), (1, label("Open")), (4, label("d.txt"))],
            &[(1, vec!["enabled".to_string()])],
        );
        assert_eq!(changed, vec![1, 4]);
        assert_eq!(tree.get(4).map(|item| item.label.as_str()), Some("d.txt"));
    }

    #[test]
    fn test_property_update_only_touches_label() {
        let mut tree = MenuTree::from_layout(1, sample_layout());
        let mut expected = tree.clone();

        let changed = tree.update_properties(&[(4, label("c.txt"))], &[]);

        assert_eq!(changed, vec![4]);
        if let Some(item) = expected.nodes.get_mut(&4) {
            item.label = "c.txt".to_string();
        }
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_removed_properties_reset_to_defaults() {
        let layout = LayoutNode::new(
            0,
            PropertyMap::new(),
            vec![LayoutNode::new(
                1,
                hashmap! {
                    "label".to_string() => MenuValue::Str("Mute".to_string()),
                    "enabled".to_string() => MenuValue::Bool(false),
                    "toggle-type".to_string() => MenuValue::Str("checkmark".to_string()),
                    "toggle-state".to_string() => MenuValue::Int(1),
                },
                vec![],
            )],
        );
        let mut tree = MenuTree::from_layout(1, layout);
        tree.update_properties(&[], &[(1, vec!["enabled".to_string(), "toggle-state".to_string()])]);

        let item = tree.get(1).unwrap();
        assert!(item.enabled);
        assert_eq!(item.toggle_state, -1);
        assert_eq!(item.toggle_type, ToggleType::Checkmark);
        assert_eq!(item.label, "Mute");
    }

    #[test]
    fn test_unknown_ids_in_update_are_ignored() {
        let mut tree = MenuTree::from_layout(1, sample_layout());
        let before = tree.clone();
        assert!(tree.update_properties(&[(99, label("nope"))], &[(98, vec!["label".to_string()])]).is_empty());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_replace_subtree_swaps_only_that_subtree() {
        let mut tree = MenuTree::from_layout(1, sample_layout());
        let replacement = LayoutNode::new(
            2,
            hashmap! {
                "label".to_string() => MenuValue::Str("Recent".to_string()),
                "children-display".to_string() => MenuValue::Str("submenu".to_string()),
            },
            vec![leaf(7, "c.txt")],
        );

        let removed = tree.replace_subtree(2, replacement);

        assert_eq!(removed, Ok(vec![3, 4]));
        assert_eq!(tree.revision(), 2);
        assert!(tree.get(3).is_none());
        assert_eq!(tree.get(2).and_then(|item| item.children.clone()), Some(vec![7]));
        assert_eq!(tree.get(2).and_then(|item| item.parent), Some(0));
        assert_eq!(tree.parent_of(7).map(|item| item.id), Some(2));
        assert_eq!(tree.root().and_then(|root| root.children.clone()), Some(vec![1, 2, 5, 6]));
    }

    #[test]
    fn test_replace_subtree_skips_ids_used_elsewhere() {
        let mut tree = MenuTree::from_layout(1, sample_layout());
        let replacement = LayoutNode::new(2, PropertyMap::new(), vec![leaf(6, "stolen"), leaf(8, "fine")]);

        assert!(tree.replace_subtree(2, replacement).is_ok());
        assert_eq!(tree.get(6).map(|item| item.label.as_str()), Some("Quit"));
        assert_eq!(tree.get(6).and_then(|item| item.parent), Some(0));
        assert_eq!(tree.get(2).and_then(|item| item.children.clone()), Some(vec![8]));
    }

    #[test]
    fn test_replace_unknown_root_leaves_tree_alone() {
        let mut tree = MenuTree::from_layout(1, sample_layout());
        let before = tree.clone();
        assert_eq!(tree.replace_subtree(5, leaf(42, "x")), Err(MenuError::UnknownRoot(42)));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_icon_name_wins_over_icon_data() {
        let mut png = PngImage::SIGNATURE.to_vec();
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&16u32.to_be_bytes());
        png.extend_from_slice(&16u32.to_be_bytes());

        let mut item = MenuItem::new(1, Some(0));
        item.apply_property("icon-data", &MenuValue::Bytes(png));
        assert!(matches!(&item.icon, IconSource::Pixmap(image) if image.width == 16 && image.height == 16));

        item.apply_property("icon-name", &MenuValue::Str("document-open".to_string()));
        assert_eq!(item.icon, IconSource::Name("document-open".to_string()));

        item.reset_property("icon-name");
        assert!(matches!(item.icon, IconSource::Pixmap(_)));

        item.apply_property("icon-data", &MenuValue::Bytes(vec![1, 2, 3]));
        assert_eq!(item.icon, IconSource::None);
    }

    #[test]
    fn test_display_tree() {
        let tree = MenuTree::from_layout(1, sample_layout());
        let expected = "   1  Open\n   2  Recent >\n     3  a.txt\n     4  b.txt\n   5  ----\n   6  Quit\n";
        assert_eq!(tree.to_string(), expected);
    }
}
