use std::{path::PathBuf, rc::Rc};

use crate::names::{self, Protocol};

/// Recognised values of [`org.freedesktop.StatusNotifierItem.Status`].
///
/// [`org.freedesktop.StatusNotifierItem.Status`]: https://www.freedesktop.org/wiki/Specifications/StatusNotifierItem/StatusNotifierItem/#org.freedesktop.statusnotifieritem.status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The item doesn't convey important information to the user, it can be considered an "idle"
    /// status and is likely that visualizations will chose to hide it.
    Passive,
    /// The item is active, is more important that the item will be shown in some way to the user.
    Active,
    /// The item carries really important information for the user, such as battery charge running
    /// out and is wants to incentive the direct user intervention. Visualizations should emphasize
    /// in some way the items with NeedsAttention status.
    NeedsAttention,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct ParseStatusError;

impl std::str::FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseStatusError> {
        match s {
            "Passive" => Ok(Status::Passive),
            "Active" => Ok(Status::Active),
            "NeedsAttention" => Ok(Status::NeedsAttention),
            _ => Err(ParseStatusError),
        }
    }
}

/// Properties of a StatusNotifierItem the tray reads. The string form is the property name on the
/// bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
pub enum ItemProperty {
    Status,
    Title,
    IconName,
    IconPixmap,
    AttentionIconName,
    AttentionIconPixmap,
    IconThemePath,
    ItemIsMenu,
    Menu,
}

/// Properties fetched when an item shows up.
pub const INITIAL_PROPERTIES: &[ItemProperty] = &[
    ItemProperty::Status,
    ItemProperty::Title,
    ItemProperty::IconName,
    ItemProperty::IconPixmap,
    ItemProperty::AttentionIconName,
    ItemProperty::AttentionIconPixmap,
    ItemProperty::ItemIsMenu,
    ItemProperty::Menu,
];

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Flag(bool),
    Pixmaps(Vec<Pixmap>),
}

/// One entry of an `IconPixmap` property. `pixels` are ARGB32 in host byte order, row major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub size: i32,
    pub pixels: Vec<u32>,
}

impl Pixmap {
    /// Convert a `(width, height, data)` triple from the bus, where data is ARGB32 in network byte
    /// order. Only square pixmaps with matching data length are kept.
    pub fn from_network_bytes(width: i32, height: i32, data: &[u8]) -> Option<Pixmap> {
        if width <= 0 || width != height {
            return None;
        }
        let len = (width as usize).checked_mul(height as usize)?;
        if data.len() != len * 4 {
            return None;
        }
        let pixels =
            data.chunks_exact(4).map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])).collect();
        Some(Pixmap { size: width, pixels })
    }
}

/// From a list of pixmaps, pick the most appropriately sized one: the smallest one at least as big
/// as requested, otherwise the biggest.
pub fn choose_pixmap<P: AsRef<Pixmap>>(pixmaps: &[P], size: i32) -> Option<&P> {
    pixmaps.iter().max_by(|a, b| {
        let a = a.as_ref().size;
        let b = b.as_ref().size;
        match (a >= size, b >= size) {
            (true, true) => b.cmp(&a),
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => a.cmp(&b),
        }
    })
}

impl AsRef<Pixmap> for Pixmap {
    fn as_ref(&self) -> &Pixmap {
        self
    }
}

/// Where on the bus an item lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemAddress {
    pub service: String,
    pub path: String,
    pub interface: &'static str,
}

impl ItemAddress {
    /// Derive the address from a registry id.
    ///
    /// The format of `id` is either `{bus}{object_path}` (e.g.
    /// `:1.50/org/ayatana/NotificationItem/nm_applet`), which is the format used by the kde
    /// watcher, or just `{bus}`, in which case the item sits at the default path.
    pub fn from_id(id: &str) -> Self {
        match id.find('/') {
            Some(idx) => ItemAddress {
                service: id[..idx].to_owned(),
                path: id[idx..].to_owned(),
                interface: Protocol::Kde.item_interface(),
            },
            None => ItemAddress {
                service: id.to_owned(),
                path: names::ITEM_OBJECT.to_owned(),
                interface: Protocol::Freedesktop.item_interface(),
            },
        }
    }

    /// Whether the path was guessed rather than given, so it may need resolving via introspection.
    pub fn is_pathless(&self) -> bool {
        self.interface == Protocol::Freedesktop.item_interface() && self.path == names::ITEM_OBJECT
    }
}

/// Turn the argument of a `RegisterStatusNotifierItem` call into the id the item is tracked under.
///
/// The freedesktop.org specification has this be just the bus name, however some status items pass
/// non-conforming values. One common one is just the object path, which is joined to the sender.
/// The kde watcher always tracks items as `{bus}{object_path}`. Returns `None` when nothing usable
/// was given.
pub fn canonical_id(protocol: Protocol, sender: Option<&str>, raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('/') {
        return sender.filter(|sender| !sender.is_empty()).map(|sender| format!("{}{}", sender, raw));
    }
    match protocol {
        Protocol::Freedesktop => Some(raw.to_owned()),
        Protocol::Kde if raw.contains('/') => Some(raw.to_owned()),
        Protocol::Kde => Some(format!("{}{}", raw, names::ITEM_OBJECT)),
    }
}

/// Whether an item id belongs to the bus name `service`.
pub fn id_belongs_to(id: &str, service: &str) -> bool {
    id == service || (id.starts_with(service) && id[service.len()..].starts_with('/'))
}

/// An image that can be drawn for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconImage {
    File(PathBuf),
    Pixmap(Rc<Pixmap>),
}

/// The icon resolved for an item, together with the target size it was resolved for and the
/// range of sizes it is good for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedIcon {
    pub image: Option<IconImage>,
    pub target: i32,
    pub min_size: i32,
    pub max_size: i32,
}

impl CachedIcon {
    /// Whether this icon can be reused when drawing at `size`.
    pub fn covers(&self, size: i32) -> bool {
        size == self.target || (self.min_size <= size && size <= self.max_size)
    }
}

/// A StatusNotifierItem (SNI), as far as it has been fetched.
///
/// Every field starts out empty and is filled in as property replies arrive, so an item can be
/// drawn straight away using defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct TrayItem {
    pub id: String,
    pub address: ItemAddress,
    pub status: Option<Status>,
    pub title: Option<String>,
    pub icon_name: Option<String>,
    pub icon_pixmaps: Vec<Rc<Pixmap>>,
    pub attention_icon_name: Option<String>,
    pub attention_icon_pixmaps: Vec<Rc<Pixmap>>,
    pub item_is_menu: bool,
    pub menu_path: Option<String>,
    pub icon_theme_paths: Vec<PathBuf>,
    /// `IconThemePath` of the menu object, searched for menu icons before the item's own paths.
    pub menu_icon_theme_paths: Vec<PathBuf>,

    pub(crate) icon: Option<CachedIcon>,
    pub(crate) path_resolution_tried: bool,
}

impl TrayItem {
    pub fn new(id: &str) -> Self {
        TrayItem {
            id: id.to_owned(),
            address: ItemAddress::from_id(id),
            status: None,
            title: None,
            icon_name: None,
            icon_pixmaps: Vec::new(),
            attention_icon_name: None,
            attention_icon_pixmaps: Vec::new(),
            item_is_menu: false,
            menu_path: None,
            icon_theme_paths: Vec::new(),
            menu_icon_theme_paths: Vec::new(),
            icon: None,
            path_resolution_tried: false,
        }
    }

    /// Properties worth fetching, depending on the interface the item speaks.
    pub fn initial_properties(&self) -> Vec<ItemProperty> {
        let mut properties = INITIAL_PROPERTIES.to_vec();
        if self.address.interface == Protocol::Kde.item_interface() {
            properties.push(ItemProperty::IconThemePath);
        }
        properties
    }

    /// Passive items are hidden, and so are items without a status only once we know they have one.
    pub fn is_visible(&self) -> bool {
        self.status != Some(Status::Passive)
    }

    pub fn needs_attention(&self) -> bool {
        self.status == Some(Status::NeedsAttention)
    }

    /// Icon name to show in the current status.
    pub fn current_icon_name(&self) -> Option<&str> {
        match &self.attention_icon_name {
            Some(name) if self.needs_attention() => Some(name),
            _ => self.icon_name.as_deref(),
        }
    }

    /// Pixmaps to show in the current status.
    pub fn current_pixmaps(&self) -> &[Rc<Pixmap>] {
        if self.needs_attention() && !self.attention_icon_pixmaps.is_empty() {
            &self.attention_icon_pixmaps
        } else {
            &self.icon_pixmaps
        }
    }

    pub fn cached_icon(&self) -> Option<&CachedIcon> {
        self.icon.as_ref()
    }

    pub fn invalidate_icon(&mut self) {
        self.icon = None;
    }

    /// Store a fetched property. `None` means the item does not have it. Returns whether anything
    /// changed.
    pub fn apply_property(&mut self, property: ItemProperty, value: Option<PropertyValue>) -> bool {
        let text = |value: &Option<PropertyValue>| match value {
            Some(PropertyValue::Text(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let pixmaps = |value: Option<PropertyValue>| match value {
            Some(PropertyValue::Pixmaps(pixmaps)) => pixmaps.into_iter().map(Rc::new).collect(),
            _ => Vec::new(),
        };

        let changed = match property {
            ItemProperty::Status => {
                let status = match text(&value) {
                    Some(s) => match s.parse() {
                        Ok(status) => Some(status),
                        Err(_) => {
                            log::warn!("item {} reported invalid status {:?}", self.id, s);
                            self.status
                        }
                    },
                    None => None,
                };
                replace(&mut self.status, status)
            }
            ItemProperty::Title => replace(&mut self.title, text(&value)),
            ItemProperty::IconName => replace(&mut self.icon_name, text(&value)),
            ItemProperty::AttentionIconName => replace(&mut self.attention_icon_name, text(&value)),
            ItemProperty::IconPixmap => replace(&mut self.icon_pixmaps, pixmaps(value)),
            ItemProperty::AttentionIconPixmap => replace(&mut self.attention_icon_pixmaps, pixmaps(value)),
            ItemProperty::IconThemePath => {
                let paths = text(&value)
                    .map(|s| s.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect())
                    .unwrap_or_default();
                replace(&mut self.icon_theme_paths, paths)
            }
            ItemProperty::ItemIsMenu => {
                let flag = matches!(value, Some(PropertyValue::Flag(true)));
                replace(&mut self.item_is_menu, flag)
            }
            ItemProperty::Menu => {
                let path = text(&value).filter(|path| path != "/");
                replace(&mut self.menu_path, path)
            }
        };

        if changed && property != ItemProperty::Title {
            self.invalidate_icon();
        }
        changed
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
