//! The tray: registry, menus, popups and input, driven from one thread.
//!
//! [`Tray`] never blocks. Calls go out through the [`Bus`] and come back as [`BusEvent`]s that the
//! owner feeds into [`Tray::handle_bus_event`], in whatever order they arrive. Every call is
//! recorded in a pending-operation table first, so a reply for something that has since been torn
//! down is recognised and dropped.

use std::{collections::HashMap, path::PathBuf};

use crate::{
    bus::{Bus, BusCall, BusEvent, BusSend, ItemMethod, MenuEventKind, Orientation, Reply, Signal, SignalMatch, Token},
    config::{Button, ItemAction, TrayConfig},
    error::{BusError, Error, Result},
    host::{HostPhase, Registry},
    icon::IconResolver,
    input::{hit, scroll_button, Hotspot, InputRouter, OutputId, PointerEvent, Rect, SeatId, SurfaceId, SurfaceRef, TouchEvent},
    item::{canonical_id, choose_pixmap, CachedIcon, IconImage, ItemProperty, PropertyValue, TrayItem},
    menu::{MenuItem, MenuTree, ROOT_ID},
    names::Protocol,
    pending::{Listener, PendingOps, Purpose, Subscriptions},
    popup::{
        layout_menu, root_request, submenu_request, MenuFrame, MenuRow, PopupNode, PopupRequest, Popups, TextMeasure, Windowing,
    },
};

/// Size of one output the bar is shown on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    /// Width in logical pixels.
    pub width: i32,
    pub scale: i32,
}

/// Something about the set of items changed, for whoever draws the bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayChange {
    Added(String),
    Removed(String),
    Updated(String),
}

/// One icon of the tray row, in buffer pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIcon {
    pub item: String,
    pub rect: Rect,
    /// `None` means the renderer should draw its placeholder.
    pub icon: Option<IconImage>,
    pub needs_attention: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenStage {
    FetchLayout,
    AboutToShow,
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenTarget {
    Root { output: OutputId, anchor: Rect },
    /// A submenu of the row `id` of the popup at `level`.
    Submenu { level: usize, id: i32 },
}

impl OpenTarget {
    fn menu(&self) -> i32 {
        match self {
            OpenTarget::Root { .. } => ROOT_ID,
            OpenTarget::Submenu { id, .. } => *id,
        }
    }
}

/// A popup waiting for the bus before it can be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Opening {
    item: String,
    target: OpenTarget,
    stage: OpenStage,
}

impl Opening {
    fn is_for(&self, item: &str, menu: i32) -> bool {
        self.item == item && self.target.menu() == menu
    }
}

/// Where to send the DBusMenu events of an item.
fn menu_target(item: &TrayItem) -> Option<(String, String)> {
    Some((item.address.service.clone(), item.menu_path.clone()?))
}

fn unexpected(reply: Reply) {
    log::warn!("unexpected reply: {:?}", reply);
}

/// Pick the icon to draw for `item` at `size`: a themed icon if its name can be found, otherwise
/// the best fitting pixmap.
fn resolve_icon(icons: &IconResolver, theme: Option<&str>, config_dirs: &[PathBuf], item: &TrayItem, size: i32) -> CachedIcon {
    if let Some(name) = item.current_icon_name() {
        // some items send a full path instead of a name
        let path = PathBuf::from(name);
        if path.is_absolute() && path.is_file() {
            return CachedIcon { image: Some(IconImage::File(path)), target: size, min_size: 1, max_size: i32::MAX };
        }
        let extra_dirs: Vec<PathBuf> = item.icon_theme_paths.iter().chain(config_dirs).cloned().collect();
        match icons.find_icon(theme, &extra_dirs, name, size) {
            Some(found) => {
                return CachedIcon {
                    image: Some(IconImage::File(found.path)),
                    target: size,
                    min_size: found.min_size,
                    max_size: found.max_size,
                }
            }
            None => log::debug!("no icon named {:?} for {}", name, item.id),
        }
    }
    let image = choose_pixmap(item.current_pixmaps(), size).map(|pixmap| IconImage::Pixmap(pixmap.clone()));
    CachedIcon { image, target: size, min_size: size, max_size: size }
}

pub struct Tray<B, W> {
    config: TrayConfig,
    bus: B,
    windowing: W,
    measure: Box<dyn TextMeasure>,
    icons: IconResolver,
    pid: u32,

    registry: Registry,
    menus: HashMap<String, MenuTree>,
    pending: PendingOps,
    subscriptions: Subscriptions,

    popups: Popups,
    opening: Option<Opening>,

    input: InputRouter,
    outputs: HashMap<OutputId, OutputInfo>,
    rows: HashMap<OutputId, Vec<Hotspot<String>>>,
    last_input_time: u32,

    changes: Vec<TrayChange>,
}

impl<B: Bus, W: Windowing> Tray<B, W> {
    /// Create a tray that looks for icons in the standard places.
    pub fn new(config: TrayConfig, bus: B, windowing: W, measure: Box<dyn TextMeasure>) -> Self {
        let icons = IconResolver::from_env(&config.icon_dirs);
        Self::with_icons(config, bus, windowing, measure, icons)
    }

    pub fn with_icons(config: TrayConfig, bus: B, windowing: W, measure: Box<dyn TextMeasure>, icons: IconResolver) -> Self {
        Tray {
            config,
            bus,
            windowing,
            measure,
            icons,
            pid: std::process::id(),
            registry: Registry::new(),
            menus: HashMap::new(),
            pending: PendingOps::default(),
            subscriptions: Subscriptions::default(),
            popups: Popups::default(),
            opening: None,
            input: InputRouter::default(),
            outputs: HashMap::new(),
            rows: HashMap::new(),
            last_input_time: 0,
            changes: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrayConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn windowing(&self) -> &W {
        &self.windowing
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn items(&self) -> &[TrayItem] {
        self.registry.items()
    }

    pub fn menu(&self, item: &str) -> Option<&MenuTree> {
        self.menus.get(item)
    }

    pub fn popups(&self) -> &Popups {
        &self.popups
    }

    /// Whether no call is in flight anymore.
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn take_changes(&mut self) -> Vec<TrayChange> {
        std::mem::take(&mut self.changes)
    }

    fn padding(&self) -> i32 {
        i32::try_from(self.config.padding).unwrap_or(0)
    }

    fn issue(&mut self, purpose: Purpose, call: BusCall) -> Token {
        let token = self.pending.issue(purpose);
        self.bus.call(token, call);
        token
    }

    fn listen(&mut self, listener: Listener, rule: SignalMatch) {
        let id = self.subscriptions.add(listener);
        self.bus.subscribe(id, rule);
    }

    fn stop_listening(&mut self, predicate: impl Fn(&Listener) -> bool) {
        for id in self.subscriptions.remove_where(predicate) {
            self.bus.unsubscribe(id);
        }
    }

    fn changed(&mut self, change: TrayChange) {
        if self.changes.last() != Some(&change) {
            self.changes.push(change);
        }
    }

    /// Start registering as a StatusNotifierHost under both namespaces.
    pub fn start(&mut self) {
        self.listen(Listener::NameOwner, SignalMatch::NameOwnerChanged);
        for protocol in Protocol::ALL {
            self.listen(Listener::Watcher(protocol), SignalMatch::Watcher { protocol });
            self.registry.host_mut(protocol).phase = HostPhase::RequestingName;
            let name = protocol.host_service(self.pid);
            self.issue(Purpose::HostName { protocol }, BusCall::RequestName { name });
        }
    }

    /// Act on a reply or signal. Only the loss of the bus connection is an error.
    pub fn handle_bus_event(&mut self, event: BusEvent) -> Result<()> {
        match event {
            BusEvent::Reply { token, result } => match self.pending.complete(token) {
                Some(purpose) => self.handle_reply(purpose, result),
                None => log::debug!("dropping reply to {}, nobody is waiting for it", token),
            },
            BusEvent::Signal { subscription, signal } => match self.subscriptions.get(subscription).cloned() {
                Some(listener) => self.handle_signal(listener, signal),
                None => log::debug!("dropping signal for {}: {:?}", subscription, signal),
            },
            BusEvent::Disconnected => return Err(Error::Disconnected),
        }
        Ok(())
    }

    fn handle_reply(&mut self, purpose: Purpose, result: std::result::Result<Reply, BusError>) {
        match purpose {
            Purpose::HostName { protocol } => self.on_host_name(protocol, result),
            Purpose::RegisterHost { protocol } => self.on_host_registered(protocol, result),
            Purpose::WatcherItems { protocol } => match result {
                Ok(Reply::Items(services)) => {
                    for service in services {
                        self.add_item(protocol, &service);
                    }
                }
                Ok(other) => unexpected(other),
                Err(e) => log::warn!("{} host: could not list registered items: {}", protocol, e),
            },
            Purpose::ItemProperty { item, property } => self.on_property(&item, property, result),
            Purpose::ResolvePath { item } => self.on_resolved_path(&item, result),
            Purpose::Layout { item, parent } => self.on_layout(&item, parent, result),
            Purpose::AboutToShow { item, id } => self.on_about_to_show(&item, id, result),
            Purpose::MenuThemePath { item } => self.on_menu_theme_path(&item, result),
        }
    }

    fn handle_signal(&mut self, listener: Listener, signal: Signal) {
        match (listener, signal) {
            (Listener::Watcher(protocol), Signal::ItemRegistered(service)) => self.add_item(protocol, &service),
            (Listener::Watcher(protocol), Signal::ItemUnregistered(service)) => {
                if let Some(id) = canonical_id(protocol, None, &service) {
                    self.remove_item(&id);
                }
            }
            (Listener::NameOwner, Signal::NameOwnerChanged { name, new_owner, .. }) => {
                self.on_name_owner_changed(&name, &new_owner)
            }
            (Listener::Item(item), signal) => self.on_item_signal(&item, signal),
            (Listener::Menu(item), signal) => self.on_menu_signal(&item, signal),
            (listener, signal) => log::debug!("ignoring {:?} for {:?}", signal, listener),
        }
    }

    // ------------------------------------------------------------------------
    // host registration

    fn on_host_name(&mut self, protocol: Protocol, result: std::result::Result<Reply, BusError>) {
        match result {
            Ok(Reply::NameAcquired(true)) => {
                let name = protocol.host_service(self.pid);
                log::info!("{} host: acquired {}", protocol, name);
                self.registry.host_mut(protocol).name = Some(name);
                self.register_host(protocol);
            }
            Ok(Reply::NameAcquired(false)) => self.disable_host(protocol, "the name is already taken"),
            Ok(other) => {
                unexpected(other);
                self.disable_host(protocol, "unexpected reply to RequestName");
            }
            Err(e) => self.disable_host(protocol, &e.to_string()),
        }
    }

    fn disable_host(&mut self, protocol: Protocol, reason: &str) {
        log::error!("{} host: cannot become a StatusNotifierHost ({}), giving up on this namespace", protocol, reason);
        self.registry.host_mut(protocol).phase = HostPhase::Disabled;
        self.stop_listening(|listener| *listener == Listener::Watcher(protocol));
    }

    fn register_host(&mut self, protocol: Protocol) {
        let host = match self.registry.host(protocol).name.clone() {
            Some(host) => host,
            None => return,
        };
        self.registry.host_mut(protocol).phase = HostPhase::Registering;
        self.issue(Purpose::RegisterHost { protocol }, BusCall::RegisterHost { protocol, host });
    }

    fn on_host_registered(&mut self, protocol: Protocol, result: std::result::Result<Reply, BusError>) {
        match result {
            Ok(_) => {
                log::info!("{} host: registered with {}", protocol, protocol.watcher_bus());
                self.registry.host_mut(protocol).phase = HostPhase::Registered;
                self.issue(Purpose::WatcherItems { protocol }, BusCall::RegisteredItems { protocol });
            }
            Err(e) => {
                if e == BusError::PeerGone {
                    log::info!("{} host: no watcher yet, waiting for one", protocol);
                } else {
                    log::warn!("{} host: failed to register with the watcher: {}", protocol, e);
                }
                self.registry.host_mut(protocol).phase = HostPhase::WaitingForWatcher;
            }
        }
    }

    fn on_name_owner_changed(&mut self, name: &str, new_owner: &str) {
        for protocol in Protocol::ALL {
            if name != protocol.watcher_bus() {
                continue;
            }
            match self.registry.host(protocol).phase {
                HostPhase::Disabled | HostPhase::RequestingName => {}
                _ if new_owner.is_empty() => {
                    log::info!("{} host: watcher left the bus", protocol);
                    self.registry.host_mut(protocol).phase = HostPhase::WaitingForWatcher;
                }
                _ => {
                    log::info!("{} host: watcher changed owner, registering again", protocol);
                    self.register_host(protocol);
                }
            }
        }
        if new_owner.is_empty() {
            for item in self.registry.on_owner_lost(name) {
                self.teardown(item);
            }
        }
    }

    // ------------------------------------------------------------------------
    // items

    fn add_item(&mut self, protocol: Protocol, service: &str) {
        if self.registry.host(protocol).phase == HostPhase::Disabled {
            return;
        }
        if let Some(id) = self.registry.register_item(protocol, service) {
            self.changed(TrayChange::Added(id.clone()));
            self.watch_item(&id);
        }
    }

    fn watch_item(&mut self, id: &str) {
        let (address, properties) = match self.registry.get(id) {
            Some(item) => (item.address.clone(), item.initial_properties()),
            None => return,
        };
        self.listen(Listener::Item(id.to_owned()), SignalMatch::Item { address });
        self.fetch_properties(id, &properties);
    }

    fn fetch_properties(&mut self, id: &str, properties: &[ItemProperty]) {
        let address = match self.registry.get(id) {
            Some(item) => item.address.clone(),
            None => return,
        };
        for &property in properties {
            self.issue(
                Purpose::ItemProperty { item: id.to_owned(), property },
                BusCall::GetProperty { address: address.clone(), property },
            );
        }
    }

    fn remove_item(&mut self, id: &str) {
        if let Some(item) = self.registry.unregister_item(id) {
            self.teardown(item);
        }
    }

    /// Detach everything still pointing at an item that has left the registry.
    fn teardown(&mut self, item: TrayItem) {
        if self.popups.item() == Some(item.id.as_str()) {
            self.close_levels(0, menu_target(&item));
        }
        if self.opening.as_ref().map_or(false, |opening| opening.item == item.id) {
            self.opening = None;
        }
        for token in self.pending.detach_item(&item.id) {
            self.bus.cancel(token);
        }
        for id in self.subscriptions.remove_item(&item.id) {
            self.bus.unsubscribe(id);
        }
        self.menus.remove(&item.id);
        for spots in self.rows.values_mut() {
            spots.retain(|spot| spot.target != item.id);
        }
        self.changed(TrayChange::Removed(item.id));
    }

    fn on_property(&mut self, id: &str, property: ItemProperty, result: std::result::Result<Reply, BusError>) {
        let item = match self.registry.get_mut(id) {
            Some(item) => item,
            None => return,
        };
        let value = match result {
            Ok(Reply::Property(value)) => value,
            Ok(other) => return unexpected(other),
            Err(e) if e.is_unknown_object() && item.address.is_pathless() => {
                if !item.path_resolution_tried {
                    item.path_resolution_tried = true;
                    log::info!("item {} has nothing at {}, looking for it", id, item.address.path);
                    let service = item.address.service.clone();
                    self.issue(Purpose::ResolvePath { item: id.to_owned() }, BusCall::ResolveItemPath { service });
                }
                return;
            }
            Err(e) if e.is_missing() => {
                log::debug!("item {} has no {}", id, property);
                None
            }
            Err(e) => {
                log::warn!("item {}: failed to get {}: {}", id, property, e);
                return;
            }
        };

        let old_menu = menu_target(item);
        if !item.apply_property(property, value) {
            return;
        }
        let new_menu = menu_target(item);
        self.changed(TrayChange::Updated(id.to_owned()));
        if property == ItemProperty::Menu {
            self.watch_menu(id, old_menu, new_menu);
        }
    }

    fn watch_menu(&mut self, id: &str, old: Option<(String, String)>, new: Option<(String, String)>) {
        self.stop_listening(|listener| matches!(listener, Listener::Menu(item) if item == id));
        if self.menus.remove(id).is_some() && self.popups.item() == Some(id) {
            self.close_levels(0, old);
        }
        if let Some(item) = self.registry.get_mut(id) {
            item.menu_icon_theme_paths.clear();
        }
        if let Some((service, path)) = new {
            self.listen(Listener::Menu(id.to_owned()), SignalMatch::Menu { service: service.clone(), path: path.clone() });
            self.issue(Purpose::MenuThemePath { item: id.to_owned() }, BusCall::MenuIconThemePath { service, path });
        }
    }

    fn on_menu_theme_path(&mut self, id: &str, result: std::result::Result<Reply, BusError>) {
        let paths: Vec<PathBuf> = match result {
            Ok(Reply::ThemePaths(paths)) => paths.into_iter().filter(|p| !p.is_empty()).map(PathBuf::from).collect(),
            Ok(other) => return unexpected(other),
            Err(e) if e.is_missing() => return,
            Err(e) => {
                log::debug!("could not get the icon theme path of the menu of {}: {}", id, e);
                return;
            }
        };
        match self.registry.get_mut(id) {
            Some(item) if item.menu_icon_theme_paths != paths => item.menu_icon_theme_paths = paths,
            _ => return,
        }
        if self.popups.item() == Some(id) {
            self.redraw_popups();
        }
    }

    fn on_resolved_path(&mut self, id: &str, result: std::result::Result<Reply, BusError>) {
        match result {
            Ok(Reply::ItemPath(Some(address))) => {
                match self.registry.get_mut(id) {
                    Some(item) => {
                        log::info!("item {} lives at {}{} ({})", id, address.service, address.path, address.interface);
                        item.address = address;
                    }
                    None => return,
                }
                self.stop_listening(|listener| matches!(listener, Listener::Item(item) if item == id));
                self.watch_item(id);
            }
            Ok(Reply::ItemPath(None)) => log::warn!("no StatusNotifierItem found for {}", id),
            Ok(other) => unexpected(other),
            Err(e) => log::warn!("could not look for the StatusNotifierItem of {}: {}", id, e),
        }
    }

    fn on_item_signal(&mut self, id: &str, signal: Signal) {
        let properties: &[ItemProperty] = match signal {
            Signal::NewIcon => &[ItemProperty::IconName, ItemProperty::IconPixmap],
            Signal::NewAttentionIcon => &[ItemProperty::AttentionIconName, ItemProperty::AttentionIconPixmap],
            Signal::NewTitle => &[ItemProperty::Title],
            Signal::NewStatus(status) => {
                // the new status comes with the signal
                let value = Some(PropertyValue::Text(status));
                return self.on_property(id, ItemProperty::Status, Ok(Reply::Property(value)));
            }
            other => {
                log::debug!("ignoring {:?} from item {}", other, id);
                return;
            }
        };
        self.fetch_properties(id, properties);
    }

    // ------------------------------------------------------------------------
    // menus

    fn fetch_layout(&mut self, id: &str, parent: i32) -> bool {
        let (service, path) = match self.registry.get(id).and_then(menu_target) {
            Some(target) => target,
            None => return false,
        };
        self.issue(Purpose::Layout { item: id.to_owned(), parent }, BusCall::GetLayout { service, path, parent });
        true
    }

    fn about_to_show(&mut self, id: &str, menu: i32) -> bool {
        let (service, path) = match self.registry.get(id).and_then(menu_target) {
            Some(target) => target,
            None => return false,
        };
        self.issue(Purpose::AboutToShow { item: id.to_owned(), id: menu }, BusCall::AboutToShow { service, path, id: menu });
        true
    }

    /// Fetch the whole menu of an item again. Returns `false` if the item has no menu.
    pub fn refresh_menu(&mut self, id: &str) -> bool {
        self.fetch_layout(id, ROOT_ID)
    }

    /// Send a DBusMenu event to an item. Returns `false` if the item has no menu.
    pub fn send_menu_event(&mut self, id: &str, menu: i32, kind: MenuEventKind) -> bool {
        match self.registry.get(id).and_then(menu_target) {
            Some((service, path)) => {
                self.bus.send(BusSend::MenuEvent { service, path, id: menu, kind, timestamp: self.last_input_time });
                true
            }
            None => false,
        }
    }

    fn on_menu_signal(&mut self, id: &str, signal: Signal) {
        match signal {
            Signal::LayoutUpdated { revision, parent } => {
                // menus that were never opened are fetched when they are
                let parent = match self.menus.get(id) {
                    Some(tree) if tree.get(parent).is_some() => parent,
                    Some(_) => ROOT_ID,
                    None => return,
                };
                log::debug!("menu of {} changed below {} (revision {})", id, parent, revision);
                self.fetch_layout(id, parent);
            }
            Signal::ItemsPropertiesUpdated { updated, removed } => {
                let changed = match self.menus.get_mut(id) {
                    Some(tree) => tree.update_properties(&updated, &removed),
                    None => return,
                };
                if !changed.is_empty() && self.popups.item() == Some(id) {
                    self.redraw_popups();
                }
            }
            other => log::debug!("ignoring {:?} from the menu of {}", other, id),
        }
    }

    fn on_layout(&mut self, id: &str, parent: i32, result: std::result::Result<Reply, BusError>) {
        let (revision, root) = match result {
            Ok(Reply::Layout { revision, root }) => (revision, root),
            Ok(other) => {
                unexpected(other);
                return self.abandon_opening(id, parent);
            }
            Err(e) => {
                log::warn!("menu of {}: failed to get the layout below {}: {}", id, parent, e);
                return self.abandon_opening(id, parent);
            }
        };
        if root.id != parent {
            log::warn!("menu of {}: asked for the layout below {}, got {}", id, parent, root.id);
            return self.abandon_opening(id, parent);
        }

        let removed = match self.menus.get_mut(id) {
            Some(tree) => match tree.replace_subtree(revision, root) {
                Ok(removed) => removed,
                Err(e) => {
                    log::warn!("menu of {}: {}", id, e);
                    return self.abandon_opening(id, parent);
                }
            },
            None if parent == ROOT_ID => {
                self.menus.insert(id.to_owned(), MenuTree::from_layout(revision, root));
                Vec::new()
            }
            None => {
                log::debug!("menu of {}: dropping a partial layout for a menu we don't have", id);
                return;
            }
        };
        log::debug!("menu of {} is now at revision {}", id, revision);

        if self.popups.item() == Some(id) {
            if let Some(level) = self.popups.nodes().iter().position(|node| removed.contains(&node.menu)) {
                self.close_popups_from(level);
            }
            self.redraw_popups();
        }
        self.continue_opening(id, parent);
    }

    fn on_about_to_show(&mut self, id: &str, menu: i32, result: std::result::Result<Reply, BusError>) {
        let needs_update = match result {
            Ok(Reply::NeedsUpdate(needs_update)) => needs_update,
            Ok(other) => {
                unexpected(other);
                false
            }
            Err(e) => {
                // plenty of items don't implement it
                log::debug!("AboutToShow({}) on the menu of {} failed: {}", menu, id, e);
                false
            }
        };
        let waiting = matches!(
            &self.opening,
            Some(opening) if opening.is_for(id, menu) && opening.stage == OpenStage::AboutToShow
        );
        if needs_update {
            if !self.fetch_layout(id, menu) {
                self.abandon_opening(id, menu);
            } else if waiting {
                if let Some(opening) = &mut self.opening {
                    opening.stage = OpenStage::Refresh;
                }
            }
        } else if waiting {
            self.finish_opening();
        }
    }

    fn continue_opening(&mut self, id: &str, menu: i32) {
        let stage = match &self.opening {
            Some(opening) if opening.is_for(id, menu) => opening.stage,
            _ => return,
        };
        match stage {
            OpenStage::FetchLayout => {
                if let Some(opening) = &mut self.opening {
                    opening.stage = OpenStage::AboutToShow;
                }
                if !self.about_to_show(id, menu) {
                    self.opening = None;
                }
            }
            OpenStage::Refresh => self.finish_opening(),
            OpenStage::AboutToShow => {}
        }
    }

    fn abandon_opening(&mut self, id: &str, menu: i32) {
        if matches!(&self.opening, Some(opening) if opening.is_for(id, menu)) {
            log::info!("not showing menu {} of {}", menu, id);
            self.opening = None;
        }
    }

    fn finish_opening(&mut self) {
        let opening = match self.opening.take() {
            Some(opening) => opening,
            None => return,
        };
        match opening.target {
            OpenTarget::Root { output, anchor } => self.show_root(&opening.item, output, anchor),
            OpenTarget::Submenu { level, id } => {
                if self.popups.item() == Some(opening.item.as_str()) {
                    self.show_submenu(level, id);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // popups

    /// Open the menu of `id` next to `anchor`, a rectangle in buffer pixels on the bar of `output`.
    pub fn open_menu(&mut self, id: &str, output: OutputId, anchor: Rect) {
        if self.popups.depth() > 0 {
            self.close_popups_from(0);
        }
        let has_tree = self.menus.contains_key(id);
        let stage = if has_tree { OpenStage::AboutToShow } else { OpenStage::FetchLayout };
        self.opening = Some(Opening { item: id.to_owned(), target: OpenTarget::Root { output, anchor }, stage });
        let issued = if has_tree { self.about_to_show(id, ROOT_ID) } else { self.fetch_layout(id, ROOT_ID) };
        if !issued {
            log::debug!("item {} has no menu", id);
            self.opening = None;
        }
    }

    fn layout(&self, item: &str, menu: i32, scale: i32) -> Option<MenuFrame> {
        let tree = self.menus.get(item)?;
        let dirs: Vec<PathBuf> = match self.registry.get(item) {
            Some(item) => item
                .menu_icon_theme_paths
                .iter()
                .chain(&item.icon_theme_paths)
                .chain(&self.config.icon_dirs)
                .cloned()
                .collect(),
            None => self.config.icon_dirs.clone(),
        };
        let theme = self.config.icon_theme.as_deref();
        let lookup = |name: &str, size: i32| self.icons.find_icon(theme, &dirs, name, size).map(|found| found.path);
        layout_menu(tree, menu, &*self.measure, &lookup, self.padding(), scale)
    }

    fn present(&mut self, request: &PopupRequest, frame: &MenuFrame) -> Option<SurfaceId> {
        let surface = match self.windowing.create_popup(request) {
            Ok(surface) => surface,
            Err(e) => {
                log::warn!("could not create a popup for menu {}: {}", frame.menu, e);
                return None;
            }
        };
        if let Err(e) = self.windowing.draw(surface, frame) {
            log::warn!("could not draw menu {}: {}", frame.menu, e);
            self.windowing.destroy_popup(surface);
            return None;
        }
        Some(surface)
    }

    fn show_root(&mut self, id: &str, output: OutputId, anchor: Rect) {
        if self.popups.depth() > 0 {
            self.close_popups_from(0);
        }
        let scale = self.outputs.get(&output).map_or(1, |info| info.scale);
        let frame = match self.layout(id, ROOT_ID, scale) {
            Some(frame) => frame,
            None => {
                log::info!("menu of {} is empty, not showing it", id);
                return;
            }
        };
        let request = root_request(output, anchor, &frame, self.config.position);
        let surface = match self.present(&request, &frame) {
            Some(surface) => surface,
            None => return,
        };
        self.popups.open_root(id, PopupNode { menu: ROOT_ID, surface, output, frame });
        self.send_menu_event(id, ROOT_ID, MenuEventKind::Opened);
    }

    /// Open the submenu of row `id` of the popup at `level`, replacing any other submenu open
    /// from that level.
    fn open_submenu(&mut self, level: usize, id: i32) {
        let item = match self.popups.item() {
            Some(item) => item.to_owned(),
            None => return,
        };
        if self.popups.node(level + 1).map_or(false, |child| child.menu == id) {
            return;
        }
        self.close_popups_from(level + 1);

        let populated = self.menus.get(&item).map_or(false, |tree| tree.children(id).any(|child| child.visible));
        if populated {
            self.show_submenu(level, id);
            self.about_to_show(&item, id);
        } else {
            self.opening =
                Some(Opening { item: item.clone(), target: OpenTarget::Submenu { level, id }, stage: OpenStage::AboutToShow });
            if !self.about_to_show(&item, id) {
                self.opening = None;
            }
        }
    }

    fn show_submenu(&mut self, level: usize, id: i32) {
        let (item, parent) = match (self.popups.item(), self.popups.node(level)) {
            (Some(item), Some(parent)) => (item.to_owned(), parent.clone()),
            _ => return,
        };
        if self.popups.depth() > level + 1 {
            self.close_popups_from(level + 1);
        }
        let row = match parent.frame.row(id) {
            Some(row) => row.clone(),
            None => return,
        };
        let frame = match self.layout(&item, id, parent.frame.scale) {
            Some(frame) => frame,
            None => {
                log::debug!("submenu {} of {} is empty", id, item);
                return;
            }
        };
        let request = submenu_request(&parent, &row, &frame, self.config.position);
        let surface = match self.present(&request, &frame) {
            Some(surface) => surface,
            None => return,
        };
        self.popups.push(PopupNode { menu: id, surface, output: parent.output, frame });
        self.send_menu_event(&item, id, MenuEventKind::Opened);
    }

    fn close_popups_from(&mut self, level: usize) {
        let target = self.popups.item().and_then(|item| self.registry.get(item)).and_then(menu_target);
        self.close_levels(level, target);
    }

    /// Close the popups at `level` and deeper, sending a `closed` event for each, deepest first.
    fn close_levels(&mut self, level: usize, target: Option<(String, String)>) {
        for node in self.popups.close_from(level, &mut self.windowing) {
            self.input.surface_gone(SurfaceRef::Popup(node.surface));
            if let Some((service, path)) = &target {
                self.bus.send(BusSend::MenuEvent {
                    service: service.clone(),
                    path: path.clone(),
                    id: node.menu,
                    kind: MenuEventKind::Closed,
                    timestamp: self.last_input_time,
                });
            }
        }
        if matches!(&self.opening, Some(Opening { target: OpenTarget::Submenu { level: parent, .. }, .. }) if *parent >= level)
        {
            self.opening = None;
        }
    }

    fn redraw_level(&mut self, level: usize) {
        if let Some(node) = self.popups.node(level) {
            if let Err(e) = self.windowing.draw(node.surface, &node.frame) {
                log::warn!("could not draw menu {}: {}", node.menu, e);
            }
        }
    }

    /// Lay out every open level again after the menu changed.
    fn redraw_popups(&mut self) {
        let item = match self.popups.item() {
            Some(item) => item.to_owned(),
            None => return,
        };
        for level in 0..self.popups.depth() {
            let (menu, scale, hovered) = match self.popups.node(level) {
                Some(node) => (node.menu, node.frame.scale, node.frame.hovered),
                None => break,
            };
            let mut frame = match self.layout(&item, menu, scale) {
                Some(frame) => frame,
                None => {
                    self.close_popups_from(level);
                    break;
                }
            };
            frame.hovered = hovered.filter(|id| frame.row(*id).map_or(false, MenuRow::is_interactive));
            if let Some(node) = self.popups.node_mut(level) {
                node.frame = frame;
            }
            self.redraw_level(level);
        }
    }

    /// The windowing layer dismissed one of our popups.
    pub fn popup_done(&mut self, surface: SurfaceId) {
        if self.popups.level_of(surface).is_some() {
            self.close_popups_from(0);
        }
    }

    /// The windowing layer wants a popup drawn again.
    pub fn popup_configured(&mut self, surface: SurfaceId) {
        if let Some(level) = self.popups.level_of(surface) {
            self.redraw_level(level);
        }
    }

    // ------------------------------------------------------------------------
    // bar

    pub fn set_output(&mut self, output: OutputId, info: OutputInfo) {
        self.outputs.insert(output, info);
    }

    pub fn remove_output(&mut self, output: OutputId) {
        self.outputs.remove(&output);
        self.rows.remove(&output);
        self.input.surface_gone(SurfaceRef::Bar(output));
        if self.popups.node(0).map_or(false, |root| root.output == output) {
            self.close_popups_from(0);
        }
        if matches!(&self.opening, Some(Opening { target: OpenTarget::Root { output: target, .. }, .. }) if *target == output) {
            self.opening = None;
        }
    }

    fn output_scale(&self, output: OutputId) -> i32 {
        self.outputs.get(&output).map_or(1, |info| info.scale.max(1))
    }

    /// Lay out the tray icons on `output`, right to left from its right edge. The returned
    /// hotspots stay valid until the next call.
    pub fn layout_row(&mut self, output: OutputId, bar_height: i32) -> Vec<RowIcon> {
        let info = match self.outputs.get(&output) {
            Some(info) => *info,
            None => return Vec::new(),
        };
        let scale = info.scale.max(1);
        let padding = self.padding() * scale;
        let height = bar_height * scale;
        let size = (height - 2 * padding).max(1);
        let width = size + 2 * padding;

        let mut x = info.width * scale;
        let mut icons = Vec::new();
        let mut spots = Vec::new();
        for item in self.registry.items_mut() {
            if !item.is_visible() {
                continue;
            }
            if !item.cached_icon().map_or(false, |icon| icon.covers(size)) {
                let icon = resolve_icon(&self.icons, self.config.icon_theme.as_deref(), &self.config.icon_dirs, item, size);
                item.icon = Some(icon);
            }
            x -= width;
            let rect = Rect::new(x, 0, width, height);
            spots.push(Hotspot { rect, target: item.id.clone() });
            icons.push(RowIcon {
                item: item.id.clone(),
                rect,
                icon: item.cached_icon().and_then(|icon| icon.image.clone()),
                needs_attention: item.needs_attention(),
            });
        }
        self.rows.insert(output, spots);
        icons
    }

    fn click_item(&mut self, id: &str, output: OutputId, anchor: Rect, button: Button, x: i32, y: i32) {
        let item = match self.registry.get(id) {
            Some(item) => item,
            None => return,
        };
        let mut action = self.config.action_for(button);
        if action == ItemAction::Activate && item.item_is_menu {
            action = ItemAction::ContextMenu;
        }
        let address = item.address.clone();
        let has_menu = item.menu_path.is_some();
        log::debug!("{} on {}: {}", button, id, action);

        let send = |method| BusSend::ItemMethod { address: address.clone(), method, x, y };
        let scroll = |delta, orientation| BusSend::Scroll { address: address.clone(), delta, orientation };
        match action {
            ItemAction::None => {}
            ItemAction::Activate => self.bus.send(send(ItemMethod::Activate)),
            ItemAction::SecondaryActivate => self.bus.send(send(ItemMethod::SecondaryActivate)),
            ItemAction::ContextMenu if has_menu => self.open_menu(id, output, anchor),
            ItemAction::ContextMenu => self.bus.send(send(ItemMethod::ContextMenu)),
            ItemAction::ScrollUp => self.bus.send(scroll(-1, Orientation::Vertical)),
            ItemAction::ScrollDown => self.bus.send(scroll(1, Orientation::Vertical)),
            ItemAction::ScrollLeft => self.bus.send(scroll(-1, Orientation::Horizontal)),
            ItemAction::ScrollRight => self.bus.send(scroll(1, Orientation::Horizontal)),
        }
    }

    fn click_bar(&mut self, output: OutputId, button: Button, x: f64, y: f64) -> bool {
        let scale = f64::from(self.output_scale(output));
        let (id, anchor) = match self.rows.get(&output).and_then(|spots| hit(spots, x * scale, y * scale)) {
            Some(spot) => (spot.target.clone(), spot.rect),
            None => return false,
        };
        self.click_item(&id, output, anchor, button, x as i32, y as i32);
        true
    }

    // ------------------------------------------------------------------------
    // input

    fn hit_popup(&self, level: usize, x: f64, y: f64) -> Option<i32> {
        let node = self.popups.node(level)?;
        let scale = f64::from(node.frame.scale);
        let spots = node.frame.hotspots();
        hit(&spots, x * scale, y * scale).map(|spot| spot.target)
    }

    fn is_submenu(&self, menu: i32) -> bool {
        self.popups
            .item()
            .and_then(|item| self.menus.get(item))
            .and_then(|tree| tree.get(menu))
            .map_or(false, MenuItem::is_submenu)
    }

    fn hover(&mut self, surface: SurfaceId, x: f64, y: f64) {
        let level = match self.popups.level_of(surface) {
            Some(level) => level,
            None => return,
        };
        let target = self.hit_popup(level, x, y);
        let previous = self.popups.node(level).and_then(|node| node.frame.hovered);
        if target == previous {
            return;
        }
        if let Some(node) = self.popups.node_mut(level) {
            node.frame.hovered = target;
        }
        self.redraw_level(level);

        if self.popups.node(level + 1).map_or(false, |child| Some(child.menu) != target) {
            self.close_popups_from(level + 1);
        }
        if let Some(id) = target {
            if let Some(item) = self.popups.item().map(str::to_owned) {
                self.send_menu_event(&item, id, MenuEventKind::Hovered);
            }
            if self.is_submenu(id) {
                self.open_submenu(level, id);
            }
        }
    }

    fn popup_enter(&mut self, surface: SurfaceId, x: f64, y: f64) {
        let level = match self.popups.level_of(surface) {
            Some(level) => level,
            None => return,
        };
        let target = self.hit_popup(level, x, y);
        if self.popups.node(level + 1).map_or(false, |child| Some(child.menu) != target) {
            self.close_popups_from(level + 1);
        }
        self.hover(surface, x, y);
    }

    fn popup_leave(&mut self, surface: SurfaceId) {
        let level = match self.popups.level_of(surface) {
            Some(level) => level,
            None => return,
        };
        let hovered = self.popups.node_mut(level).and_then(|node| node.frame.hovered.take());
        if hovered.is_some() {
            self.redraw_level(level);
        }
    }

    fn click_popup(&mut self, surface: SurfaceId, x: f64, y: f64) {
        let level = match self.popups.level_of(surface) {
            Some(level) => level,
            None => return,
        };
        // separators, disabled rows and padding do nothing
        let id = match self.hit_popup(level, x, y) {
            Some(id) => id,
            None => return,
        };
        if self.is_submenu(id) {
            self.open_submenu(level, id);
        } else {
            if let Some(item) = self.popups.item().map(str::to_owned) {
                self.send_menu_event(&item, id, MenuEventKind::Clicked);
            }
            self.close_popups_from(0);
        }
    }

    fn press(&mut self, focus: Option<SurfaceRef>, button: Button, x: f64, y: f64) -> bool {
        match focus {
            Some(SurfaceRef::Popup(surface)) if self.popups.level_of(surface).is_some() => {
                self.click_popup(surface, x, y);
                true
            }
            Some(SurfaceRef::Bar(output)) if self.popups.depth() == 0 => self.click_bar(output, button, x, y),
            _ if self.popups.depth() > 0 => {
                // click outside of the menu
                self.close_popups_from(0);
                true
            }
            _ => false,
        }
    }

    /// Act on a pointer event. Returns whether the tray consumed it.
    pub fn handle_pointer(&mut self, seat: SeatId, event: PointerEvent) -> bool {
        let state = self.input.track_pointer(seat, &event);
        match event {
            PointerEvent::Enter { surface: SurfaceRef::Popup(surface), x, y } => {
                self.popup_enter(surface, x, y);
                true
            }
            PointerEvent::Leave { surface: SurfaceRef::Popup(surface) } => {
                self.popup_leave(surface);
                true
            }
            PointerEvent::Enter { .. } | PointerEvent::Leave { .. } => false,
            PointerEvent::Motion { x, y, time } => {
                self.last_input_time = time;
                match state.focus {
                    Some(SurfaceRef::Popup(surface)) => {
                        self.hover(surface, x, y);
                        true
                    }
                    _ => false,
                }
            }
            PointerEvent::Button { button, pressed, time } => {
                self.last_input_time = time;
                if pressed {
                    self.press(state.focus, button, state.x, state.y)
                } else {
                    matches!(state.focus, Some(SurfaceRef::Popup(_)))
                }
            }
            PointerEvent::Axis { orientation, value, time } => {
                self.last_input_time = time;
                match state.focus {
                    // popups don't scroll
                    Some(SurfaceRef::Popup(_)) => true,
                    Some(SurfaceRef::Bar(output)) => match scroll_button(orientation, value) {
                        Some(button) => self.click_bar(output, button, state.x, state.y),
                        None => false,
                    },
                    None => false,
                }
            }
        }
    }

    /// Act on a touch event. A touch down is a left click, everything else is only tracked.
    pub fn handle_touch(&mut self, seat: SeatId, event: TouchEvent) -> bool {
        let point = self.input.track_touch(seat, &event);
        match (event, point) {
            (TouchEvent::Down { time, .. }, Some(point)) => {
                self.last_input_time = time;
                self.press(Some(point.surface), Button::Left, point.x, point.y)
            }
            (_, Some(point)) => matches!(point.surface, SurfaceRef::Popup(_)),
            (_, None) => false,
        }
    }
}
