//! The session bus as seen by the tray.
//!
//! Everything the tray needs from D-Bus goes through the [`Bus`] trait. Calls are fired off with a
//! [`Token`] and complete later, on the same thread, as a [`BusEvent::Reply`] carrying that token.
//! This keeps the tray free of callbacks holding references into its own state: a completion is
//! just a message that gets looked up in the pending-operation table, and dropped if nobody is
//! waiting for it anymore.

use crate::{
    error::BusError,
    item::{ItemAddress, ItemProperty, PropertyValue},
    menu::{LayoutNode, PropertyMap},
    names::Protocol,
};

/// Identifies one in-flight method call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("call#{_0}")]
pub struct Token(pub u64);

/// Identifies one signal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("sub#{_0}")]
pub struct SubscriptionId(pub u64);

/// Method calls that produce a [`Reply`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    /// Request a well known name, without queueing. Replies [`Reply::NameAcquired`].
    RequestName { name: String },
    /// `RegisterStatusNotifierHost` on the watcher of `protocol`. Replies [`Reply::Done`].
    RegisterHost { protocol: Protocol, host: String },
    /// The watcher's `RegisteredStatusNotifierItems` property. Replies [`Reply::Items`].
    RegisteredItems { protocol: Protocol },
    /// One property of a StatusNotifierItem. Replies [`Reply::Property`].
    GetProperty { address: ItemAddress, property: ItemProperty },
    /// Find the object implementing an item interface by walking introspection data. Replies
    /// [`Reply::ItemPath`].
    ResolveItemPath { service: String },
    /// DBusMenu `GetLayout(parent, -1, [])`. Replies [`Reply::Layout`].
    GetLayout { service: String, path: String, parent: i32 },
    /// DBusMenu `AboutToShow(id)`. Replies [`Reply::NeedsUpdate`].
    AboutToShow { service: String, path: String, id: i32 },
    /// The menu object's `IconThemePath` property. Replies [`Reply::ThemePaths`].
    MenuIconThemePath { service: String, path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    NameAcquired(bool),
    Done,
    Items(Vec<String>),
    /// `None` when the item returned a value of an unexpected type.
    Property(Option<PropertyValue>),
    ItemPath(Option<ItemAddress>),
    Layout { revision: u32, root: LayoutNode },
    NeedsUpdate(bool),
    ThemePaths(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MenuEventKind {
    Opened,
    Closed,
    Clicked,
    Hovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
pub enum ItemMethod {
    Activate,
    SecondaryActivate,
    ContextMenu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Orientation {
    Vertical,
    Horizontal,
}

/// Fire and forget calls. Failures are only logged by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum BusSend {
    /// DBusMenu `Event(id, kind, variant 0, timestamp)`.
    MenuEvent { service: String, path: String, id: i32, kind: MenuEventKind, timestamp: u32 },
    ItemMethod { address: ItemAddress, method: ItemMethod, x: i32, y: i32 },
    Scroll { address: ItemAddress, delta: i32, orientation: Orientation },
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalMatch {
    /// `StatusNotifierItemRegistered` / `StatusNotifierItemUnregistered`.
    Watcher { protocol: Protocol },
    /// `NameOwnerChanged` from the bus daemon.
    NameOwnerChanged,
    /// `NewIcon`, `NewAttentionIcon`, `NewStatus` and `NewTitle` on one item.
    Item { address: ItemAddress },
    /// `LayoutUpdated` and `ItemsPropertiesUpdated` on one menu object.
    Menu { service: String, path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    ItemRegistered(String),
    ItemUnregistered(String),
    NameOwnerChanged { name: String, old_owner: String, new_owner: String },
    NewIcon,
    NewAttentionIcon,
    NewStatus(String),
    NewTitle,
    LayoutUpdated { revision: u32, parent: i32 },
    ItemsPropertiesUpdated { updated: Vec<(i32, PropertyMap)>, removed: Vec<(i32, Vec<String>)> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Reply { token: Token, result: Result<Reply, BusError> },
    Signal { subscription: SubscriptionId, signal: Signal },
    /// The connection is gone. Nothing on the tray can work anymore.
    Disconnected,
}

pub trait Bus {
    fn call(&mut self, token: Token, call: BusCall);
    fn send(&mut self, send: BusSend);
    fn subscribe(&mut self, id: SubscriptionId, rule: SignalMatch);
    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Stop waiting for a call. The reply, if it still arrives, is ignored either way.
    fn cancel(&mut self, _token: Token) {}
}
