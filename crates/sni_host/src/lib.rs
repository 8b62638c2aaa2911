//! The system tray of a status bar: a StatusNotifierHost for both the `org.kde` and the
//! `org.freedesktop` namespace, an optional StatusNotifierWatcher, and DBusMenu popups.
//!
//! The [`Tray`] holds all state and runs on one thread. It talks to the session bus through the
//! [`bus::Bus`] trait and to the compositor through [`popup::Windowing`], so both can be swapped
//! out; [`dbus::ZbusBus`] is the implementation on top of zbus.

pub mod bus;
pub mod config;
pub mod dbus;
pub mod error;
pub mod icon;
pub mod input;
pub mod menu;
pub mod names;
pub mod popup;

mod pending;

mod host;
pub use host::*;

mod item;
pub use item::*;

mod tray;
pub use tray::*;

mod watcher;
pub use watcher::*;

pub use error::{Error, Result};
