use thiserror::Error;

/// Errors reported by the session bus for a single call or signal.
///
/// These are always recovered locally: the operation that hit them is logged and abandoned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("{name}: {message}")]
    MethodError { name: String, message: String },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("peer disappeared before replying")]
    PeerGone,
    #[error("dbus transport error: {0}")]
    Transport(String),
}

impl BusError {
    /// The peer does not implement what we asked for. Usually means the property is simply not set.
    pub fn is_missing(&self) -> bool {
        match self {
            BusError::MethodError { name, message } => {
                matches!(
                    name.as_str(),
                    "org.freedesktop.DBus.Error.UnknownProperty"
                        | "org.freedesktop.DBus.Error.InvalidArgs"
                        | "org.freedesktop.DBus.Error.UnknownInterface"
                        | "org.freedesktop.DBus.Error.UnknownMethod"
                ) || message == "error occurred in Get" // reported by discord, blueman-applet
            }
            _ => false,
        }
    }

    /// Nothing is exported at the path we called, as happens for items registered by bus name only.
    pub fn is_unknown_object(&self) -> bool {
        match self {
            BusError::MethodError { name, .. } => matches!(
                name.as_str(),
                "org.freedesktop.DBus.Error.UnknownObject"
                    | "org.freedesktop.DBus.Error.UnknownInterface"
                    | "org.freedesktop.DBus.Error.UnknownMethod"
            ),
            _ => false,
        }
    }
}

impl From<zbus::Error> for BusError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, message, _) => {
                let name = name.to_string();
                if name == "org.freedesktop.DBus.Error.ServiceUnknown" || name == "org.freedesktop.DBus.Error.NoReply" {
                    BusError::PeerGone
                } else {
                    BusError::MethodError { name, message: message.unwrap_or_default() }
                }
            }
            zbus::Error::Variant(e) => BusError::Malformed(e.to_string()),
            zbus::Error::InvalidReply => BusError::Malformed("invalid reply".to_string()),
            other => BusError::Transport(other.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("surface error: {0}")]
pub struct SurfaceError(pub String);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error("lost connection to the session bus")]
    Disconnected,
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
