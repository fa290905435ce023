pub use crate::config::BridgeConfig;
pub use crate::error::{BridgeError, BridgeResult, status};
pub use crate::framework::logging::init_logger;
pub use crate::framework::logging::{debug, error, info, trace, warn};
pub use crate::input::{KeyDisposition, KeyInput, MouseState};
pub use crate::midi::MidiDevices;
pub use crate::runtime::bridge::Bridge;
pub use crate::runtime::callback::{Notification, Notifier};
pub use crate::runtime::events::{
    InboundEvent, KeyEvent, MidiMessage, PubSubMessage,
};
pub use crate::runtime::registry::{Handle, ResourceKind};
pub use crate::runtime::state::{MidiInputState, PortState, PubSubState};
pub use crate::surface::{DrawingSurface, Rect};
pub use crate::warn_once;
