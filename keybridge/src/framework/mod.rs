pub mod logging;
pub mod midi;
pub mod osc;
pub mod prelude;
pub mod util;
pub mod websocket;
