pub mod config;
pub mod error;
pub mod framework;
pub mod input;
pub mod midi;
pub mod prelude;
pub mod pubsub;
pub mod runtime;
pub mod surface;
pub mod websocket;

pub use runtime::bridge::Bridge;
