pub mod bridge;
pub mod callback;
pub mod events;
pub mod queue;
pub mod registry;
pub mod state;
