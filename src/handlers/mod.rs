pub mod api;
pub mod relay;

pub use relay::relay_handler;
