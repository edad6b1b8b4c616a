pub mod handler;
pub mod protocol;
pub mod sink;
pub mod upstream;

pub use handler::ws_handler;
pub use upstream::upstream_handler;
