pub mod api;
pub mod explorer;
pub mod ws;

pub use api::api_routes;
pub use explorer::explorer_routes;
pub use ws::{ws_handler, ws_root_handler};
