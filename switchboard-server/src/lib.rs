pub mod http;
pub mod router;
pub mod server;
pub mod service;
pub mod subsystems;

pub use service::SessionService;
pub use subsystems::lifecycle::SessionController;
