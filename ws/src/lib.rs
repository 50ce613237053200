pub mod codec;
pub mod config;
pub mod decompress;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod fsm;
pub mod heartbeat;
pub mod session;
pub mod session_handle;
pub mod transport;

pub use config::*;
pub use discovery::*;
pub use error::*;
pub use fsm::*;
pub use session::*;
pub use session_handle::*;
