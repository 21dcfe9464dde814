mod dispatcher;
mod session;
mod topics;
pub mod types;

pub use dispatcher::Hub;
pub use session::initial as ws;
