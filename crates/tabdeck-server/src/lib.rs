pub mod connection;
pub mod display;
pub mod registry;
pub mod server;

pub use display::{DisplayBuilder, DisplaySnapshot};
pub use registry::{Mutation, Session, SessionRegistry};
pub use server::{start, ServerConfig, ServerHandle};
