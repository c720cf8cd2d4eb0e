pub mod client;
pub mod protocol;
pub mod server;

pub use client::ManagementClient;
pub use protocol::{Request, Response, WireError};
pub use server::ManagementServer;
