pub mod connection;
pub mod groups;
pub mod server;
