pub mod history;
pub mod message;
pub mod settings;
pub mod subscription;
pub mod trip;
