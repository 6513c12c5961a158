pub mod buffer;
pub mod models;
pub mod settings;
