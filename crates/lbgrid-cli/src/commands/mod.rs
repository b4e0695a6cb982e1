pub mod init;
pub mod methods;
pub mod render;
