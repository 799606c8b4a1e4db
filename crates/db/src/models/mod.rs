pub mod digest;
pub mod notification;
pub mod preference;
pub mod subscription;
