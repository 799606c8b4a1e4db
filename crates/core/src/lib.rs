//! Quill domain core.
//!
//! Zero internal dependencies: the types and pure rules shared by the
//! persistence layer and the notification engine.

pub mod attributes;
pub mod channels;
pub mod digest;
pub mod error;
pub mod event_types;
pub mod preferences;
pub mod quiet_hours;
pub mod subscription;
pub mod types;
