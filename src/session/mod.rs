//! # Session Module
//!
//! Session lifecycle for the recording client:
//! - Session identity and metadata
//! - User id and attributes
//! - Start/stop/destroy of the capture and upload pipeline
//! - Process-wide instance registry

pub mod context;
pub mod manager;
pub mod registry;

pub use context::{
    Attributes, HostEnvironment, PageInfo, SessionContext, SessionMetadata, SessionSnapshot,
    StaticHost, Viewport,
};
pub use manager::{SessionManager, SessionState};
