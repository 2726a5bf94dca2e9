//! Built-in tools for the Ariadne agent.

pub mod os;

pub use os::OsControlTool;
