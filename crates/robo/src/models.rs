//! These models represent the objects that flow through a conversation.
//!
//! Their serialized form mirrors the Anthropic Messages API wire shape, which is
//! also the shape persisted in conversation logs. Backends that speak another
//! dialect convert at their own boundary.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
