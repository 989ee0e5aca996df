//! # Events
//!
//! Inbound command parsing and dispatch, and outbound event publishing.
//!
//! Every event this agent cares about is named `mamiya:<kind>[:<action>]` and
//! carries a JSON object payload.

pub mod command;
pub mod router;
pub mod trigger;

pub use command::{decode_payload, EventFilter, EventMatcher, NameParse, ParsedCommand};
pub use router::{DispatchOutcome, EventRouter, FailureMode, IgnoreReason, RouterStats};
pub use trigger::{EventTrigger, OutboundEvent};
