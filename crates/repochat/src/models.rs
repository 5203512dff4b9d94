//! These models represent the objects passed around by the agent
//!
//! There are several different related formats we need to interact with:
//! - chat messages with role and text, sent from the client to the server
//! - event stream records, sent from the server to the client
//! - openai messages/tools, sent from the agent to the LLM
//! - MCP requests and results, exchanged with the tool providers
//!
//! We always immediately convert those data models into the internal structs
//! using to/from helpers, so the internal models are not an exact match to any
//! one of these formats.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
