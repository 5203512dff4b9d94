pub mod agent;
pub mod client;
pub mod context;
pub mod emitter;
pub mod errors;
pub mod framing;
pub mod models;
pub mod prompt_template;
pub mod protocol;
pub mod providers;
pub mod registry;
pub mod systems;
pub mod transport;
