pub mod definition;
pub mod events;
pub mod runner;
pub mod service;
pub mod traits;

#[allow(unused_imports)]
pub use definition::{AgentDefinition, AGENT_NAME, DEFAULT_INSTRUCTIONS};
#[allow(unused_imports)]
pub use events::{Content, Event, Part, Role};
pub use runner::Runner;
pub use service::AgentService;
#[allow(unused_imports)]
pub use traits::{AgentRunner, EventStream};
