pub mod codec;
pub mod directive;
pub mod hours;
pub mod model;
pub mod resolver;
#[cfg(test)]
mod tests;

pub use codec::{Continuation, NodeRef};
pub use directive::{ResponseDirective, Step};
pub use model::{CallFlow, CallOutcome};
pub use resolver::{CallContext, Resolver};
