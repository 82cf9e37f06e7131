// Bridges `tracing` (and, through `tracing-log`, the `log` crate) into the
// dispatcher.

mod layer;
mod visitor;

pub use layer::ForwardingLayer;
