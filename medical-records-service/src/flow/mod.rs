//! Minimal task-graph engine driving one document through the pipeline.
//!
//! A [`Graph`] holds tasks keyed by id and the edges between them. Running a
//! graph walks from the start task, one task at a time, sharing a [`Context`]
//! between tasks until a task ends the run or no outgoing edge applies.

pub mod context;
pub mod error;
pub mod graph;
pub mod task;

pub use context::Context;
pub use error::{GraphError, Result};
pub use graph::{ExecutionResult, Graph, GraphBuilder};
pub use task::{NextAction, Task, TaskResult};
