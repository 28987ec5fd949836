//! Per-route transform pipelines.
//!
//! Every request is published as a [`DispatchContext`] to every route. Each
//! route runs its own copy of the stream through a [`TransformChain`]:
//!
//! ```text
//! EventBus ──► body-parser ──► query-splitter ──► param-extractor
//!                                                       │
//!          handler ◄── response-injector ◄── method-filter
//! ```
//!
//! Stages that drop a context simply mean "not this route". Stages that
//! fail raise a [`StageFault`], which travels down the stream to the route
//! where it is logged and the request's connection is closed.

pub mod chain;
pub mod context;
pub mod options;
pub mod preprocessors;
pub mod stage;

pub use chain::TransformChain;
pub use context::DispatchContext;
pub use options::{MethodSpec, ParseType, RouteOptions, UnknownParseType};
pub use preprocessors::{standard_pipeline, standard_preprocessors, Preprocessor};
pub use stage::{BoxError, ContextStream, Flow, Stage, StageFault, StagePanic};
