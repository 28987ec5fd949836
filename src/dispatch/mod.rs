//! Route registration on top of the event bus.
//!
//! ```rust,ignore
//! let server = create_server(ServerConfig::with_port(5000)).await?;
//! server
//!     .on(RouteOptions::new("/:collection/:id").method("GET"))?
//!     .subscribe(|ctx| async move {
//!         let _ = ctx.send(Payload::json(json!({ "id": ctx.param("id") })));
//!     });
//! ```

pub mod route;
pub mod server;

pub use route::{RouteId, RouteRegistration, RouteStream};
pub use server::{create_server, PreFactory, Server, ServerBuilder};
