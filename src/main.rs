//! Demo: a tiny collections API on top of the dispatcher.
//!
//! ```text
//! GET  /:collection/:id   → { "data": <record> }
//! POST /:collection/:id   → 201 { "data": { "_id": 2, ...body } }
//! ```
//!
//! Collections are `users` and `posts`. A custom `pre` factory adds a
//! "collection model" stage after the standard preprocessors; requests for
//! unknown collections are dropped by it and fall through to the 404.

use std::path::PathBuf;

use clap::Parser;
use serde_json::{json, Map, Value};

use reactive_dispatch::config::{load_config, ServerConfig};
use reactive_dispatch::lifecycle::{shutdown_signal, Shutdown};
use reactive_dispatch::observability::init_logging;
use reactive_dispatch::pipeline::standard_pipeline;
use reactive_dispatch::{DispatchContext, Payload, RouteOptions, Server, Stage};

#[derive(Debug, Parser)]
#[command(name = "reactive-dispatch", about = "Reactive request dispatch demo")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener port.
    #[arg(short, long)]
    port: Option<u16>,
}

/// An in-memory stand-in for a data store.
#[derive(Debug, Clone, Copy)]
struct Collection {
    kind: &'static str,
    label_field: &'static str,
    label: &'static str,
}

impl Collection {
    fn by_name(name: &str) -> Option<Self> {
        match name {
            "users" => Some(Self {
                kind: "user",
                label_field: "name",
                label: "John Smith",
            }),
            "posts" => Some(Self {
                kind: "post",
                label_field: "title",
                label: "My post",
            }),
            _ => None,
        }
    }

    fn get(&self, id: &str) -> Value {
        let mut record = Map::new();
        record.insert("_id".to_string(), json!(id));
        record.insert(self.label_field.to_string(), json!(self.label));
        record.insert("type".to_string(), json!(self.kind));
        Value::Object(record)
    }

    fn set(&self, body: Option<&Value>) -> Value {
        let mut record = Map::new();
        record.insert("_id".to_string(), json!(2));
        if let Some(Value::Object(fields)) = body {
            record.extend(fields.clone());
        }
        Value::Object(record)
    }
}

fn collection_model() -> Stage {
    Stage::filter_map("collection-model", |ctx: DispatchContext| {
        let collection = Collection::by_name(ctx.param("collection")?)?;
        Some(ctx.with_extension(collection))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "reactive-dispatch starting");

    let shutdown = Shutdown::new();
    let server = Server::builder(config)
        .pre(|options| standard_pipeline(options).after(collection_model()))
        .shutdown(shutdown.clone())
        .bind()
        .await?;

    server
        .on(RouteOptions::new("/:collection/:id").method("GET"))?
        .subscribe(|ctx| async move {
            let (Some(collection), Some(id)) = (ctx.extension::<Collection>(), ctx.param("id"))
            else {
                return;
            };
            let data = collection.get(id);
            if let Err(e) = ctx.send(Payload::json(json!({ "data": data }))) {
                tracing::warn!(request_id = %ctx.request_id(), error = %e, "Send failed");
            }
        });

    server
        .on(RouteOptions::new("/:collection/:id").method("POST"))?
        .subscribe(|ctx| async move {
            let Some(collection) = ctx.extension::<Collection>() else {
                return;
            };
            let result = collection.set(ctx.body());
            let payload = Payload::json(json!({ "data": result })).header("code", "201");
            if let Err(e) = ctx.send(payload) {
                tracing::warn!(request_id = %ctx.request_id(), error = %e, "Send failed");
            }
        });

    tracing::info!(address = %server.local_addr(), "Demo routes ready");

    tokio::select! {
        _ = shutdown_signal() => shutdown.trigger(),
        _ = server.closed() => {}
    }
    server.closed().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
