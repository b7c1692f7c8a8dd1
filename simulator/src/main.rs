use anyhow::Context;
use ractor::Actor;
use serde_json::{Map, Value};
use shared_types::{EVENT_PIPELINE_ACQUIRED, EVENT_PIPELINE_RELEASED, SYSTEM_EVENTS_STREAM};
use simulator::actors::{OrchestratorActor, OrchestratorArguments, OrchestratorMsg};
use simulator::config::{load_config, load_env_file, SimulatorConfig};
use simulator::ports::MessageTransport;
use simulator::protocol::EventFactory;
use simulator::render::TracingRenderSink;
use simulator::transport::build_transport;
use tracing_subscriber::EnvFilter;

async fn send_system_event(
    transport: &dyn MessageTransport,
    factory: &EventFactory,
    kind: &str,
    fields: Map<String, Value>,
) {
    let event = match factory.new_event(kind, fields) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, kind = %kind, "Could not build system event");
            return;
        }
    };
    if let Err(e) = transport.send(SYSTEM_EVENTS_STREAM, &event).await {
        tracing::warn!(error = %e, kind = %kind, "Failed to send system event");
    }
}

fn stream_fields(config: &SimulatorConfig) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        "stream_uid".to_string(),
        Value::String(config.stream_id.clone()),
    );
    fields
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the event stream for the stdio transport; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    load_env_file();

    let config = load_config();
    config.validate().context("Invalid simulator configuration")?;

    let transport = build_transport(&config)
        .await
        .context("Failed to build transport")?;
    let factory = EventFactory::new(config.source_uid.clone());

    tracing::info!(
        stream_id = %config.stream_id,
        transport = %config.transport.kind,
        mode = %config.mode,
        "Simulator starting"
    );

    if config.create_pipeline {
        let mut fields = stream_fields(&config);
        fields.insert(
            "user_uid".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
        send_system_event(transport.as_ref(), &factory, EVENT_PIPELINE_ACQUIRED, fields).await;
    }

    let (orchestrator, handle) = Actor::spawn(
        Some(format!("orchestrator:{}", config.stream_id)),
        OrchestratorActor,
        OrchestratorArguments {
            transport: transport.clone(),
            render: Box::new(TracingRenderSink),
            config: config.clone(),
        },
    )
    .await
    .context("Failed to spawn orchestrator")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    if config.create_pipeline {
        send_system_event(
            transport.as_ref(),
            &factory,
            EVENT_PIPELINE_RELEASED,
            stream_fields(&config),
        )
        .await;
    }

    if let Some(path) = config.history_path.clone() {
        match ractor::call!(orchestrator, |reply| OrchestratorMsg::SaveHistory {
            path,
            reply
        }) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to save interaction history"),
            Err(e) => tracing::warn!(error = %e, "Orchestrator unavailable for history save"),
        }
    }

    orchestrator.stop(None);
    let _ = handle.await;
    tracing::info!("Simulator stopped");
    Ok(())
}
