//! MQTT transport: telemetry subscription and alert publishing.
//!
//! TLS 1.2 with the plant CA bundle plus client certificate and key from
//! `CERT_DIR`; hostname verification stays on unless explicitly disabled.
//! Reconnection uses exponential backoff from 1 s doubling to 60 s, and the
//! session is persistent (`clean_session = false`) so the QoS 1 telemetry
//! subscription survives broker restarts.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use paho_mqtt as mqtt;
use tracing::{info, warn};

use crate::config::defaults::{RECONNECT_MAX_SECS, RECONNECT_MIN_SECS};
use crate::config::EngineConfig;
use crate::pipeline::source::{ReportSink, SourceEvent, TelemetrySource};
use crate::types::{StatusReport, TelemetrySample};

/// Telemetry subscription half of the broker connection.
pub struct MqttSource {
    stream: mqtt::AsyncReceiver<Option<mqtt::Message>>,
    _client: mqtt::AsyncClient,
}

/// Publishing half of the broker connection.
pub struct MqttSink {
    client: mqtt::AsyncClient,
    alerts_topic: String,
}

/// Connect, subscribe to the telemetry topic at QoS 1, and split the
/// connection into its source and sink halves.
pub async fn connect(config: &EngineConfig) -> anyhow::Result<(MqttSource, MqttSink)> {
    connect_with_client_id(config, &config.identity.pump_id, true).await
}

/// Publisher-only connection: no telemetry subscription (synthetic publisher).
pub async fn connect_publisher(config: &EngineConfig) -> anyhow::Result<MqttSink> {
    let client_id = format!("{}_publisher", config.identity.pump_id);
    let (_source, sink) = connect_with_client_id(config, &client_id, false).await?;
    Ok(sink)
}

async fn connect_with_client_id(
    config: &EngineConfig,
    client_id: &str,
    subscribe: bool,
) -> anyhow::Result<(MqttSource, MqttSink)> {
    let scheme = if config.mqtt.use_tls { "ssl" } else { "tcp" };
    let uri = format!("{scheme}://{}:{}", config.mqtt.broker, config.mqtt.port);

    let create_opts = mqtt::CreateOptionsBuilder::new()
        .server_uri(&uri)
        .client_id(client_id)
        .finalize();
    let mut client =
        mqtt::AsyncClient::new(create_opts).context("failed to create MQTT client")?;
    let stream = client.get_stream(256);

    let mut conn_builder = mqtt::ConnectOptionsBuilder::new();
    conn_builder
        .keep_alive_interval(Duration::from_secs(config.mqtt.keepalive_secs))
        .clean_session(false)
        .automatic_reconnect(
            Duration::from_secs(RECONNECT_MIN_SECS),
            Duration::from_secs(RECONNECT_MAX_SECS),
        );

    if config.mqtt.use_tls {
        let mut ssl_builder = mqtt::SslOptionsBuilder::new();
        ssl_builder
            .trust_store(config.ca_cert_path())
            .context("CA bundle not readable")?
            .key_store(config.client_cert_path())
            .context("client certificate not readable")?
            .private_key(config.client_key_path())
            .context("client key not readable")?
            .ssl_version(mqtt::SslVersion::Tls_1_2)
            .verify(!config.mqtt.tls_insecure)
            .enable_server_cert_auth(!config.mqtt.tls_insecure);
        conn_builder.ssl_options(ssl_builder.finalize());
        if config.mqtt.tls_insecure {
            warn!("TLS hostname verification disabled (mqtt.tls_insecure = true)");
        }
    } else {
        warn!("TLS disabled (mqtt.use_tls = false) — local development mode");
    }

    client
        .connect(conn_builder.finalize())
        .await
        .with_context(|| format!("failed to connect to broker {uri}"))?;
    info!(broker = %uri, "Connected to broker");

    if subscribe {
        let telemetry_topic = config.topic_telemetry();
        client
            .subscribe(&telemetry_topic, mqtt::QOS_1)
            .await
            .with_context(|| format!("failed to subscribe to {telemetry_topic}"))?;
        info!(topic = %telemetry_topic, "Subscribed to telemetry");
    }

    let sink = MqttSink {
        client: client.clone(),
        alerts_topic: config.topic_alerts(),
    };
    let source = MqttSource {
        stream,
        _client: client,
    };
    Ok((source, sink))
}

#[async_trait]
impl TelemetrySource for MqttSource {
    async fn next_sample(&mut self) -> anyhow::Result<SourceEvent> {
        loop {
            match self.stream.recv().await {
                Ok(Some(message)) => match TelemetrySample::from_payload(message.payload()) {
                    Ok(sample) => return Ok(SourceEvent::Sample(sample)),
                    Err(e) => {
                        // Decode failures are logged and the message dropped.
                        warn!(topic = message.topic(), error = %e, "Undecodable telemetry payload");
                    }
                },
                Ok(None) => {
                    // Connection lost; the client is already reconnecting with
                    // exponential backoff. The stream resumes on reconnect.
                    warn!("Broker connection lost — reconnecting with backoff");
                }
                Err(_) => return Ok(SourceEvent::Eof),
            }
        }
    }

    fn source_name(&self) -> &str {
        "MQTT"
    }
}

#[async_trait]
impl ReportSink for MqttSink {
    async fn publish_report(&self, report: &StatusReport) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&report.to_alert_payload())?;
        let message = mqtt::Message::new(&self.alerts_topic, payload, mqtt::QOS_1);
        self.client
            .publish(message)
            .await
            .context("alert publish failed")?;
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "MQTT"
    }
}

/// Publish one raw telemetry sample (synthetic publisher command).
pub async fn publish_telemetry(
    client: &MqttSink,
    topic: &str,
    sample: &TelemetrySample,
) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(sample)?;
    let message = mqtt::Message::new(topic, payload, mqtt::QOS_1);
    client.client.publish(message).await.context("telemetry publish failed")?;
    Ok(())
}

/// Disconnect cleanly, draining the client loop.
pub async fn disconnect(sink: &MqttSink) {
    let _ = sink.client.disconnect(None).await;
}
