use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PulseError, Result};
use crate::types::{Command, CorrelationId, MetricsSnapshot};

/// Named metric requests the remote entity answers with `<name>Metrics`-style events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsRequest {
    System,
    Hardware,
    Ml,
    Cpu,
    Memory,
    Disk,
    Network,
    ResponseTime,
    ErrorRate,
    Throughput,
    Availability,
}

impl MetricsRequest {
    pub fn event(&self) -> &'static str {
        match self {
            MetricsRequest::System => "requestSystemMetrics",
            MetricsRequest::Hardware => "requestHardwareMetrics",
            MetricsRequest::Ml => "requestMLMetrics",
            MetricsRequest::Cpu => "requestCPUMetrics",
            MetricsRequest::Memory => "requestMemoryMetrics",
            MetricsRequest::Disk => "requestDiskMetrics",
            MetricsRequest::Network => "requestNetworkMetrics",
            MetricsRequest::ResponseTime => "requestResponseTime",
            MetricsRequest::ErrorRate => "requestErrorRate",
            MetricsRequest::Throughput => "requestThroughput",
            MetricsRequest::Availability => "requestAvailability",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeTarget {
    Cpu,
    Memory,
    Network,
}

impl OptimizeTarget {
    pub fn event(&self) -> &'static str {
        match self {
            OptimizeTarget::Cpu => "optimizeCPU",
            OptimizeTarget::Memory => "optimizeMemory",
            OptimizeTarget::Network => "optimizeNetwork",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "cpu" => Some(OptimizeTarget::Cpu),
            "memory" => Some(OptimizeTarget::Memory),
            "network" => Some(OptimizeTarget::Network),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    pub fn request(event: &str, id: CorrelationId, data: Value) -> Self {
        Self {
            event: event.to_string(),
            id: Some(id),
            data,
        }
    }

    pub fn command(id: CorrelationId, command: &Command) -> Result<Self> {
        Ok(Self::request("command", id, serde_json::to_value(command)?))
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
    event: String,
    #[serde(default)]
    id: Option<CorrelationId>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct AckBody {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug)]
pub enum ServerEvent {
    Connect,
    Disconnect,
    Error(String),
    Snapshot(MetricsSnapshot),
    /// Command acknowledgement. `Err` holds the remote's reason.
    Ack {
        id: CorrelationId,
        reply: std::result::Result<Value, String>,
    },
    /// Answer to a named request, e.g. `diskMetrics`.
    Response {
        id: CorrelationId,
        event: String,
        data: Value,
    },
    Other(String),
}

pub fn decode(text: &str) -> Result<ServerEvent> {
    let frame: ServerFrame = serde_json::from_str(text)?;

    let event = match (frame.event.as_str(), frame.id) {
        ("ack", Some(id)) => {
            let body: AckBody = serde_json::from_value(frame.data)?;
            let reply = if body.success {
                Ok(body.data)
            } else {
                Err(body.error.unwrap_or_else(|| "unspecified error".to_string()))
            };
            ServerEvent::Ack { id, reply }
        }
        ("ack", None) => return Err(PulseError::Codec("ack without id".to_string())),
        (_, Some(id)) => ServerEvent::Response {
            id,
            event: frame.event,
            data: frame.data,
        },
        ("metrics" | "systemMetrics" | "update", None) => {
            ServerEvent::Snapshot(serde_json::from_value(frame.data)?)
        }
        ("connect", None) => ServerEvent::Connect,
        ("disconnect", None) => ServerEvent::Disconnect,
        ("error", None) => ServerEvent::Error(match frame.data {
            Value::String(message) => message,
            other => other.to_string(),
        }),
        (_, None) => ServerEvent::Other(frame.event),
    };

    Ok(event)
}
