//! Best-effort audit trail for registry mutations.
//!
//! Each mutation is written to an [`AuditLogger`] and then, if configured, flattened into a
//! `udp_events` row for downstream consumers. Neither write can fail the mutation that triggered
//! it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::metadata::UdpEventStore;
use crate::types::Principal;
use crate::Result;

pub const UDP_EVENT_TYPE_AUDITS: &str = "audits";
pub const MODULE: &str = "HAR";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Registry,
    Artifact,
    Version,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Registry => "REGISTRY",
            ResourceType::Artifact => "ARTIFACT",
            ResourceType::Version => "VERSION",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deleted,
    Restored,
}

/// The action name recorded in `udp_events`, eg `VERSION_DELETED`.
pub fn udp_action(resource_type: ResourceType, action: Action) -> String {
    let verb = match action {
        Action::Deleted => "DELETED",
        Action::Restored => "RESTORED",
    };
    format!("{}_{verb}", resource_type.as_str())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    pub resource_type: ResourceType,
    pub identifier: String,
    pub data: Vec<(String, String)>,
}

impl Resource {
    pub fn new(resource_type: ResourceType, identifier: &str) -> Self {
        Self {
            resource_type,
            identifier: identifier.to_string(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.push((key.to_string(), value.to_string()));
        self
    }
}

/// Optional details attached to an audit record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuditEvent {
    pub data: BTreeMap<String, String>,
    pub old_object: Option<Value>,
    pub new_object: Option<Value>,
    pub client_ip: Option<String>,
    pub request_method: Option<String>,
    pub correlation_id: Option<String>,
}

impl AuditEvent {
    pub fn with_data(mut self, key: &str, value: &str) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_old_object<T: Serialize>(mut self, object: &T) -> Result<Self> {
        self.old_object = Some(serde_json::to_value(object)?);
        Ok(self)
    }

    pub fn with_new_object<T: Serialize>(mut self, object: &T) -> Result<Self> {
        self.new_object = Some(serde_json::to_value(object)?);
        Ok(self)
    }

    pub fn with_request(mut self, method: &str, client_ip: &str) -> Self {
        self.request_method = Some(method.to_string());
        self.client_ip = Some(client_ip.to_string());
        self
    }

    pub fn with_correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_string());
        self
    }
}

/// The primary audit sink.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: Action,
        scope_path: &str,
        event: &AuditEvent,
    ) -> Result<()>;
}

/// Writes audit records to the `audit` tracing target.
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: Action,
        scope_path: &str,
        event: &AuditEvent,
    ) -> Result<()> {
        tracing::info!(
            target: "audit",
            principal = principal.uid.as_str(),
            resource_type = resource.resource_type.as_str(),
            resource = resource.identifier.as_str(),
            ?action,
            scope_path,
            data = ?event.data,
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditService {
    logger: Arc<dyn AuditLogger>,
    udp_events: Option<Arc<dyn UdpEventStore>>,
}

impl AuditService {
    pub fn new(logger: Arc<dyn AuditLogger>, udp_events: Option<Arc<dyn UdpEventStore>>) -> Self {
        Self { logger, udp_events }
    }

    /// Record a mutation. Failures are logged; the udp row is skipped when the primary audit
    /// write fails.
    pub async fn log(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: Action,
        scope_path: &str,
        event: AuditEvent,
    ) {
        if let Err(e) = self
            .logger
            .log(principal, resource, action, scope_path, &event)
            .await
        {
            tracing::warn!(
                resource = resource.identifier.as_str(),
                ?action,
                error = %e,
                "failed to write audit log"
            );
            return;
        }

        let Some(udp_events) = &self.udp_events else {
            return;
        };
        let payload = udp_payload(
            principal,
            resource,
            action,
            scope_path,
            &event,
            chrono::Utc::now().timestamp_millis(),
        );
        if let Err(e) = udp_events
            .insert_udp_event(UDP_EVENT_TYPE_AUDITS, &payload)
            .await
        {
            tracing::warn!(
                resource = resource.identifier.as_str(),
                ?action,
                error = %e,
                "failed to insert audit event into udp events"
            );
        }
    }
}

/// Split a space path (`account/org/project`) into its resource scope. Empty segments are
/// skipped and missing levels are reported as empty strings.
pub fn parse_resource_scope(space_path: &str) -> Value {
    let mut parts = space_path.split('/').filter(|p| !p.is_empty());
    let account = parts.next().unwrap_or_default();
    let org = parts.next().unwrap_or_default();
    let project = parts.next().unwrap_or_default();
    json!({
        "accountIdentifier": account,
        "orgIdentifier": org,
        "projectIdentifier": project,
    })
}

pub fn udp_payload(
    principal: &Principal,
    resource: &Resource,
    action: Action,
    scope_path: &str,
    event: &AuditEvent,
    timestamp: i64,
) -> Value {
    let mut labels = Map::new();
    labels.insert(
        String::from("resourceName"),
        Value::from(resource.identifier.as_str()),
    );
    for (k, v) in resource.data.iter() {
        labels.insert(k.clone(), Value::from(v.as_str()));
    }

    let mut payload = json!({
        "resourceScope": parse_resource_scope(scope_path),
        "httpRequestInfo": {
            "requestMethod": event.request_method.as_deref().unwrap_or_default(),
        },
        "requestMetadata": {
            "clientIP": event.client_ip.as_deref().unwrap_or_default(),
        },
        "timestamp": timestamp,
        "authenticationInfo": {
            "principal": {
                "type": principal.principal_type,
                "identifier": principal.email,
            },
            "labels": {
                "userId": principal.uid,
                "username": principal.display_name,
            },
        },
        "module": MODULE,
        "resource": {
            "type": resource.resource_type.as_str(),
            "identifier": resource.identifier,
            "labels": labels,
        },
        "action": udp_action(resource.resource_type, action),
    });

    if let Value::Object(map) = &mut payload {
        if !event.data.is_empty() {
            map.insert(String::from("internalInfo"), json!(event.data));
        }
        if let Some(old) = &event.old_object {
            map.insert(String::from("oldObject"), old.clone());
        }
        if let Some(new) = &event.new_object {
            map.insert(String::from("newObject"), new.clone());
        }
        if let Some(id) = &event.correlation_id {
            map.insert(String::from("correlationID"), Value::from(id.as_str()));
        }
    }
    payload
}
