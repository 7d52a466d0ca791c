use super::{stack_generation_annotations, stack_owner_reference, stack_selector_labels};
use crate::container::StackContainer;
use crate::domain::stackset::IngressBackendPort;
use crate::errors::*;
use k8s_openapi::api::core::v1::{PodTemplateSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Generates the desired Service for a Stack (spec §4.4).
///
/// `backend_port`, when present, must match one of the resulting ports by
/// integer or by name (spec §4.4 "port-mismatch") — otherwise this
/// returns `Err(ErrorKind::PortMismatch)` and the caller skips this
/// Stack's service generation for the tick.
pub fn generate(sc: &StackContainer, backend_port: Option<&IngressBackendPort>) -> Result<Service> {
    let ports = match &sc.stack.spec.service_ports {
        Some(ports) if !ports.is_empty() => ports.clone(),
        _ => synthesize_ports(&sc.stack.spec.pod_template),
    };

    if let Some(backend) = backend_port {
        if !ports.iter().any(|p| port_matches(p, backend)) {
            bail!(ErrorKind::PortMismatch(sc.name().to_string()));
        }
    }

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(sc.name().to_string()),
            namespace: sc.stack.metadata.namespace.clone(),
            labels: sc.stack.metadata.labels.clone(),
            annotations: Some(stack_generation_annotations(&sc.stack)),
            owner_references: Some(vec![stack_owner_reference(&sc.stack)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(stack_selector_labels(sc)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Synthesizes service ports from container ports in the pod template when
/// the Stack spec doesn't carry an explicit service block (spec §4.4).
pub fn synthesize_ports(pod_template: &PodTemplateSpec) -> Vec<ServicePort> {
    let containers = pod_template
        .spec
        .as_ref()
        .map(|p| p.containers.as_slice())
        .unwrap_or(&[]);

    let mut ports = Vec::new();
    for (container_idx, container) in containers.iter().enumerate() {
        for (port_idx, cp) in container.ports.iter().flatten().enumerate() {
            let name = cp
                .name
                .clone()
                .unwrap_or_else(|| format!("port-{container_idx}-{port_idx}"));
            ports.push(ServicePort {
                name: Some(name),
                protocol: Some(cp.protocol.clone().unwrap_or_else(|| "TCP".to_string())),
                port: cp.container_port,
                target_port: Some(IntOrString::Int(cp.container_port)),
                ..Default::default()
            });
        }
    }
    ports
}

fn port_matches(port: &ServicePort, backend: &IngressBackendPort) -> bool {
    match backend {
        IngressBackendPort::Number(n) => port.port == *n,
        IngressBackendPort::Name(name) => port.name.as_deref() == Some(name.as_str()),
    }
}
