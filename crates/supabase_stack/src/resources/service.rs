use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{labels, meta};
use crate::stack::{Exposure, ServiceDefinition};

pub fn service(definition: &ServiceDefinition, namespace: &str) -> Service {
    let node_port = definition.exposure == Exposure::NodePort;

    let ports = definition
        .ports
        .iter()
        .map(|port| ServicePort {
            name: Some(port.name.clone()),
            port: port.container_port,
            target_port: Some(IntOrString::Int(port.container_port)),
            node_port: port.node_port.filter(|_| node_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: meta(
            &definition.name.service_host(),
            namespace,
            labels::service(definition.name),
        ),
        spec: Some(ServiceSpec {
            type_: Some(if node_port { "NodePort" } else { "ClusterIP" }.to_string()),
            selector: Some(labels::selector(definition.name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}
