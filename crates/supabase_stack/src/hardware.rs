//! Host capacity used to turn percentage resource targets into quantities.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use serde::Serialize;
use tracing::{debug, warn};

use crate::util::quantity::{parse_bytes, parse_millicores};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HardwareFacts {
    pub total_ram_bytes: u64,
    pub cpu_cores: f64,
}

impl HardwareFacts {
    /// What a single node can give to pods: `allocatable`, or `capacity` when
    /// the kubelet has not reported it. `None` when a quantity is unreadable.
    pub fn from_node(node: &Node) -> Option<Self> {
        let status = node.status.as_ref()?;
        let available = status.allocatable.as_ref().or(status.capacity.as_ref())?;
        let total_ram_bytes = parse_bytes(&available.get("memory")?.0)?;
        let millicores = parse_millicores(&available.get("cpu")?.0)?;
        #[allow(clippy::cast_precision_loss)]
        let cpu_cores = millicores as f64 / 1000.0;
        Some(HardwareFacts {
            total_ram_bytes,
            cpu_cores,
        })
    }

    /// The node with the most memory, CPU breaking ties. A pod lands on one
    /// node, so sizing against a sum of nodes would never schedule.
    pub fn largest<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Option<Self> {
        nodes
            .into_iter()
            .filter_map(HardwareFacts::from_node)
            .max_by(|a, b| {
                a.total_ram_bytes
                    .cmp(&b.total_ram_bytes)
                    .then(a.cpu_cores.total_cmp(&b.cpu_cores))
            })
    }
}

#[async_trait]
pub trait HardwareFactsProvider: Send + Sync {
    /// Facts for `host`, or for the largest node when `host` is `None`.
    async fn facts(&self, host: Option<&str>) -> Option<HardwareFacts>;
}

/// Fixed facts, or none at all.
#[derive(Clone, Debug, Default)]
pub struct StaticFacts(pub Option<HardwareFacts>);

#[async_trait]
impl HardwareFactsProvider for StaticFacts {
    async fn facts(&self, _host: Option<&str>) -> Option<HardwareFacts> {
        self.0
    }
}

/// Reads `status.allocatable` of cluster nodes.
#[derive(Clone)]
pub struct NodeFacts {
    client: kube::Client,
}

impl NodeFacts {
    pub fn new(client: kube::Client) -> Self {
        NodeFacts { client }
    }
}

#[async_trait]
impl HardwareFactsProvider for NodeFacts {
    async fn facts(&self, host: Option<&str>) -> Option<HardwareFacts> {
        let nodes: Api<Node> = Api::all(self.client.clone());

        let facts = match host {
            Some(host) => match nodes.get_opt(host).await {
                Ok(Some(node)) => HardwareFacts::from_node(&node),
                Ok(None) => {
                    warn!(host, "Node not found, falling back to default sizing");
                    None
                }
                Err(e) => {
                    warn!(host, error = %e, "Failed to read node capacity");
                    None
                }
            },
            None => match nodes.list(&ListParams::default()).await {
                Ok(list) => HardwareFacts::largest(&list.items),
                Err(e) => {
                    warn!(error = %e, "Failed to list nodes");
                    None
                }
            },
        };

        if let Some(facts) = &facts {
            debug!(
                ram_bytes = facts.total_ram_bytes,
                cpu_cores = facts.cpu_cores,
                "Read hardware facts"
            );
        }
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::sizing::size;
    use crate::stack::ResourceTargets;
    use crate::util::quantity::ResourceAmount;
    use k8s_openapi::api::core::v1::NodeStatus;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn quantities(memory: &str, cpu: &str) -> Option<BTreeMap<String, Quantity>> {
        Some(BTreeMap::from([
            ("memory".to_string(), Quantity(memory.to_string())),
            ("cpu".to_string(), Quantity(cpu.to_string())),
        ]))
    }

    fn node(memory: &str, cpu: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                capacity: quantities(memory, cpu),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn reads_node_capacity() {
        let facts = HardwareFacts::from_node(&node("32Gi", "8")).unwrap();
        assert_eq!(facts.total_ram_bytes, 32 * (1 << 30));
        assert_eq!(facts.cpu_cores, 8.0);
    }

    #[test]
    fn allocatable_wins_over_capacity() {
        let mut reserved = node("8Gi", "4");
        if let Some(status) = reserved.status.as_mut() {
            status.allocatable = quantities("7Gi", "3800m");
        }
        let facts = HardwareFacts::from_node(&reserved).unwrap();
        assert_eq!(facts.total_ram_bytes, 7 * (1 << 30));
        assert_eq!(facts.cpu_cores, 3.8);
    }

    #[test]
    fn sizes_against_one_node_not_the_cluster() {
        let mut nodes: Vec<Node> = (0..5).map(|_| node("8Gi", "4")).collect();
        nodes.push(node("12Gi", "2"));
        nodes.push(node("12Gi", "6"));

        let facts = HardwareFacts::largest(&nodes).unwrap();
        assert_eq!(facts.total_ram_bytes, 12 * (1 << 30));
        assert_eq!(facts.cpu_cores, 6.0);

        // 25% of the largest node fits on it, 25% of the 64Gi total would not
        let targets = ResourceTargets {
            memory: ResourceAmount::memory("postgres.memory", "25%").unwrap(),
            cpu: ResourceAmount::cpu("postgres.cpu", "25%").unwrap(),
        };
        let sizing = size(&targets, Some(&facts));
        assert_eq!(sizing.memory_limit, 3 * (1 << 30));
        assert_eq!(sizing.cpu_limit, 1500);
    }

    #[test]
    fn missing_capacity_yields_nothing() {
        assert!(HardwareFacts::from_node(&Node::default()).is_none());
        assert!(HardwareFacts::largest(&[]).is_none());
    }

    #[tokio::test]
    async fn static_facts() {
        let facts = HardwareFacts {
            total_ram_bytes: 1 << 30,
            cpu_cores: 2.0,
        };
        assert_eq!(StaticFacts(Some(facts)).facts(None).await, Some(facts));
        assert_eq!(StaticFacts::default().facts(Some("node-1")).await, None);
    }
}
