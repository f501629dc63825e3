//! Requests and limits from resource targets.
//!
//! The limit is the target itself and the request is 80% of it. Percent
//! targets scale host capacity; without hardware facts they fall back to a
//! fixed 2560Mi / 625m limit.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use serde::Serialize;

use crate::hardware::HardwareFacts;
use crate::stack::ResourceTargets;
use crate::util::quantity::{cpu_quantity, memory_quantity, ResourceAmount};

/// Requests are `REQUEST_NUMERATOR / REQUEST_DENOMINATOR` of the limit.
const REQUEST_NUMERATOR: u64 = 4;
const REQUEST_DENOMINATOR: u64 = 5;
const FALLBACK_MEMORY_LIMIT: u64 = 2560 * 1024 * 1024;
const FALLBACK_CPU_LIMIT: u64 = 625;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceSizing {
    pub memory_request: u64,
    pub memory_limit: u64,
    pub cpu_request: u64,
    pub cpu_limit: u64,
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale(total: f64, fraction: f64) -> u64 {
    (total * fraction).floor() as u64
}

fn request(limit: u64) -> u64 {
    limit / REQUEST_DENOMINATOR * REQUEST_NUMERATOR
        + limit % REQUEST_DENOMINATOR * REQUEST_NUMERATOR / REQUEST_DENOMINATOR
}

pub fn size(targets: &ResourceTargets, hardware: Option<&HardwareFacts>) -> ResourceSizing {
    #[allow(clippy::cast_precision_loss)]
    let memory_limit = match (&targets.memory, hardware) {
        (ResourceAmount::Absolute(bytes), _) => *bytes,
        (ResourceAmount::Percent(p), Some(hw)) => scale(hw.total_ram_bytes as f64, *p),
        (ResourceAmount::Percent(_), None) => FALLBACK_MEMORY_LIMIT,
    };
    let cpu_limit = match (&targets.cpu, hardware) {
        (ResourceAmount::Absolute(millicores), _) => *millicores,
        (ResourceAmount::Percent(p), Some(hw)) => scale(hw.cpu_cores * 1000.0, *p),
        (ResourceAmount::Percent(_), None) => FALLBACK_CPU_LIMIT,
    }
    .max(1);

    ResourceSizing {
        memory_request: request(memory_limit),
        memory_limit,
        cpu_request: request(cpu_limit).max(1),
        cpu_limit,
    }
}

impl ResourceSizing {
    pub fn requirements(&self) -> ResourceRequirements {
        ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("memory".to_string(), memory_quantity(self.memory_request)),
                ("cpu".to_string(), cpu_quantity(self.cpu_request)),
            ])),
            limits: Some(BTreeMap::from([
                ("memory".to_string(), memory_quantity(self.memory_limit)),
                ("cpu".to_string(), cpu_quantity(self.cpu_limit)),
            ])),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1 << 30;

    fn targets(memory: ResourceAmount, cpu: ResourceAmount) -> ResourceTargets {
        ResourceTargets { memory, cpu }
    }

    #[test]
    fn percent_of_host() {
        let hw = HardwareFacts {
            total_ram_bytes: 32 * GIB,
            cpu_cores: 8.0,
        };
        let sizing = size(
            &targets(ResourceAmount::Percent(0.4), ResourceAmount::Percent(0.25)),
            Some(&hw),
        );
        let requirements = sizing.requirements();
        let requests = requirements.requests.unwrap();
        let limits = requirements.limits.unwrap();

        // 0.8 x 0.4 x 32Gi and 0.4 x 32Gi, floored to whole MiB
        assert_eq!(requests["memory"].0, "10485Mi");
        assert_eq!(limits["memory"].0, "13107Mi");
        assert_eq!(requests["cpu"].0, "1600m");
        assert_eq!(limits["cpu"].0, "2000m");
    }

    #[test]
    fn fallback_without_hardware() {
        let sizing = size(
            &targets(ResourceAmount::Percent(0.4), ResourceAmount::Percent(0.4)),
            None,
        );
        let requirements = sizing.requirements();
        assert_eq!(requirements.requests.unwrap()["memory"].0, "2048Mi");
        assert_eq!(requirements.limits.as_ref().unwrap()["memory"].0, "2560Mi");
        assert_eq!(requirements.limits.unwrap()["cpu"].0, "625m");
        assert_eq!(sizing.cpu_request, 500);
    }

    #[test]
    fn absolute_targets_ignore_hardware() {
        let sizing = size(
            &targets(ResourceAmount::Absolute(GIB), ResourceAmount::Absolute(1000)),
            None,
        );
        assert_eq!(sizing.memory_limit, GIB);
        assert_eq!(sizing.cpu_request, 800);
        assert_eq!(memory_quantity(sizing.memory_request).0, "819Mi");
    }
}
