use std::collections::BTreeMap;

use crate::stack::{ServiceName, PART_OF};

pub const NAME: &str = "app.kubernetes.io/name";
pub const PART_OF_KEY: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const APP: &str = "app";

/// Field manager for server-side apply and value of the managed-by label.
pub const MANAGER: &str = "supabase-orchestrator";

fn common(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME.to_string(), name.to_string()),
        (PART_OF_KEY.to_string(), PART_OF.to_string()),
        (MANAGED_BY.to_string(), MANAGER.to_string()),
    ])
}

/// Labels for the Namespace and the Secret.
pub fn shared() -> BTreeMap<String, String> {
    common(PART_OF)
}

pub fn service(name: ServiceName) -> BTreeMap<String, String> {
    common(name.as_str())
}

pub fn selector(name: ServiceName) -> BTreeMap<String, String> {
    BTreeMap::from([(APP.to_string(), name.resource_name())])
}

pub fn pod(name: ServiceName) -> BTreeMap<String, String> {
    let mut labels = service(name);
    labels.extend(selector(name));
    labels
}
