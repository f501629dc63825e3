#[cfg(test)]
mod tests {
    use crate::applier::{
        ApplyOutcome, ConditionSet, DeleteOutcome, ResourceApplier, ResourceHandle,
    };
    use crate::config::PartialConfig;
    use crate::hardware::{HardwareFacts, StaticFacts};
    use crate::resources::ResourceSpec;
    use crate::scheduler::{FailureReason, ServiceStatus};
    use crate::secrets::{SecretData, SecretKey, WarningKind, SECRET_NAME};
    use crate::stack::ServiceName;
    use crate::util::errors::{ApplyError, ConfigError, Error, SecretError};
    use crate::Orchestrator;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::{Arc, Mutex};
    use tokio::sync::watch;
    use tokio::time::{sleep, Duration};

    type Key = (&'static str, Option<String>, String);

    #[derive(Default)]
    struct FakeState {
        objects: BTreeMap<Key, ResourceSpec>,
        calls: Vec<String>,
        reject: BTreeSet<String>,
        never_ready: BTreeSet<String>,
        /// Deployments still rolling out, with the polls left before ready.
        rolling: BTreeMap<String, u32>,
    }

    const ROLLOUT_POLLS: u32 = 2;

    /// In-memory cluster that records every call.
    #[derive(Default)]
    struct FakeApplier {
        state: Mutex<FakeState>,
    }

    impl FakeApplier {
        fn rejecting(self, name: &str) -> Self {
            self.state.lock().unwrap().reject.insert(name.to_string());
            self
        }

        fn never_ready(self, deployment: &str) -> Self {
            self.state.lock().unwrap().never_ready.insert(deployment.to_string());
            self
        }

        fn clear_calls(&self) {
            self.state.lock().unwrap().calls.clear();
        }

        fn applies(&self) -> usize {
            self.calls().iter().filter(|c| c.starts_with("apply ")).count()
        }

        fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        fn applied(&self, kind: &str, name: &str) -> Option<ResourceSpec> {
            let state = self.state.lock().unwrap();
            state
                .objects
                .iter()
                .find(|((k, _, n), _)| *k == kind && n == name)
                .map(|(_, spec)| spec.clone())
        }

        fn position(&self, call: &str) -> usize {
            self.calls()
                .iter()
                .position(|c| c == call)
                .unwrap_or_else(|| panic!("{call} was never made"))
        }
    }

    fn key(spec: &ResourceSpec) -> Key {
        (spec.kind(), spec.namespace().map(str::to_string), spec.name().to_string())
    }

    #[async_trait]
    impl ResourceApplier for FakeApplier {
        async fn apply(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ApplyError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("apply {}/{}", spec.kind(), spec.name()));
            if state.reject.contains(spec.name()) {
                return Err(ApplyError::Rejected {
                    kind: spec.kind(),
                    name: spec.name().to_string(),
                    reason: "admission webhook denied the request".to_string(),
                });
            }
            let outcome = match state.objects.insert(key(spec), spec.clone()) {
                None => ApplyOutcome::Created,
                Some(previous) if previous.spec_hash() == spec.spec_hash() => {
                    ApplyOutcome::Unchanged
                }
                Some(_) => ApplyOutcome::Updated,
            };
            if outcome == ApplyOutcome::Updated && matches!(spec, ResourceSpec::Deployment(_)) {
                state.rolling.insert(spec.name().to_string(), ROLLOUT_POLLS);
            }
            Ok(ResourceHandle::new(spec, outcome))
        }

        async fn delete(&self, spec: &ResourceSpec) -> Result<DeleteOutcome, ApplyError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("delete {}/{}", spec.kind(), spec.name()));
            if state.objects.remove(&key(spec)).is_none() {
                return Ok(DeleteOutcome::NotFound);
            }
            if matches!(spec, ResourceSpec::Namespace(_)) {
                let namespace = Some(spec.name().to_string());
                state.objects.retain(|(_, ns, _), _| *ns != namespace);
            }
            Ok(DeleteOutcome::Deleted)
        }

        async fn status(&self, handle: &ResourceHandle) -> Result<ConditionSet, ApplyError> {
            let mut state = self.state.lock().unwrap();
            if state.never_ready.contains(&handle.name) {
                state.calls.push(format!("status {} pending", handle.name));
                return Ok(ConditionSet {
                    replicas: 1,
                    ..Default::default()
                });
            }
            if let Some(left) = state.rolling.get_mut(&handle.name) {
                if *left > 0 {
                    *left -= 1;
                    state.calls.push(format!("status {} rolling", handle.name));
                    // the old pod is still serving until the new one is up
                    return Ok(ConditionSet {
                        replicas: 1,
                        ready_replicas: 1,
                        rollout_pending: true,
                        ..Default::default()
                    });
                }
            }
            state.calls.push(format!("status {} ready", handle.name));
            Ok(ConditionSet {
                ready: true,
                replicas: 1,
                ready_replicas: 1,
                ..Default::default()
            })
        }

        async fn read_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<SecretData>, ApplyError> {
            let state = self.state.lock().unwrap();
            let key: Key = ("Secret", Some(namespace.to_string()), name.to_string());
            Ok(match state.objects.get(&key) {
                Some(ResourceSpec::Secret(secret)) => secret.string_data.clone(),
                _ => None,
            })
        }
    }

    fn orchestrator(fake: &Arc<FakeApplier>, env: &[(&str, &str)]) -> Orchestrator {
        let facts = HardwareFacts {
            total_ram_bytes: 32 * (1 << 30),
            cpu_cores: 8.0,
        };
        Orchestrator::new(
            fake.clone(),
            Arc::new(StaticFacts(Some(facts))),
            env.iter().copied().collect(),
        )
    }

    fn set(pairs: &[(&str, &str)]) -> PartialConfig {
        PartialConfig::from_pairs(pairs.iter().copied()).unwrap()
    }

    fn deployment_json(fake: &FakeApplier, name: &str) -> serde_json::Value {
        serde_json::to_value(fake.applied("Deployment", name).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn deploys_six_services_in_dependency_order() {
        let fake = Arc::new(FakeApplier::default());
        let result = orchestrator(&fake, &[]).deploy(PartialConfig::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.namespace, "supabase");
        assert_eq!(result.services.len(), 6);
        assert!(result.services.values().all(ServiceStatus::is_applied));
        assert!(result.health_failures.is_empty());
        assert!(result.warnings.is_empty());

        assert_eq!(fake.position("apply Namespace/supabase"), 0);
        assert_eq!(fake.position("apply Secret/supabase-secrets"), 1);
        let postgres = fake.position("apply Service/supabase-postgres-service");
        let kong = fake.position("apply ConfigMap/supabase-kong-config");
        for middle in ["gotrue", "postgrest", "realtime", "storage"] {
            let first = fake.position(&format!("apply ConfigMap/supabase-{middle}-config"));
            let last = fake.position(&format!("apply Service/supabase-{middle}-service"));
            assert!(postgres < first, "{middle} applied before postgres was ready");
            assert!(last < kong, "kong applied before {middle} was ready");
        }
        assert_eq!(fake.applies(), 2 + 6 * 3 + 2 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn redeploy_is_idempotent_and_keeps_secrets() {
        let fake = Arc::new(FakeApplier::default());
        let orchestrator = orchestrator(&fake, &[]);

        orchestrator.deploy(PartialConfig::default()).await.unwrap();
        let password = fake
            .applied("Secret", SECRET_NAME)
            .and_then(|s| match s {
                ResourceSpec::Secret(secret) => secret.string_data,
                _ => None,
            })
            .and_then(|data| data.get(SecretKey::PostgresPassword.key()).cloned())
            .unwrap();

        let second = orchestrator.deploy(PartialConfig::default()).await.unwrap();
        assert!(second.success);
        assert!(second.shared.iter().all(|r| r.outcome == ApplyOutcome::Unchanged));
        for status in second.services.values() {
            let ServiceStatus::Applied { resources } = status else {
                panic!("expected applied, got {status:?}");
            };
            assert!(resources.iter().all(|r| r.outcome == ApplyOutcome::Unchanged));
        }

        let ResourceSpec::Secret(secret) = fake.applied("Secret", SECRET_NAME).unwrap() else {
            panic!("secret missing");
        };
        assert_eq!(
            secret.string_data.unwrap()[SecretKey::PostgresPassword.key()],
            password
        );
    }

    #[tokio::test(start_paused = true)]
    async fn changed_override_updates_only_what_changed() {
        let fake = Arc::new(FakeApplier::default());
        let orchestrator = orchestrator(&fake, &[]);
        orchestrator.deploy(PartialConfig::default()).await.unwrap();

        let result = orchestrator.deploy(set(&[("kong.image", "kong:3.5")])).await.unwrap();
        let Some(ServiceStatus::Applied { resources }) = result.status(ServiceName::Kong) else {
            panic!("kong not applied");
        };
        let updated: Vec<_> = resources
            .iter()
            .filter(|r| r.outcome == ApplyOutcome::Updated)
            .map(|r| r.kind)
            .collect();
        assert_eq!(updated, vec!["Deployment"]);
        let Some(ServiceStatus::Applied { resources }) = result.status(ServiceName::Postgres) else {
            panic!("postgres not applied");
        };
        assert!(resources.iter().all(|r| r.outcome == ApplyOutcome::Unchanged));
    }

    #[tokio::test(start_paused = true)]
    async fn dependents_wait_for_rollout_of_updated_database() {
        let fake = Arc::new(FakeApplier::default());
        let orchestrator = orchestrator(&fake, &[]);
        orchestrator.deploy(PartialConfig::default()).await.unwrap();
        fake.clear_calls();

        let result = orchestrator
            .deploy(set(&[("postgres.image", "supabase/postgres:15.6.1.146")]))
            .await
            .unwrap();
        assert!(result.success);

        let calls = fake.calls();
        let rolling = calls
            .iter()
            .filter(|c| *c == "status supabase-postgres rolling")
            .count();
        assert_eq!(rolling, ROLLOUT_POLLS as usize);
        let ready = fake.position("status supabase-postgres ready");
        for middle in ["gotrue", "postgrest", "realtime", "storage"] {
            let first = fake.position(&format!("apply ConfigMap/supabase-{middle}-config"));
            assert!(ready < first, "{middle} applied while postgres was rolling out");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unready_database_skips_every_dependent() {
        let fake = Arc::new(FakeApplier::default().never_ready("supabase-postgres"));
        let result = orchestrator(&fake, &[])
            .deploy(set(&[("health_timeout_secs", "30")]))
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(
            result.status(ServiceName::Postgres),
            Some(ServiceStatus::Failed {
                reason: FailureReason::HealthTimeout { .. },
                ..
            })
        ));
        for service in [
            ServiceName::Gotrue,
            ServiceName::Kong,
            ServiceName::Postgrest,
            ServiceName::Realtime,
            ServiceName::Storage,
        ] {
            assert_eq!(
                result.status(service),
                Some(&ServiceStatus::Skipped {
                    blocked_by: "postgres".to_string()
                })
            );
        }
        assert_eq!(result.health_failures.len(), 1);
        assert_eq!(result.health_failures[0].service, ServiceName::Postgres);
        assert_eq!(result.health_failures[0].last_condition, "0/1 replicas ready");
        assert!(!fake.calls().iter().any(|c| c.contains("gotrue") || c.contains("kong")));
    }

    #[tokio::test(start_paused = true)]
    async fn apply_failure_spares_siblings() {
        let fake = Arc::new(FakeApplier::default().rejecting("supabase-gotrue"));
        let result = orchestrator(&fake, &[]).deploy(PartialConfig::default()).await.unwrap();

        assert!(!result.success);
        let Some(ServiceStatus::Failed { reason, resources }) = result.status(ServiceName::Gotrue)
        else {
            panic!("gotrue should have failed");
        };
        assert!(matches!(reason, FailureReason::Apply { kind: "Deployment", .. }));
        assert_eq!(resources.len(), 1);
        assert_eq!(
            result.status(ServiceName::Kong),
            Some(&ServiceStatus::Skipped {
                blocked_by: "gotrue".to_string()
            })
        );
        for service in [ServiceName::Postgrest, ServiceName::Realtime, ServiceName::Storage] {
            assert!(result.status(service).is_some_and(ServiceStatus::is_applied));
        }
        // health timeouts only, apply errors are reported per service
        assert!(result.health_failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_failure_skips_all_services() {
        let fake = Arc::new(FakeApplier::default().rejecting(SECRET_NAME));
        let result = orchestrator(&fake, &[]).deploy(PartialConfig::default()).await.unwrap();

        assert!(!result.success);
        assert!(result.shared_failure.is_some());
        assert!(result.services.values().all(|s| *s
            == ServiceStatus::Skipped {
                blocked_by: "Secret/supabase-secrets".to_string()
            }));
        assert_eq!(fake.applies(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_secret_warns_but_deploys() {
        let fake = Arc::new(FakeApplier::default());
        let env = [("SUPABASE_POSTGRES_PASSWORD", "your-secure-password")];
        let result = orchestrator(&fake, &env).deploy(PartialConfig::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].key, SecretKey::PostgresPassword);
        assert_eq!(result.warnings[0].kind, WarningKind::Placeholder);
    }

    #[tokio::test]
    async fn strict_mode_refuses_placeholders_before_applying() {
        let fake = Arc::new(FakeApplier::default());
        let env = [
            ("SUPABASE_POSTGRES_PASSWORD", "your-secure-password"),
            ("SUPABASE_STRICT_SECRETS", "true"),
        ];
        let err = orchestrator(&fake, &env)
            .deploy(PartialConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Secret(SecretError::PlaceholderRejected(_))));
        assert_eq!(err.metric_label(), "secret_error");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn construction_errors_return_before_any_apply() {
        let fake = Arc::new(FakeApplier::default());
        let err = orchestrator(&fake, &[])
            .deploy(set(&[("postgres.storage", "a lot")]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::InvalidQuantity { .. })));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sizes_from_hardware_facts() {
        let fake = Arc::new(FakeApplier::default());
        orchestrator(&fake, &[])
            .deploy(set(&[("postgres.memory", "40%"), ("kong.cpu", "250m")]))
            .await
            .unwrap();

        let postgres = deployment_json(&fake, "supabase-postgres");
        let resources = &postgres["spec"]["template"]["spec"]["containers"][0]["resources"];
        assert_eq!(resources["requests"]["memory"], "10485Mi");
        assert_eq!(resources["limits"]["memory"], "13107Mi");
        // default 25% of 8 cores
        assert_eq!(resources["limits"]["cpu"], "2000m");

        let kong = deployment_json(&fake, "supabase-kong");
        let resources = &kong["spec"]["template"]["spec"]["containers"][0]["resources"];
        assert_eq!(resources["requests"]["cpu"], "200m");
        assert_eq!(resources["limits"]["cpu"], "250m");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_next_tier() {
        let fake = Arc::new(FakeApplier::default().never_ready("supabase-postgres"));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let orchestrator = orchestrator(&fake, &[]).with_cancellation(cancel_rx);

        let (result, _) = tokio::join!(orchestrator.deploy(PartialConfig::default()), async {
            sleep(Duration::from_secs(12)).await;
            cancel_tx.send(true).unwrap();
        });
        let result = result.unwrap();

        assert!(!result.success);
        assert!(result.services.values().all(|s| *s == ServiceStatus::Cancelled));
        assert!(result.health_failures.is_empty());
        assert!(!fake.calls().iter().any(|c| c.contains("gotrue")));
    }

    #[tokio::test]
    async fn cancelled_before_start_applies_nothing() {
        let fake = Arc::new(FakeApplier::default());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let result = orchestrator(&fake, &[])
            .with_cancellation(cancel_rx)
            .deploy(PartialConfig::default())
            .await
            .unwrap();

        assert!(result.services.values().all(|s| *s == ServiceStatus::Cancelled));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_reports_absent_namespace() {
        let fake = Arc::new(FakeApplier::default());
        let orchestrator = orchestrator(&fake, &[]);
        orchestrator.deploy(PartialConfig::default()).await.unwrap();

        let first = orchestrator.destroy("supabase").await.unwrap();
        assert!(first.accepted);
        assert!(!first.already_absent);
        assert!(fake.applied("Deployment", "supabase-postgres").is_none());

        let second = orchestrator.destroy("supabase").await.unwrap();
        assert!(second.accepted);
        assert!(second.already_absent);
    }

    #[tokio::test]
    async fn render_touches_nothing() {
        let fake = Arc::new(FakeApplier::default());
        let yaml = orchestrator(&fake, &[])
            .render(set(&[("namespace", "supabase-dev")]))
            .await
            .unwrap();

        assert!(yaml.contains("namespace: supabase-dev"));
        assert!(yaml.contains("kind: PersistentVolumeClaim"));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn result_serializes_for_tooling() {
        let fake = Arc::new(FakeApplier::default().never_ready("supabase-kong"));
        let result = orchestrator(&fake, &[])
            .deploy(set(&[("health_timeout_secs", "10")]))
            .await
            .unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["services"]["postgres"]["status"], "applied");
        assert_eq!(json["services"]["kong"]["status"], "failed");
        assert_eq!(json["services"]["kong"]["reason"], "health_timeout");
        assert_eq!(json["health_failures"][0]["service"], "kong");
        assert_eq!(json["hardware"]["cpu_cores"], 8.0);
    }
}
