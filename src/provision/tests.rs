//! Unit tests for create-request construction and the provisioning flow.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use rstest::{fixture, rstest};

use super::*;
use crate::namespace::types::PersistencyKind;
use crate::test_support::{ScriptedCompute, ScriptedTunnel, StaticTokenSource};

fn request(raw: &str) -> ProvisioningRequest {
    raw.parse()
        .unwrap_or_else(|err| panic!("parse {raw}: {err}"))
}

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[rstest]
#[case("dagger-cache", "", "dagger-cache")]
#[case("dagger-cache", "build1", "dagger-cache-build1")]
#[case("dagger-engine", "a-b", "dagger-engine-a-b")]
fn maybe_suffix_joins_non_empty_suffix(
    #[case] prefix: &str,
    #[case] suffix: &str,
    #[case] expected: &str,
) {
    assert_eq!(maybe_suffix(prefix, suffix), expected);
}

#[test]
fn anonymous_request_has_no_volume_or_unique_tag() {
    let settings = ProvisionerSettings::default();
    let create = create_instance_request(&request("namespace://"), &settings, fixed_now())
        .expect("request builds");

    assert_eq!(create.shape.virtual_cpu, 8);
    assert_eq!(create.shape.memory_megabytes, 16_384);
    assert_eq!(create.shape.machine_arch, "amd64");
    assert!(create.interactive);
    assert_eq!(create.experimental, None);
    let [container] = create.containers.as_slice() else {
        panic!("expected one container, got {:?}", create.containers);
    };
    assert!(container.volumes.is_empty());
}

#[test]
fn engine_container_runs_the_configured_image() {
    let settings = ProvisionerSettings {
        engine_version: String::from("0.12.0"),
        engine_image_repo: String::from("mirror.test/engine"),
    };
    let create = create_instance_request(&request("namespace://"), &settings, fixed_now())
        .expect("request builds");

    assert_eq!(create.documented_purpose, "Dagger engine 0.12.0");
    let [container] = create.containers.as_slice() else {
        panic!("expected one container");
    };
    assert_eq!(container.name, "dagger-engine");
    assert_eq!(container.image_ref, "mirror.test/engine:v0.12.0");
    assert!(container.privileged);
    assert!(container.args.is_empty());
    assert_eq!(container.docker_sock_path, "/var/run/docker.sock");
    assert_eq!(container.nsc_state_path, "/var/run/nsc");
    let sockets = &container
        .experimental
        .as_ref()
        .expect("experimental options")
        .exported_unix_sockets;
    assert_eq!(
        sockets.get(ENGINE_SOCKET_NAME).map(String::as_str),
        Some("/run/buildkit/buildkitd.sock")
    );
}

#[test]
fn reuse_tag_adds_cache_volume_and_unique_tag() {
    let create = create_instance_request(
        &request("namespace:///build1?shape=4x8&arch=arm64"),
        &ProvisionerSettings::default(),
        fixed_now(),
    )
    .expect("request builds");

    assert_eq!(create.shape.virtual_cpu, 4);
    assert_eq!(create.shape.memory_megabytes, 8192);
    assert_eq!(create.shape.machine_arch, "arm64");
    assert_eq!(
        create.experimental.map(|experimental| experimental.unique_tag),
        Some(String::from("dagger-engine-build1"))
    );
    let [container] = create.containers.as_slice() else {
        panic!("expected one container");
    };
    let [volume] = container.volumes.as_slice() else {
        panic!("expected one volume, got {:?}", container.volumes);
    };
    assert_eq!(volume.tag, "dagger-cache-build1");
    assert_eq!(volume.mount_point, "/var/lib/dagger");
    assert_eq!(volume.size_mb, 65_536);
    assert_eq!(volume.persistency_kind, PersistencyKind::Cache);
}

#[rstest]
#[case("namespace://", TimeDelta::hours(1))]
#[case("namespace://?ttl=90m", TimeDelta::minutes(90))]
#[case("namespace://?ttl=30s", TimeDelta::seconds(30))]
#[case("namespace://?ttl=-5m", TimeDelta::minutes(-5))]
fn deadline_is_now_plus_ttl(#[case] raw: &str, #[case] ttl: TimeDelta) {
    let now = fixed_now();
    let create = create_instance_request(&request(raw), &ProvisionerSettings::default(), now)
        .expect("request builds");

    assert_eq!(create.deadline, now + ttl);
}

#[test]
fn unrepresentable_deadline_is_a_config_error() {
    let err = create_instance_request(
        &request("namespace://?ttl=1h"),
        &ProvisionerSettings::default(),
        DateTime::<Utc>::MAX_UTC,
    )
    .expect_err("deadline overflows");

    assert!(
        matches!(err, crate::config::ConfigError::InvalidDuration { .. }),
        "{err}"
    );
}

struct Harness {
    compute: ScriptedCompute,
    tokens: Arc<StaticTokenSource>,
    tunnel: ScriptedTunnel,
}

impl Harness {
    fn provisioner(&self) -> Provisioner {
        Provisioner::new(
            Arc::new(self.compute.clone()),
            Arc::clone(&self.tokens) as Arc<dyn TokenSource>,
            Arc::new(self.tunnel.clone()),
            ProvisionerSettings::default(),
        )
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        compute: ScriptedCompute::new("inst-42"),
        tokens: Arc::new(StaticTokenSource::new()),
        tunnel: ScriptedTunnel::new(),
    }
}

#[rstest]
#[tokio::test]
async fn provision_creates_waits_and_returns_connector(harness: Harness) {
    let connector = harness
        .provisioner()
        .provision(&request("namespace:///build1"))
        .await
        .expect("provision succeeds");

    assert_eq!(connector.instance_id(), "inst-42");
    assert_eq!(
        connector.metadata().extra.get("ready"),
        Some(&serde_json::Value::Bool(true)),
        "metadata comes from the wait call"
    );
    assert!(!connector.auto_clean());
    assert_eq!(connector.active_connections(), 0);
    assert_eq!(harness.compute.opened(), 1);
    assert_eq!(harness.compute.create_requests().len(), 1);
    assert_eq!(harness.compute.waited(), vec![String::from("inst-42")]);
    assert_eq!(harness.compute.closed(), 0, "client is kept for teardown");
    assert!(harness.tunnel.dials().is_empty(), "provisioning does not dial");
}

#[rstest]
#[tokio::test]
async fn anonymous_instance_is_auto_cleaned(harness: Harness) {
    let connector = harness
        .provisioner()
        .provision(&request("namespace://"))
        .await
        .expect("provision succeeds");

    assert!(connector.auto_clean());
}

#[rstest]
#[tokio::test]
async fn missing_token_makes_no_remote_calls(harness: Harness) {
    harness.tokens.set_failing(true);

    let err = harness
        .provisioner()
        .provision(&request("namespace://"))
        .await
        .expect_err("provision fails");

    assert!(matches!(err, DriverError::Auth(_)), "{err}");
    assert_eq!(harness.compute.remote_calls(), 0);
}

#[rstest]
#[tokio::test]
async fn open_failure_is_reported_as_connect_error(harness: Harness) {
    harness.compute.fail_open();

    let err = harness
        .provisioner()
        .provision(&request("namespace://"))
        .await
        .expect_err("provision fails");

    assert!(
        matches!(err, DriverError::Provision(ProvisionError::Connect(_))),
        "{err}"
    );
    assert!(harness.compute.create_requests().is_empty());
}

#[rstest]
#[tokio::test]
async fn create_failure_closes_client_without_waiting(harness: Harness) {
    harness.compute.fail_create();

    let err = harness
        .provisioner()
        .provision(&request("namespace:///build1"))
        .await
        .expect_err("provision fails");

    assert!(
        matches!(err, DriverError::Provision(ProvisionError::Create(_))),
        "{err}"
    );
    assert!(harness.compute.waited().is_empty());
    assert_eq!(harness.compute.closed(), 1);
    assert!(harness.compute.destroyed().is_empty());
}

#[rstest]
#[tokio::test]
async fn wait_failure_closes_client_and_names_instance(harness: Harness) {
    harness.compute.fail_wait();

    let err = harness
        .provisioner()
        .provision(&request("namespace://"))
        .await
        .expect_err("provision fails");

    assert!(
        matches!(
            err,
            DriverError::Provision(ProvisionError::Wait { ref instance_id, .. })
                if instance_id == "inst-42"
        ),
        "{err}"
    );
    assert_eq!(harness.compute.closed(), 1);
    assert!(harness.compute.destroyed().is_empty(), "no teardown on failure");
}
