use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs::write;
use tempfile::NamedTempFile;

const VALID_CONFIG: &str = r#"
settings:
  auto_distribution_enabled: true
registrations:
  - key: featured_image
    location: post_meta
    attributes:
      meta_key: _thumbnail_id
    kind: media
  - key: image
    location: post_content
    attributes:
      block_name: core/image
      block_attribute: id
    kind: media
  - key: gallery
    location: post_content
    attributes:
      shortcode: gallery
      shortcode_attribute: ids
    kind: media
"#;

fn temp_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("Creating temp file failed");
    write(file.path(), content).expect("Writing temp file failed");
    file
}

fn distributor() -> Command {
    let mut cmd = Command::cargo_bin("distributor").expect("Binary exists");
    cmd.env_remove("DISTRIBUTOR_CONFIG").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn check_succeeds_for_valid_registrations() {
    let config = temp_file(VALID_CONFIG);

    distributor()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"registrations\": 3"))
        .stdout(predicate::str::contains("\"issues\": {}"));
}

#[test]
fn check_fails_and_lists_issues_per_key() {
    let config = temp_file(
        r#"
registrations:
  - key: sidebar_widget
    location: sidebar
    kind: media
  - key: thumbnail
    location: post_meta
    kind: picture
"#,
    );

    distributor()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("Invalid data location 'sidebar'"))
        .stdout(predicate::str::contains("meta_key is required"))
        .stdout(predicate::str::contains("Invalid data type 'picture'"));
}

#[test]
fn check_rejects_invalid_settings() {
    let config = temp_file("settings:\n  max_dependency_depth: 0\n");

    distributor()
        .arg("check")
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_dependency_depth"));
}

#[test]
fn check_reads_config_path_from_environment() {
    let config = temp_file(VALID_CONFIG);

    distributor()
        .env("DISTRIBUTOR_CONFIG", config.path())
        .arg("check")
        .assert()
        .success();
}

#[test]
fn check_without_any_config_fails() {
    distributor()
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DISTRIBUTOR_CONFIG"));
}

#[test]
fn scan_lists_references_in_extra_data_order() {
    let config = temp_file(VALID_CONFIG);
    let blocks = json!([
        { "blockName": "core/image", "attrs": { "id": 5 } },
        { "blockName": "core/group", "innerBlocks": [
            { "blockName": "core/image", "attrs": { "id": 9 } }
        ]},
        { "blockName": "core/shortcode", "innerHTML": "[gallery ids='3,4']" }
    ]);
    let payload = temp_file(
        &json!({
            "post_id": 42,
            "content": blocks.to_string(),
            "meta": { "_thumbnail_id": ["5"] }
        })
        .to_string(),
    );

    let output = distributor()
        .arg("scan")
        .arg("--config")
        .arg(config.path())
        .arg("--payload")
        .arg(payload.path())
        .output()
        .expect("scan runs");

    assert!(output.status.success(), "scan should succeed: {output:?}");
    let report: Value = serde_json::from_slice(&output.stdout).expect("scan prints JSON");
    assert_eq!(
        report,
        json!({
            "featured_image": ["5"],
            "image": [5, 9],
            "gallery": ["3,4"]
        })
    );
}

#[test]
fn scan_rejects_malformed_payload() {
    let config = temp_file(VALID_CONFIG);
    let payload = temp_file("{ not json");

    distributor()
        .arg("scan")
        .arg("--config")
        .arg(config.path())
        .arg("--payload")
        .arg(payload.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse payload JSON"));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Collects the debug rendering of every emitted event.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use distributor::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Check {
            config: Some(std::path::PathBuf::from("missing.yaml")),
        },
    };

    let result = run(cli).await;

    assert!(result.is_err(), "a missing config file must be an error");
    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
