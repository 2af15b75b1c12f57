//! Whole-pipeline flow: build from config, inject reports, observe
//! deliveries through a file sink, shut down cleanly.

use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;

use tremorwire::config::{Config, DomainSpec, SinkSpec, SubscriberSpec};
use tremorwire::{Coords, Magnitude, Pipeline, Report, Status};

fn test_config(dir: &tempfile::TempDir) -> (Config, std::path::PathBuf) {
    let alerts = dir.path().join("alerts.log");
    let config = Config {
        data_dir: dir.path().join("data"),
        sources: Vec::new(),
        friends: Vec::new(),
        queue_size: 64,
        subscribers: vec![SubscriberSpec {
            sink: SinkSpec::File {
                path: alerts.clone(),
            },
            languages: Some(vec!["en".to_string()]),
            domains: vec![DomainSpec {
                name: Some("world".to_string()),
                mag: Some(4.0),
                ..DomainSpec::default()
            }],
        }],
        ..Config::default()
    };
    (config, alerts)
}

fn official_report(mag: f64, minutes_ago: i64) -> Report {
    let mut r = Report::new(
        Coords::new(35.6, 139.7, -10.0).with_radius(15.0),
        Utc::now() - Duration::minutes(minutes_ago),
        Magnitude::new(mag, Some("Mw")),
    );
    // The feed republished moments ago; the freshness gate compares this
    // against pipeline start.
    r.update = Utc::now();
    r.status = Status::Reported;
    r.sources = vec!["JMA".to_string()];
    r
}

#[tokio::test]
async fn injected_report_reaches_the_sink() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, alerts) = test_config(&dir);

    let pipeline = Pipeline::build(&config).expect("builds");
    let shutdown = pipeline.shutdown_handle();
    let injector = pipeline.reports_sender_for_simulation();

    let runner = tokio::spawn(pipeline.run());

    injector
        .send((official_report(5.6, 8), "test:inject".to_string()))
        .await
        .expect("inject");

    // Give the fusion and monitor workers a moment.
    tokio::time::sleep(StdDuration::from_millis(400)).await;
    shutdown.cancel();
    let result = runner.await.expect("join");
    assert!(result.is_ok(), "clean shutdown: {result:?}");

    let contents = std::fs::read_to_string(&alerts).expect("sink file written");
    assert!(contents.contains("Japan"), "delivered line: {contents}");
    assert!(contents.contains("5.6"), "delivered line: {contents}");
}

#[tokio::test]
async fn subthreshold_report_is_silent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, alerts) = test_config(&dir);

    let pipeline = Pipeline::build(&config).expect("builds");
    let shutdown = pipeline.shutdown_handle();
    let injector = pipeline.reports_sender_for_simulation();
    let runner = tokio::spawn(pipeline.run());

    // Below the fusion magnitude gate: never even becomes an event.
    injector
        .send((official_report(2.0, 8), "test:inject".to_string()))
        .await
        .expect("inject");

    tokio::time::sleep(StdDuration::from_millis(300)).await;
    shutdown.cancel();
    runner.await.expect("join").expect("clean shutdown");

    assert!(!alerts.exists(), "nothing should have been delivered");
}

#[tokio::test]
async fn duplicate_injection_is_dispatched_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, alerts) = test_config(&dir);

    let pipeline = Pipeline::build(&config).expect("builds");
    let shutdown = pipeline.shutdown_handle();
    let injector = pipeline.reports_sender_for_simulation();
    let runner = tokio::spawn(pipeline.run());

    let report = official_report(5.6, 8);
    for _ in 0..3 {
        injector
            .send((report.clone(), "test:inject".to_string()))
            .await
            .expect("inject");
    }

    tokio::time::sleep(StdDuration::from_millis(400)).await;
    shutdown.cancel();
    runner.await.expect("join").expect("clean shutdown");

    let contents = std::fs::read_to_string(&alerts).expect("sink file written");
    assert_eq!(
        contents.lines().count(),
        1,
        "replays must be suppressed: {contents}"
    );
}

#[tokio::test]
async fn seen_store_survives_pipeline_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (config, alerts) = test_config(&dir);
    let report = official_report(5.6, 8);

    {
        let pipeline = Pipeline::build(&config).expect("builds");
        let shutdown = pipeline.shutdown_handle();
        let injector = pipeline.reports_sender_for_simulation();
        let runner = tokio::spawn(pipeline.run());
        injector
            .send((report.clone(), "test:inject".to_string()))
            .await
            .expect("inject");
        tokio::time::sleep(StdDuration::from_millis(400)).await;
        shutdown.cancel();
        runner.await.expect("join").expect("clean shutdown");
    }

    // Second run: the same content must not be re-announced.
    {
        let pipeline = Pipeline::build(&config).expect("builds");
        let shutdown = pipeline.shutdown_handle();
        let injector = pipeline.reports_sender_for_simulation();
        let runner = tokio::spawn(pipeline.run());
        injector
            .send((report, "test:inject".to_string()))
            .await
            .expect("inject");
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        shutdown.cancel();
        runner.await.expect("join").expect("clean shutdown");
    }

    let contents = std::fs::read_to_string(&alerts).expect("sink file written");
    assert_eq!(contents.lines().count(), 1, "replay across restarts: {contents}");
}
