use cdrgen_core::config::{Config, PortConfig, SyntheticConfig, TimingConfig};
use cdrgen_core::error::ManagerError;
use cdrgen_core::format::FormatRegistry;
use cdrgen_core::output::{ChannelState, OutputManager};
use cdrgen_core::transport::mock::{MockOpener, OpenOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

fn synthetic_port(device: &str, format: &str) -> PortConfig {
    let mut port = PortConfig::new(device, format, "synthetic");
    port.calls_per_minute = 60.0;
    port.synthetic = Some(SyntheticConfig {
        system_id: "PSAP-01".to_string(),
        agent_count: 5,
        ..SyntheticConfig::default()
    });
    port
}

fn config(ports: Vec<PortConfig>) -> Config {
    Config {
        ports,
        timing: TimingConfig {
            jitter_percent: 0.0,
            ..TimingConfig::default()
        },
        ..Config::default()
    }
}

fn manager(config: Config, opener: Arc<MockOpener>) -> OutputManager {
    OutputManager::new(config, Arc::new(FormatRegistry::with_builtin_formats()), opener)
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_rate_and_byte_accounting() {
    let start = Instant::now();
    let opener = Arc::new(MockOpener::new());
    let manager = manager(config(vec![synthetic_port("/dev/ttyS0", "viper")]), opener.clone());

    assert_eq!(manager.start().await.unwrap(), 1);

    let mut samples = Vec::new();
    for step in 1..=5u64 {
        sleep_until(start + Duration::from_millis(step * 1_000 + 500)).await;
        let stats = &manager.stats()["/dev/ttyS0"];
        samples.push((stats.records_sent, stats.bytes_sent));
    }

    let (records, bytes) = samples[samples.len() - 1];
    assert!((4..=6).contains(&records), "sent {} records in 5s", records);
    for pair in samples.windows(2) {
        let ((r0, b0), (r1, b1)) = (pair[0], pair[1]);
        assert!(r1 > r0);
        assert!(b1 > b0);
    }

    let written = opener.handle_for("/dev/ttyS0").unwrap().written();
    assert_eq!(written.len() as u64, bytes);
    let text = String::from_utf8(written).unwrap();
    assert!(text.starts_with("===== CDR BEGIN :"));

    manager.stop().await;
    let infos = manager.channel_infos();
    assert_eq!(infos["/dev/ttyS0"].state, ChannelState::Stopped);
    assert_eq!(manager.totals().records_sent, records);
}

#[tokio::test(start_paused = true)]
async fn test_bad_ports_are_skipped() {
    let mut missing_sample = PortConfig::new("/dev/ttyS2", "vesta", "replay");
    missing_sample.sample_file = Some("/no/such/capture.csv".to_string());
    let mut disabled = synthetic_port("/dev/ttyS3", "vesta");
    disabled.enabled = false;

    let opener = Arc::new(MockOpener::new());
    let manager = manager(
        config(vec![
            synthetic_port("/dev/ttyS0", "vesta"),
            synthetic_port("/dev/ttyS1", "nope"),
            missing_sample,
            disabled,
        ]),
        opener.clone(),
    );

    assert_eq!(manager.start().await.unwrap(), 1);
    assert_eq!(manager.channel_count(), 1);
    assert_eq!(opener.attempts().len(), 1);

    let infos = manager.channel_infos();
    assert_eq!(infos.keys().collect::<Vec<_>>(), vec!["/dev/ttyS0"]);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_isolated_to_one_channel() {
    let start = Instant::now();
    let opener = Arc::new(MockOpener::scripted([OpenOutcome::Fail]));
    let manager = manager(
        config(vec![
            synthetic_port("/dev/ttyS0", "vesta"),
            synthetic_port("/dev/ttyS1", "viper"),
        ]),
        opener.clone(),
    );

    assert_eq!(manager.start().await.unwrap(), 1);
    assert_eq!(manager.channel_count(), 1);

    sleep_until(start + Duration::from_millis(2_500)).await;

    let infos = manager.channel_infos();
    assert_eq!(infos.len(), 2);
    assert_eq!(infos["/dev/ttyS0"].state, ChannelState::Error);
    assert_eq!(infos["/dev/ttyS0"].stats.records_sent, 0);
    assert_eq!(infos["/dev/ttyS1"].state, ChannelState::Running);
    assert_eq!(infos["/dev/ttyS1"].stats.records_sent, 2);

    manager.stop().await;
    let infos = manager.channel_infos();
    assert_eq!(infos["/dev/ttyS0"].state, ChannelState::Error);
    assert_eq!(infos["/dev/ttyS1"].state, ChannelState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_no_channels_started_is_an_error() {
    let opener = Arc::new(MockOpener::scripted([OpenOutcome::Fail, OpenOutcome::Fail]));
    let manager = manager(
        config(vec![
            synthetic_port("/dev/ttyS0", "vesta"),
            synthetic_port("/dev/ttyS1", "viper"),
        ]),
        opener,
    );

    assert!(matches!(
        manager.start().await,
        Err(ManagerError::NoChannelsStarted)
    ));
    assert_eq!(manager.channel_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_every_channel() {
    let start = Instant::now();
    let opener = Arc::new(MockOpener::new());
    let mut cfg = config(vec![
        synthetic_port("/dev/ttyS0", "vesta"),
        synthetic_port("/dev/ttyS1", "viper"),
    ]);
    cfg.recovery.reconnect_delay_sec = 7;
    let manager = manager(cfg, opener.clone());
    manager.start().await.unwrap();

    // Knock one channel into a 7s backoff starting at 2s
    sleep_until(start + Duration::from_millis(1_500)).await;
    opener.push_outcomes([OpenOutcome::Fail]);
    opener.handle_for("/dev/ttyS0").unwrap().fail_and_close();
    sleep_until(start + Duration::from_millis(2_500)).await;
    assert_eq!(
        manager.channel_infos()["/dev/ttyS0"].state,
        ChannelState::Reconnecting
    );

    manager.stop().await;
    assert_eq!(Instant::now() - start, Duration::from_secs(9));
    assert!(
        manager
            .channel_infos()
            .values()
            .all(|c| c.state == ChannelState::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_recent_records_and_totals() {
    let start = Instant::now();
    let opener = Arc::new(MockOpener::new());
    let manager = manager(
        config(vec![
            synthetic_port("/dev/ttyS0", "vesta"),
            synthetic_port("/dev/ttyS1", "viper"),
        ]),
        opener,
    );
    manager.start().await.unwrap();

    sleep_until(start + Duration::from_millis(3_500)).await;

    let recent = manager.recent_records("/dev/ttyS0", 10).unwrap();
    assert_eq!(recent.len(), 3);
    assert!(recent[0].sent_at >= recent[2].sent_at);
    assert!(manager.recent_records("/dev/ttyS9", 10).is_none());

    let totals = manager.totals();
    assert_eq!(totals.channels, 2);
    assert_eq!(totals.records_sent, 6);
    assert_eq!(totals.errors, 0);
    let per_channel: u64 = manager.stats().values().map(|s| s.bytes_sent).sum();
    assert_eq!(totals.bytes_sent, per_channel);

    manager.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected() {
    let opener = Arc::new(MockOpener::new());
    let manager = manager(
        config(vec![
            synthetic_port("/dev/ttyS0", "vesta"),
            synthetic_port("/dev/ttyS1", "viper"),
        ]),
        opener.clone(),
    );
    assert_eq!(manager.start().await.unwrap(), 2);

    assert!(matches!(
        manager.start().await,
        Err(ManagerError::AlreadyStarted)
    ));
    assert_eq!(opener.attempts().len(), 2);
    assert_eq!(manager.totals().channels, 2);
    assert_eq!(manager.channel_count(), 2);

    manager.stop().await;
}
