//! Configuration files driving the infra clients

use dutkit_core::domain::config::{ConfigManager, DutConfig};
use dutkit_infra::files;
use dutkit_infra::probe::DutProbe;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_partial_file_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    tokio::fs::write(
        &path,
        "[timing]\nsettle_timeout_ms = 2000\n\n[audio]\ndbus_send = \"/usr/local/bin/dbus-send\"\n",
    )
    .await
    .unwrap();

    let config = ConfigManager::for_file(path).load().await;
    assert_eq!(config.timing.settle().timeout, Duration::from_millis(2000));
    assert_eq!(config.timing.settle().interval, Duration::from_millis(250));
    assert_eq!(config.audio.dbus_send, "/usr/local/bin/dbus-send");
    assert_eq!(config.audio.destination, "org.chromium.cras");
    assert_eq!(config.network, DutConfig::default().network);
}

#[tokio::test]
async fn test_invalid_timing_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(dir.path().to_path_buf());
    tokio::fs::write(manager.config_path(), "[timing]\npoll_interval_ms = 0\n")
        .await
        .unwrap();

    assert_eq!(manager.load().await, DutConfig::default());
    assert!(dir.path().join("config.toml.corrupt").exists());
}

#[tokio::test]
async fn test_sysroot_from_config_feeds_probe() {
    let dir = TempDir::new().unwrap();
    let sysroot = dir.path().join("dut");
    std::fs::create_dir_all(sysroot.join("etc")).unwrap();
    std::fs::write(sysroot.join("etc/lsb-release"), "BOARD=brya\n").unwrap();

    let manager = ConfigManager::new(dir.path().join("conf"));
    let mut config = DutConfig::default();
    config.paths.sysroot = sysroot;
    manager.save(&config).await.unwrap();

    let loaded = manager.load().await;
    let probe = DutProbe::new(&loaded.paths.sysroot);
    assert_eq!(probe.board().unwrap(), "brya");
}

#[tokio::test]
async fn test_downloads_dir_from_config_feeds_file_helpers() {
    let dir = TempDir::new().unwrap();
    let downloads = dir.path().join("Downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    std::fs::write(downloads.join("Screenshot 2024-05-01 09.00.00.png"), vec![0u8; 2048]).unwrap();
    std::fs::write(downloads.join("Screen recording 2024-05-01.webm"), b"webm").unwrap();

    let manager = ConfigManager::new(dir.path().join("conf"));
    let mut config = DutConfig::default();
    config.paths.downloads_dir = downloads.clone();
    config.paths.results_dir = dir.path().join("results");
    manager.save(&config).await.unwrap();

    let loaded = manager.load().await;
    let shot = files::confirm_screenshot(&loaded.paths.downloads_dir, 1024).unwrap();
    assert!(shot.starts_with(&downloads));

    let dest = loaded.paths.results_dir.join("downloads");
    let moved = files::move_downloads_to(&loaded.paths.downloads_dir, &dest).unwrap();
    assert_eq!(moved.len(), 2);
    assert!(dest.join("Screen recording 2024-05-01.webm").exists());
}
