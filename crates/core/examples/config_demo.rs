//! Example writing and reloading a dutkit configuration file
//!
//! Run with: cargo run --package dutkit-core --example config_demo

use dutkit_core::domain::config::{ConfigManager, DutConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("dutkit_core=debug,info")
        .init();

    println!("=== dutkit Configuration Demo ===\n");

    let dir = std::env::temp_dir().join("dutkit-config-demo");
    let manager = ConfigManager::new(dir.clone());

    let mut config = DutConfig::default();
    config.timing.settle_timeout_ms = 5_000;
    config.paths.sysroot = "/tmp/fake-dut".into();
    manager.save(&config).await?;
    println!("Saved to {}", manager.config_path().display());

    let loaded = manager.load().await;
    println!(
        "Reloaded: settle timeout {} ms, poll every {} ms, sysroot {}",
        loaded.timing.settle_timeout_ms,
        loaded.timing.poll_interval_ms,
        loaded.paths.sysroot.display()
    );
    assert_eq!(loaded, config);

    manager.clear().await?;
    std::fs::remove_dir_all(&dir).ok();
    println!("\nDemo completed");
    Ok(())
}
