//! Probe and file helpers against a captured DUT filesystem tree

use dutkit_core::domain::sysinfo::ProbeError;
use dutkit_infra::files::{confirm_screenshot, force_copy, make_dir, move_downloads_to};
use dutkit_infra::probe::DutProbe;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn put(root: &Path, path: &str, contents: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, contents).unwrap();
}

fn captured_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    put(
        root,
        "etc/lsb-release",
        "CHROMEOS_RELEASE_BOARD=trogdor\nCHROMEOS_RELEASE_VERSION=15474.70.0\nBOARD=trogdor\n",
    );
    put(
        root,
        "proc/cpuinfo",
        "processor\t: 0\nBogoMIPS\t: 38.40\n\nprocessor\t: 1\nBogoMIPS\t: 38.40\n\nprocessor\t: 6\nBogoMIPS\t: 38.40\n\n",
    );
    put(
        root,
        "proc/meminfo",
        "MemTotal:        3911120 kB\nMemFree:          911120 kB\nActive(file):     811000 kB\n",
    );
    put(
        root,
        "proc/mounts",
        "/dev/root / ext2 ro 0 0\n/dev/mmcblk1p1 /mnt/stateful_partition ext4 rw 0 0\ntmpfs /run tmpfs rw 0 0\n",
    );
    put(root, "sys/class/thermal/thermal_zone0/temp", "38500\n");
    put(root, "sys/class/thermal/thermal_zone3/temp", "52000\n");
    put(root, "sys/devices/system/cpu/cpufreq/policy0/scaling_governor", "schedutil\n");
    put(root, "sys/devices/system/cpu/cpufreq/policy6/scaling_governor", "schedutil\n");
    put(root, "var/log/messages", "ath11k: fw crashed\nath11k: pdev 0 successfully recovered\n");
    dir
}

#[test]
fn test_captured_tree_summary() {
    let tree = captured_tree();
    let probe = DutProbe::new(tree.path());

    assert_eq!(probe.board().unwrap(), "trogdor");
    assert_eq!(probe.chromeos_version().unwrap(), "15474.70.0");
    assert_eq!(probe.count_cpus().unwrap(), 3);
    assert_eq!(probe.cpu_online_map().unwrap(), vec!["0", "1", "6"]);
    assert_eq!(probe.mem_total_kb().unwrap(), 3_911_120);
    assert_eq!(probe.meminfo().unwrap()["Active_file"], 811_000);
    assert_eq!(probe.scaling_governors().unwrap().len(), 2);

    let temps = probe.thermal_zone_temperatures().unwrap();
    assert_eq!(temps.len(), 2);
    assert!(temps.iter().all(|t| *t > 30.0 && *t < 60.0));
}

#[test]
fn test_captured_tree_mounts_and_logs() {
    let tree = captured_tree();
    let probe = DutProbe::new(tree.path());

    assert!(probe.require_mountpoint("/run").is_ok());
    assert!(matches!(
        probe.require_mountpoint("/media/fuse"),
        Err(ProbeError::NotMounted(_))
    ));
    assert!(probe
        .file_contains_pattern(Path::new("/var/log/messages"), "successfully recovered")
        .unwrap());
}

#[test]
fn test_missing_files_are_errors() {
    let empty = TempDir::new().unwrap();
    let probe = DutProbe::new(empty.path());

    assert!(matches!(probe.board(), Err(ProbeError::Io(_))));
    assert!(matches!(probe.cpuinfo(), Err(ProbeError::Io(_))));
}

#[test]
fn test_artifact_collection() {
    let downloads = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    fs::write(
        downloads.path().join("Screenshot 2024-05-02 09.15.00.png"),
        vec![0u8; 2048],
    )
    .unwrap();
    fs::write(downloads.path().join("Screen recording 2024-05-02.webm"), b"webm").unwrap();

    let shot = confirm_screenshot(downloads.path(), 1024).unwrap();
    let run_dir = make_dir(results.path(), "run-1").unwrap();
    let copied = force_copy(&shot, &run_dir).unwrap();
    assert!(copied.starts_with(&run_dir));

    let moved = move_downloads_to(downloads.path(), &run_dir.join("downloads")).unwrap();
    assert_eq!(moved.len(), 2);
    assert_eq!(fs::read_dir(downloads.path()).unwrap().count(), 0);
}
