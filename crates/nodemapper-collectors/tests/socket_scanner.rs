//! Socket scanner directionality against a mock proc tree.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::Path;

use nodemapper_collectors::SocketScanner;

const TCP_HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n";

const TCP6_CONTENT: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000000000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 2448849674 1 0000000000000000 100 0 0 10 0
   1: 0000000000000000FFFF0000D326A8C1:1F90 0000000000000000FFFF00000E23A8C0:CA08 06 00000000:00000000 03:00000A41 00000000     0        0 0 3 0000000000000000
   2: 0000000000000000FFFF0000D326A8C1:1F90 0000000000000000FFFF00000E23A8B0:CA08 06 00000000:00000000 03:00000A41 00000000     0        0 0 3 0000000000000000
   3: 0000000000000000FFFF0000D326A8C0:1F90 0000000000000000FFFF00000E23A8C0:CA08 01 00000000:00000000 03:00000A41 00000000     0        0 0 3 0000000000000000
   4: 0000000000000000FFFF0000D326A8C0:1F90 0000000000000000FFFF00000E23A8B0:CA08 01 00000000:00000000 03:00000A41 00000000     0        0 0 3 0000000000000000
   5: 0000000000000000FFFF0000D326A8C1:D0BE 0000000000000000FFFF00000E23A8CF:0050 01 00000000:00000000 03:00000A41 00000000     0        0 0 3 0000000000000000
";

const ENVIRON: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\0HOSTNAME=thisverypod\0TERM=xterm\0HOME=/root\0";

/// Many connections from 10.244.120.89 to 10.98.14.179:80; only the first
/// is established and none is listening.
fn tcp_content() -> String {
    let mut content = TCP_HEADER.to_string();
    content.push_str("   0: 5978F40A:89A4 B30E620A:0050 01 00000000:00000000 03:00000ACB 00000000     0        0 0 3 0000000000000000\n");
    for slot in 1..31u16 {
        let _ = writeln!(
            content,
            "  {slot:2}: 5978F40A:{:04X} B30E620A:0050 06 00000000:00000000 03:00000547 00000000     0        0 0 3 0000000000000000",
            0x9000 + slot
        );
    }
    content
}

fn write_process(proc_dir: &Path, pid: u32) {
    let pdir = proc_dir.join(pid.to_string());
    std::fs::create_dir_all(pdir.join("net")).expect("mkdir");
    std::fs::write(pdir.join("net/tcp"), tcp_content()).expect("tcp");
    std::fs::write(pdir.join("net/tcp6"), TCP6_CONTENT).expect("tcp6");
    std::fs::write(pdir.join("environ"), ENVIRON).expect("environ");
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn scan_reports_only_client_side_connections() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_process(dir.path(), 100);

    let mut scanner = SocketScanner::new(dir.path());
    scanner.scan().expect("scan");
    let results = scanner.collect_results();

    let summary: Vec<(IpAddr, &str, Vec<(&str, Option<IpAddr>)>)> = results
        .iter()
        .map(|r| {
            (
                r.src_ip,
                r.src_hostname.as_str(),
                r.destinations
                    .iter()
                    .map(|d| (d.destination.as_str(), d.destination_ip))
                    .collect(),
            )
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (
                ip("10.244.120.89"),
                "thisverypod",
                vec![("10.98.14.179", Some(ip("10.98.14.179")))]
            ),
            (
                ip("193.168.38.211"),
                "thisverypod",
                vec![("207.168.35.14", Some(ip("207.168.35.14")))]
            ),
        ]
    );
}

#[test]
fn scan_deduplicates_processes_sharing_a_network_namespace() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_process(dir.path(), 100);
    write_process(dir.path(), 101);

    let mut scanner = SocketScanner::new(dir.path());
    scanner.scan().expect("scan");
    let results = scanner.collect_results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.destinations.len() == 1));
}

#[test]
fn scan_skips_processes_without_identity_or_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("1")).expect("mkdir");
    let lonely = dir.path().join("2");
    std::fs::create_dir(&lonely).expect("mkdir");
    std::fs::write(lonely.join("environ"), ENVIRON).expect("environ");

    let mut scanner = SocketScanner::new(dir.path());
    scanner.scan().expect("scan");
    assert!(scanner.collect_results().is_empty());
}

#[test]
fn scan_results_are_drained() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_process(dir.path(), 100);

    let mut scanner = SocketScanner::new(dir.path());
    scanner.scan().expect("scan");
    assert_eq!(scanner.collect_results().len(), 2);
    assert!(scanner.collect_results().is_empty());
}
