//! Per-process identity extraction.
//!
//! A pod's processes share a network namespace, so the pod IP is read from
//! the process's view of `net/fib_trie`. The hostname comes from the
//! container runtime's hostname file when present, else from `HOSTNAME`
//! in the process environment.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

use nodemapper_common::constants;
use nodemapper_common::error::{MapperError, Result};

/// Reads the hostname of the process rooted at `pdir`.
///
/// # Errors
///
/// Returns an error if neither the hostname file nor `environ` yields a hostname.
pub fn extract_hostname(pdir: &Path) -> Result<String> {
    if let Some(hostname) = read_trimmed(&pdir.join(constants::CONTAINER_HOSTNAME_FILE)) {
        return Ok(hostname);
    }
    environ_var(pdir, constants::HOSTNAME_ENV_VAR)?.ok_or_else(|| {
        MapperError::parse(
            "environ",
            format!("no {} in {}", constants::HOSTNAME_ENV_VAR, pdir.display()),
        )
    })
}

/// Reads the Kubernetes namespace of the process rooted at `pdir`, if exposed.
///
/// The service-account mount wins over a `POD_NAMESPACE` variable.
pub fn extract_namespace(pdir: &Path) -> Option<String> {
    read_trimmed(&pdir.join(constants::SERVICE_ACCOUNT_NAMESPACE_FILE)).or_else(|| {
        environ_var(pdir, constants::POD_NAMESPACE_ENV_VAR)
            .ok()
            .flatten()
            .filter(|ns| !ns.is_empty())
    })
}

/// Reads the pod IP of the process rooted at `pdir`.
///
/// When the routing table lists several local host addresses, the lowest
/// one is chosen and a warning is logged.
///
/// # Errors
///
/// Returns an error if `net/fib_trie` is unreadable or has no local address.
pub fn extract_ip_addr(pdir: &Path) -> Result<Ipv4Addr> {
    let path = pdir.join("net").join("fib_trie");
    let content = std::fs::read_to_string(&path).map_err(|e| MapperError::io(&path, e))?;
    let addrs = parse_fib_trie_local_addrs(&content);

    let mut iter = addrs.iter();
    let Some(&first) = iter.next() else {
        return Err(MapperError::parse(
            "fib_trie",
            format!("no local host address in {}", path.display()),
        ));
    };
    if addrs.len() > 1 {
        tracing::warn!(
            pdir = %pdir.display(),
            ?addrs,
            chosen = %first,
            "found multiple local IP addresses"
        );
    }
    Ok(first)
}

/// Collects the non-loopback `/32 host LOCAL` addresses from `fib_trie` content.
///
/// Each leaf appears as a `|-- <ip>` line followed by its route lines; the
/// same address is listed in both the `Main` and `Local` tables.
pub fn parse_fib_trie_local_addrs(content: &str) -> BTreeSet<Ipv4Addr> {
    let mut addrs = BTreeSet::new();
    let mut leaf: Option<Ipv4Addr> = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(ip) = line.strip_prefix("|-- ") {
            leaf = ip.trim().parse().ok();
        } else if line.starts_with("+--") {
            leaf = None;
        } else if line.starts_with("/32 host LOCAL") {
            if let Some(ip) = leaf.filter(|ip| !ip.is_loopback()) {
                let _ = addrs.insert(ip);
            }
        }
    }
    addrs
}

/// Looks up one variable in `<pdir>/environ`.
fn environ_var(pdir: &Path, name: &str) -> Result<Option<String>> {
    let path = pdir.join("environ");
    let data = std::fs::read(&path).map_err(|e| MapperError::io(&path, e))?;
    Ok(data
        .split(|&b| b == 0)
        .filter_map(|entry| std::str::from_utf8(entry).ok())
        .filter_map(|entry| entry.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string()))
}

fn read_trimmed(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIB_TRIE: &str = "Main:
  +-- 0.0.0.0/0 3 0 5
     |-- 0.0.0.0
        /0 universe UNICAST
     +-- 127.0.0.0/8 2 0 2
        +-- 127.0.0.0/31 1 0 0
           |-- 127.0.0.0
              /8 host LOCAL
           |-- 127.0.0.1
              /32 host LOCAL
        |-- 127.255.255.255
           /32 link BROADCAST
     +-- 172.17.0.0/16 2 0 2
        +-- 172.17.0.0/30 2 0 2
           |-- 172.17.0.0
              /16 link UNICAST
           |-- {IP}
              /32 host LOCAL
        |-- 172.17.255.255
           /32 link BROADCAST
Local:
  +-- 0.0.0.0/0 3 0 5
     |-- 0.0.0.0
        /0 universe UNICAST
     +-- 172.17.0.0/16 2 0 2
        +-- 172.17.0.0/30 2 0 2
           |-- {IP}
              /32 host LOCAL
        |-- 172.17.255.255
           /32 link BROADCAST
";

    fn write_process(dir: &Path, environ: &str, fib_trie: &str) {
        std::fs::create_dir_all(dir.join("net")).expect("mkdir");
        std::fs::write(dir.join("environ"), environ).expect("environ");
        std::fs::write(dir.join("net/fib_trie"), fib_trie).expect("fib_trie");
    }

    #[test]
    fn fib_trie_yields_single_pod_address() {
        let addrs = parse_fib_trie_local_addrs(&FIB_TRIE.replace("{IP}", "172.17.0.3"));
        assert_eq!(addrs.into_iter().collect::<Vec<_>>(), vec![Ipv4Addr::new(172, 17, 0, 3)]);
    }

    #[test]
    fn fib_trie_ignores_broadcast_and_loopback() {
        let addrs = parse_fib_trie_local_addrs(&FIB_TRIE.replace("{IP}", "127.0.0.5"));
        assert!(addrs.is_empty());
    }

    #[test]
    fn extract_ip_addr_picks_lowest_of_many() {
        let dir = tempfile::tempdir().expect("tempdir");
        let trie = format!(
            "{}{}",
            FIB_TRIE.replace("{IP}", "172.17.0.9"),
            FIB_TRIE.replace("{IP}", "172.17.0.4")
        );
        write_process(dir.path(), "", &trie);

        let ip = extract_ip_addr(dir.path()).expect("ip");
        assert_eq!(ip, Ipv4Addr::new(172, 17, 0, 4));
    }

    #[test]
    fn extract_ip_addr_without_local_address_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(dir.path(), "", "Main:\n");
        assert!(matches!(
            extract_ip_addr(dir.path()),
            Err(MapperError::Parse { what: "fib_trie", .. })
        ));
    }

    #[test]
    fn extract_hostname_reads_environ() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(
            dir.path(),
            "PATH=/usr/bin\0HOSTNAME=web-7f9c\0HOME=/root\0",
            "",
        );
        assert_eq!(extract_hostname(dir.path()).expect("hostname"), "web-7f9c");
    }

    #[test]
    fn extract_hostname_prefers_runtime_hostname_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(dir.path(), "HOSTNAME=from-env\0", "");
        std::fs::create_dir_all(dir.path().join("root/etc")).expect("mkdir");
        std::fs::write(dir.path().join("root/etc/hostname"), "from-file\n").expect("write");

        assert_eq!(extract_hostname(dir.path()).expect("hostname"), "from-file");
    }

    #[test]
    fn extract_hostname_missing_variable_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(dir.path(), "PATH=/usr/bin\0", "");
        assert!(extract_hostname(dir.path()).is_err());
    }

    #[test]
    fn extract_hostname_exited_process_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            extract_hostname(&dir.path().join("4242")),
            Err(MapperError::Io { .. })
        ));
    }

    #[test]
    fn extract_namespace_prefers_service_account_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(dir.path(), "POD_NAMESPACE=from-env\0", "");
        assert_eq!(extract_namespace(dir.path()).as_deref(), Some("from-env"));

        let sa = dir
            .path()
            .join("root/var/run/secrets/kubernetes.io/serviceaccount");
        std::fs::create_dir_all(&sa).expect("mkdir");
        std::fs::write(sa.join("namespace"), "payments").expect("write");
        assert_eq!(extract_namespace(dir.path()).as_deref(), Some("payments"));
    }

    #[test]
    fn extract_namespace_absent_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_process(dir.path(), "HOSTNAME=x\0", "");
        assert_eq!(extract_namespace(dir.path()), None);
    }
}
