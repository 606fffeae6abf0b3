//! Primary-interface MAC discovery via sysfs.

use std::fs;
use std::path::Path;

use tracing::warn;

/// Announced when no interface can be read.
pub const FALLBACK_MAC: &str = "aa:bb:cc:dd:ee:ff";

const NET_CLASS_DIR: &str = "/sys/class/net";

/// MAC of `interface`, or of the first non-loopback interface when none is
/// named. Falls back to [`FALLBACK_MAC`] so the beacon always has a
/// payload.
pub fn primary_mac(interface: Option<&str>) -> String {
    primary_mac_under(Path::new(NET_CLASS_DIR), interface)
}

fn primary_mac_under(net_dir: &Path, interface: Option<&str>) -> String {
    if let Some(name) = interface {
        return read_address(&net_dir.join(name).join("address")).unwrap_or_else(|| {
            warn!("no address for interface {name}, announcing fallback MAC");
            FALLBACK_MAC.to_owned()
        });
    }
    let Ok(entries) = fs::read_dir(net_dir) else {
        return FALLBACK_MAC.to_owned();
    };
    let mut names: Vec<_> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "lo")
        .collect();
    names.sort();
    for name in names {
        if let Some(mac) = read_address(&net_dir.join(&name).join("address")) {
            return mac;
        }
    }
    FALLBACK_MAC.to_owned()
}

fn read_address(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let mac = raw.trim_end();
    if mac.len() == 17 {
        Some(mac.to_owned())
    } else {
        None
    }
}
