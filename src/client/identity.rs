//! Stable sender id for a gun

use std::fs;
use std::path::Path;
use tracing::{debug, info};

const CPUINFO: &str = "/proc/cpuinfo";

/// Pull the board serial out of a `/proc/cpuinfo` listing.
///
/// Raspberry Pis report `Serial\t\t: 00000000abcdef12`, the sixteen hex digits
/// after the colon are the id.
pub fn serial_from_cpuinfo(cpuinfo: &str) -> Option<u64> {
    cpuinfo
        .lines()
        .filter(|line| line.starts_with("Serial"))
        .find_map(|line| {
            let (_, value) = line.split_once(':')?;
            u64::from_str_radix(value.trim(), 16).ok()
        })
}

fn read_serial(path: &Path) -> Option<u64> {
    let cpuinfo = fs::read_to_string(path).ok()?;
    serial_from_cpuinfo(&cpuinfo)
}

/// The board serial if there is one, otherwise a random id for this run
pub fn client_id() -> u64 {
    match read_serial(Path::new(CPUINFO)) {
        Some(id) => {
            debug!(client_id = %format!("{id:x}"), "Using CPU serial as client id");
            id
        }
        None => {
            let id = rand::random::<u64>();
            info!(client_id = %format!("{id:x}"), "No CPU serial, using a random client id");
            id
        }
    }
}
