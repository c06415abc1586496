//! Engine implementations.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{EndpointConfig, MemoryBroker, MemoryConnection, MemoryConnector};

/// Whether link `address` is matched by subscription `pattern`.
///
/// Segments are separated by `/` or `.`. `*` matches exactly one segment,
/// `#` matches zero or more.
#[must_use]
pub fn pattern_matches(pattern: &str, address: &str) -> bool {
    if pattern == address {
        return true;
    }
    if !pattern.contains(['*', '#']) {
        return false;
    }
    let split = |s: &str| -> Vec<String> {
        s.split(['/', '.']).map(ToString::to_string).collect()
    };
    segments_match(&split(pattern), &split(address))
}

fn segments_match(pattern: &[String], address: &[String]) -> bool {
    match pattern.split_first() {
        None => address.is_empty(),
        Some((head, rest)) if head == "#" => {
            (0..=address.len()).any(|skip| segments_match(rest, &address[skip..]))
        }
        Some((head, rest)) => match address.split_first() {
            Some((seg, tail)) if head == "*" || head == seg => segments_match(rest, tail),
            _ => false,
        },
    }
}
