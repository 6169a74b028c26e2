//! OS/arch-keyed map selection.
//!
//! Manifest keys use the portable vocabulary of the plugin ecosystem
//! (`linux`, `darwin`, `windows`; `amd64`, `arm64`, `386`), so the host
//! names are normalized to it before lookup.

use crate::schema::PlatformMap;

/// The host operating system in manifest vocabulary.
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// The host architecture in manifest vocabulary.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Selects the value matching the host: `<os>.<arch>` first, `<os>` next,
/// the `*` wildcard last.
pub fn select(map: &PlatformMap) -> Option<&str> {
    let os_arch = format!("{}.{}", host_os(), host_arch());
    map.get(&os_arch)
        .or_else(|| map.get(host_os()))
        .or_else(|| map.get("*"))
        .map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn arch_specific_keys_win() {
        let mut map: PlatformMap = HashMap::new();
        map.insert(format!("{}.{}", host_os(), host_arch()), "exact".to_string());
        map.insert(host_os().to_string(), "os".to_string());
        map.insert("*".to_string(), "any".to_string());
        assert_eq!(select(&map), Some("exact"));
    }

    #[test]
    fn os_generic_keys_beat_the_wildcard() {
        let mut map: PlatformMap = HashMap::new();
        map.insert(host_os().to_string(), "os".to_string());
        map.insert("*".to_string(), "any".to_string());
        assert_eq!(select(&map), Some("os"));
    }

    #[test]
    fn wildcard_is_the_fallback() {
        let mut map: PlatformMap = HashMap::new();
        map.insert("plan9".to_string(), "other".to_string());
        map.insert("*".to_string(), "any".to_string());
        assert_eq!(select(&map), Some("any"));
    }

    #[test]
    fn no_applicable_key_selects_nothing() {
        let mut map: PlatformMap = HashMap::new();
        map.insert("plan9.mips".to_string(), "other".to_string());
        assert_eq!(select(&map), None);
        assert_eq!(select(&HashMap::new()), None);
    }
}
