/// Current operating system identifier as used in on-disk layout and
/// catalog os/arch maps ("linux", "macos", "windows", ...).
pub fn os() -> &'static str {
    std::env::consts::OS
}

/// Current CPU architecture identifier ("x86_64", "aarch64", ...).
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// `<os>/<arch>` key reported by the platform endpoint.
pub fn platform_key() -> String {
    format!("{}/{}", os(), arch())
}
