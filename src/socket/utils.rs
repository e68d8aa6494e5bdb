//! Utility functions for socket operations

/// Check if running as root
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Hint printed when raw sockets are likely to be refused
pub fn privilege_hint() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "raw ICMP sockets need root or CAP_NET_RAW (sudo setcap cap_net_raw+ep <binary>)"
    }
    #[cfg(not(target_os = "linux"))]
    {
        "raw ICMP sockets need administrator privileges"
    }
}
