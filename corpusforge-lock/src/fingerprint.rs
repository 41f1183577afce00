use std::net::UdpSocket;

/// Worker/lock-holder fingerprint: `"<local-ip>_<pid>"`.
///
/// Resolves a non-loopback local IPv4 by opening a UDP socket "connected"
/// to a well-known public address and reading back the local endpoint —
/// no packet is actually sent. Falls back to `127.0.0.1` if that fails
/// (no network, sandboxed environment, etc). Matches
/// `original_source/baselines/oss/lock.py::get_local_ip` exactly.
pub fn worker_key() -> String {
    format!("{}_{}", local_ip(), std::process::id())
}

fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_key_contains_pid() {
        let key = worker_key();
        assert!(key.ends_with(&format!("_{}", std::process::id())));
        assert!(key.contains('.') || key.contains(':'));
    }
}
