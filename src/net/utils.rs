use anyhow::Result;
use hostname;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

pub fn my_name() -> Result<String> {
    Ok(hostname::get()?.to_string_lossy().to_string())
}

/// Formats `host` and `port` as a dialable address, bracketing bare IPv6
/// literals.
pub fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolves `host:port` to the first socket address the resolver returns.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addr = host_port(host, port)
        .to_socket_addrs()
        .and_then(|mut socket_addrs| {
            socket_addrs.next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "No address found")
            })
        })?;
    Ok(addr)
}
