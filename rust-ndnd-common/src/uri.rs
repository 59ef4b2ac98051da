//! FaceUri: textual endpoint descriptors.
//!
//! A FaceUri names one side of a link, e.g. `tcp4://192.0.2.1:6363`,
//! `unix:///run/ndnd.sock`, `fd://6`, `ether://[01:00:5e:00:17:aa]`, or
//! `dev://eth0`. Faces are created only from canonical URIs: numeric IP and
//! explicit port for IP schemes.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Textual endpoint descriptor of the form `scheme://host[:port]` or
/// `scheme:///path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceUri {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl FaceUri {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Builds a `tcp4`/`tcp6` URI from a socket address.
    pub fn from_tcp_addr(addr: SocketAddr) -> Self {
        Self::from_ip_addr("tcp", addr)
    }

    /// Builds a `udp4`/`udp6` URI from a socket address.
    pub fn from_udp_addr(addr: SocketAddr) -> Self {
        Self::from_ip_addr("udp", addr)
    }

    /// Builds a `ws` or `wsclient` URI from a socket address.
    pub fn from_ws_addr(scheme: &str, addr: SocketAddr) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: addr.ip().to_string(),
            port: Some(addr.port()),
            path: String::new(),
        }
    }

    fn from_ip_addr(family: &str, addr: SocketAddr) -> Self {
        let scheme = match addr.ip() {
            IpAddr::V4(_) => format!("{family}4"),
            IpAddr::V6(_) => format!("{family}6"),
        };
        Self {
            scheme,
            host: addr.ip().to_string(),
            port: Some(addr.port()),
            path: String::new(),
        }
    }

    /// Builds a `unix` URI from a filesystem path.
    pub fn from_unix_path(path: &str) -> Self {
        Self {
            scheme: "unix".to_string(),
            host: String::new(),
            port: None,
            path: path.to_string(),
        }
    }

    /// Builds an `fd` URI for a connected descriptor without addressable peer.
    pub fn from_fd(fd: i32) -> Self {
        Self {
            scheme: "fd".to_string(),
            host: fd.to_string(),
            port: None,
            path: String::new(),
        }
    }

    /// Builds a `dev` URI naming a network interface.
    pub fn from_dev(ifname: &str) -> Self {
        Self {
            scheme: "dev".to_string(),
            host: ifname.to_string(),
            port: None,
            path: String::new(),
        }
    }

    /// Builds an `ether` URI from a MAC address string.
    pub fn from_ether(mac: &str) -> Result<Self, Error> {
        if !is_valid_mac(mac) {
            return Err(Error::FaceUri(format!("Invalid MAC address '{mac}'")));
        }
        Ok(Self {
            scheme: "ether".to_string(),
            host: mac.to_ascii_lowercase(),
            port: None,
            path: String::new(),
        })
    }

    /// The socket address, for IP schemes.
    pub fn to_socket_addr(&self) -> Result<SocketAddr, Error> {
        let port = self
            .port
            .ok_or_else(|| Error::FaceUri(format!("URI '{self}' has no port")))?;
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| Error::FaceUri(format!("URI '{self}' host is not a numeric IP")))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Whether this URI is in canonical form.
    ///
    /// IP schemes require a numeric address of the matching family and an
    /// explicit port; `unix` requires a path; `fd` a descriptor number;
    /// `ether` a MAC address; `dev` an interface name.
    pub fn is_canonical(&self) -> bool {
        match self.scheme.as_str() {
            "tcp4" | "udp4" => {
                self.port.is_some() && self.host.parse::<Ipv4Addr>().is_ok()
            }
            "tcp6" | "udp6" => {
                self.port.is_some() && self.host.parse::<Ipv6Addr>().is_ok()
            }
            "ws" | "wsclient" => self.port.is_some() && self.host.parse::<IpAddr>().is_ok(),
            "unix" => !self.path.is_empty(),
            "fd" => self.host.parse::<u32>().is_ok(),
            "ether" => is_valid_mac(&self.host),
            "dev" => !self.host.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for FaceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme.as_str() {
            "unix" => write!(f, "unix://{}", self.path),
            "ether" => write!(f, "ether://[{}]", self.host),
            _ => {
                write!(f, "{}://", self.scheme)?;
                let is_v6 = self.host.parse::<Ipv6Addr>().is_ok();
                if is_v6 {
                    write!(f, "[{}]", self.host)?;
                } else {
                    write!(f, "{}", self.host)?;
                }
                if let Some(port) = self.port {
                    write!(f, ":{}", port)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for FaceUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::FaceUri(format!("'{s}' is not a URI")))?;
        if scheme.is_empty() {
            return Err(Error::FaceUri(format!("'{s}' has an empty scheme")));
        }

        let uri = match scheme {
            "unix" => {
                if !rest.starts_with('/') {
                    return Err(Error::FaceUri(format!("'{s}' has no absolute path")));
                }
                FaceUri::from_unix_path(rest)
            }
            "fd" => FaceUri {
                scheme: scheme.to_string(),
                host: rest.to_string(),
                port: None,
                path: String::new(),
            },
            "dev" => FaceUri::from_dev(rest),
            "ether" => {
                let mac = rest
                    .strip_prefix('[')
                    .and_then(|r| r.strip_suffix(']'))
                    .ok_or_else(|| Error::FaceUri(format!("'{s}' is not a bracketed MAC")))?;
                FaceUri::from_ether(mac)?
            }
            _ => {
                let (host, port) = split_host_port(rest)?;
                FaceUri {
                    scheme: scheme.to_string(),
                    host,
                    port,
                    path: String::new(),
                }
            }
        };
        Ok(uri)
    }
}

fn split_host_port(rest: &str) -> Result<(String, Option<u16>), Error> {
    if let Some(bracketed) = rest.strip_prefix('[') {
        // [v6-host]:port or [v6-host]
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::FaceUri(format!("Unterminated bracket in '{rest}'")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| Error::FaceUri(format!("Invalid port in '{rest}'")))?,
            ),
            None if tail.is_empty() => None,
            None => return Err(Error::FaceUri(format!("Trailing junk in '{rest}'"))),
        };
        return Ok((host.to_string(), port));
    }

    match rest.rsplit_once(':') {
        // A bare colon-ful host without brackets is an unbracketed IPv6
        // address; only the bracketed form is accepted above.
        Some((host, _)) if host.contains(':') => {
            Err(Error::FaceUri(format!("IPv6 host must be bracketed in '{rest}'")))
        }
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::FaceUri(format!("Invalid port in '{rest}'")))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((rest.to_string(), None)),
    }
}

fn is_valid_mac(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
