//! Network interface enumeration for egress reporting.

use pa_types::EgressIp;
use std::net::IpAddr;

/// One interface address as the kernel reports it.
#[derive(Debug, Clone)]
struct IfAddr {
    name: String,
    addr: IpAddr,
    up: bool,
    loopback: bool,
}

/// Addresses the node can egress from: every address on an up,
/// non-loopback interface, tagged with the interface name. The kind tag
/// defaults to `datacenter`; the Panel may reclassify.
pub fn egress_ips() -> Vec<EgressIp> {
    to_egress_ips(&interface_addrs())
}

/// Best-effort public address guess for registration: the first IPv4 on
/// an up, non-loopback interface.
pub fn public_ipv4() -> String {
    interface_addrs()
        .iter()
        .find(|a| a.up && !a.loopback && !a.addr.is_loopback() && a.addr.is_ipv4())
        .map(|a| a.addr.to_string())
        .unwrap_or_default()
}

fn to_egress_ips(addrs: &[IfAddr]) -> Vec<EgressIp> {
    addrs
        .iter()
        .filter(|a| a.up && !a.loopback && !a.addr.is_loopback())
        .map(|a| EgressIp {
            ip: a.addr.to_string(),
            version: if a.addr.is_ipv4() { 4 } else { 6 },
            interface_name: Some(a.name.clone()),
            ip_type: Some("datacenter".into()),
            isp: None,
            asn: None,
            is_active: true,
        })
        .collect()
}

#[cfg(unix)]
fn interface_addrs() -> Vec<IfAddr> {
    use std::ffi::CStr;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::ptr;

    let mut result = Vec::new();

    // SAFETY: getifaddrs allocates a linked list we traverse read-only
    // and release with freeifaddrs afterwards; every dereference is
    // null-checked first.
    unsafe {
        let mut addrs: *mut libc::ifaddrs = ptr::null_mut();
        if libc::getifaddrs(&mut addrs) != 0 {
            tracing::warn!("getifaddrs failed, reporting no interfaces");
            return result;
        }

        let mut cursor = addrs;
        while !cursor.is_null() {
            let ifa = &*cursor;
            cursor = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }
            let name = match CStr::from_ptr(ifa.ifa_name).to_str() {
                Ok(n) => n.to_string(),
                Err(_) => continue,
            };
            let family = (*ifa.ifa_addr).sa_family as libc::c_int;
            let addr = match family {
                libc::AF_INET => {
                    let sin = &*(ifa.ifa_addr as *const libc::sockaddr_in);
                    IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)))
                }
                libc::AF_INET6 => {
                    let sin6 = &*(ifa.ifa_addr as *const libc::sockaddr_in6);
                    IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr))
                }
                _ => continue,
            };

            result.push(IfAddr {
                name,
                addr,
                up: ifa.ifa_flags & libc::IFF_UP as u32 != 0,
                loopback: ifa.ifa_flags & libc::IFF_LOOPBACK as u32 != 0,
            });
        }

        libc::freeifaddrs(addrs);
    }

    result
}

#[cfg(not(unix))]
fn interface_addrs() -> Vec<IfAddr> {
    Vec::new()
}
