//! Interface address enumeration via `getifaddrs(3)`

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Collect the addresses of the named interfaces, in interface order.
/// Names that resolve to no interface are skipped silently; the interface
/// may be down or renamed.
#[cfg(unix)]
pub fn collect(names: &[String]) -> io::Result<Vec<IpAddr>> {
    let by_name = scan()?;
    let mut collected = Vec::new();
    for name in names {
        if let Some(addrs) = by_name.get(name) {
            collected.extend_from_slice(addrs);
        }
    }
    Ok(collected)
}

#[cfg(unix)]
fn scan() -> io::Result<HashMap<String, Vec<IpAddr>>> {
    use std::ffi::CStr;

    let mut list: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut list) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut by_name: HashMap<String, Vec<IpAddr>> = HashMap::new();
    let mut cursor = list;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() {
            continue;
        }

        let addr = match unsafe { (*entry.ifa_addr).sa_family } as libc::c_int {
            libc::AF_INET => {
                let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)))
            }
            libc::AF_INET6 => {
                let sin6 = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in6) };
                IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr))
            }
            _ => continue,
        };

        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        by_name.entry(name).or_insert_with(Vec::new).push(addr);
    }

    unsafe { libc::freeifaddrs(list) };
    Ok(by_name)
}

#[cfg(not(unix))]
pub fn collect(_names: &[String]) -> io::Result<Vec<IpAddr>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interface enumeration is only implemented for unix targets",
    ))
}
