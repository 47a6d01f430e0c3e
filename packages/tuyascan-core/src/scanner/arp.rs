//! MAC address resolution from the system ARP table

use super::oui::normalize_mac;
use futures::future::BoxFuture;
use std::net::Ipv4Addr;
use std::process::Command;

/// Looks up the MAC address behind an IP address.
pub trait MacResolver: Send + Sync {
    fn resolve(&self, ip: Ipv4Addr) -> BoxFuture<'_, Option<String>>;
}

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Resolves MACs by reading the ARP table after a host has answered a probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArpTableResolver;

impl MacResolver for ArpTableResolver {
    fn resolve(&self, ip: Ipv4Addr) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let table = tokio::task::spawn_blocking(read_arp_table)
                .await
                .unwrap_or_default();
            let target = ip.to_string();
            table
                .into_iter()
                .find(|(entry_ip, _)| *entry_ip == target)
                .map(|(_, mac)| mac)
        })
    }
}

/// Read the system ARP table as (ip, mac) pairs.
fn read_arp_table() -> Vec<(String, String)> {
    #[cfg(target_os = "windows")]
    let output = hidden_command("arp").args(["-a"]).output();

    #[cfg(target_os = "linux")]
    let output = hidden_command("arp").args(["-n"]).output();

    #[cfg(target_os = "macos")]
    let output = hidden_command("arp").args(["-a", "-n"]).output();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let output: std::io::Result<std::process::Output> =
        Err(std::io::Error::other("Unsupported platform"));

    match output {
        Ok(output) => {
            let text = String::from_utf8_lossy(&output.stdout);
            #[cfg(target_os = "windows")]
            {
                parse_arp_windows(&text)
            }
            #[cfg(target_os = "macos")]
            {
                parse_arp_macos(&text)
            }
            #[cfg(not(any(target_os = "macos", target_os = "windows")))]
            {
                parse_arp_linux(&text)
            }
        }
        Err(e) => {
            tracing::debug!("Failed to read ARP table: {}", e);
            Vec::new()
        }
    }
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_arp_windows(output: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with("Interface") || line.contains("Internet Address") {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 2 {
            let ip = parts[0];
            let mac = parts[1];

            if ip.parse::<Ipv4Addr>().is_ok() && mac.contains('-') && mac.len() == 17 {
                if let Some(mac) = normalize_mac(mac) {
                    entries.push((ip.to_string(), mac));
                }
            }
        }
    }

    entries
}

#[cfg_attr(any(target_os = "windows", target_os = "macos"), allow(dead_code))]
fn parse_arp_linux(output: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 3 {
            let ip = parts[0];
            let mac = parts[2];

            if ip.parse::<Ipv4Addr>().is_ok() && mac.contains(':') && mac.len() == 17 {
                if mac == "00:00:00:00:00:00" {
                    continue;
                }
                if let Some(mac) = normalize_mac(mac) {
                    entries.push((ip.to_string(), mac));
                }
            }
        }
    }

    entries
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_arp_macos(output: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();

    for line in output.lines() {
        let line = line.trim();

        let Some(ip_start) = line.find('(') else {
            continue;
        };
        let Some(ip_len) = line[ip_start + 1..].find(')') else {
            continue;
        };
        let ip = &line[ip_start + 1..ip_start + 1 + ip_len];
        if ip.parse::<Ipv4Addr>().is_err() {
            continue;
        }

        if let Some(at_pos) = line.find(" at ") {
            let mac = line[at_pos + 4..].split_whitespace().next().unwrap_or("");
            if mac == "(incomplete)" || !mac.contains(':') {
                continue;
            }
            // macOS drops leading zeros ("0:1a:..."), pad each octet back out
            let padded: Vec<String> = mac.split(':').map(|o| format!("{:0>2}", o)).collect();
            if padded.len() == 6 {
                if let Some(mac) = normalize_mac(&padded.join(":")) {
                    entries.push((ip.to_string(), mac));
                }
            }
        }
    }

    entries
}
