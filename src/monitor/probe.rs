//! Latency sources and candidate resolution
//!
//! [`SampleSource`] and [`Resolver`] are the seams to the network. The
//! production implementations shell out to the system `ping` and use the
//! system resolver; tests substitute scripted fakes.

use std::net::ToSocketAddrs;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::config::ProbeConfig;
use super::error::ProbeError;
use super::sample::Sample;

/// Produces one latency sample for an address
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn probe(&self, address: &str) -> Result<Sample, ProbeError>;
}

/// Resolves a domain to candidate server addresses, in resolver order
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Vec<String>;
}

/// Reroute candidates for `domain`; the domain itself when nothing resolves
pub async fn candidates_for(resolver: &dyn Resolver, domain: &str) -> Vec<String> {
    let resolved = resolver.resolve(domain).await;
    if resolved.is_empty() {
        vec![domain.to_string()]
    } else {
        resolved
    }
}

/// Single-echo probe through the system `ping` command
#[derive(Debug, Clone)]
pub struct PingProbe {
    config: ProbeConfig,
}

impl PingProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    fn ping_args(&self, address: &str) -> Vec<String> {
        let wait = self.config.reply_wait_secs.max(1);
        if cfg!(windows) {
            vec![
                "-n".into(),
                "1".into(),
                "-w".into(),
                (wait * 1000).to_string(),
                address.into(),
            ]
        } else {
            vec![
                "-c".into(),
                "1".into(),
                "-W".into(),
                wait.to_string(),
                address.into(),
            ]
        }
    }
}

#[async_trait]
impl SampleSource for PingProbe {
    async fn probe(&self, address: &str) -> Result<Sample, ProbeError> {
        // a leading dash would be read as a ping flag
        if address.is_empty() || address.starts_with('-') {
            return Err(ProbeError::Unreachable(address.to_string()));
        }

        let mut command = Command::new(&self.config.ping_binary);
        command
            .args(self.ping_args(address))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.config.timeout, command.output()).await {
            Err(_) => {
                return Err(ProbeError::Timeout {
                    address: address.to_string(),
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })
            }
            Ok(Err(e)) => return Err(ProbeError::Spawn(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ProbeError::Unreachable(address.to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let latency_ms = parse_ping_latency(&stdout)
            .ok_or_else(|| ProbeError::Parse(address.to_string()))?;

        debug!("ping {} -> {:.2}ms", address, latency_ms);
        Ok(Sample::now(latency_ms))
    }
}

/// Extract the round-trip time in milliseconds from ping output.
///
/// Understands the Windows summary (`Average = 23ms`) and the per-reply
/// `time=12.3 ms` / `time<1ms` forms. A `time<N` reply reports `N`.
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    if let Some(start) = output.find("Average = ") {
        if let Some(ms) = leading_number(&output[start + "Average = ".len()..]) {
            return Some(ms);
        }
    }

    for marker in ["time=", "time<"] {
        if let Some(start) = output.find(marker) {
            if let Some(ms) = leading_number(&output[start + marker.len()..]) {
                return Some(ms);
            }
        }
    }
    None
}

fn leading_number(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// IPv4 resolution through the system resolver
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, domain: &str) -> Vec<String> {
        let host = domain.to_string();
        let result = tokio::task::spawn_blocking(move || {
            (host.as_str(), 0u16)
                .to_socket_addrs()
                .map(|addrs| addrs.filter(|a| a.is_ipv4()).map(|a| a.ip()).collect::<Vec<_>>())
        })
        .await;

        match result {
            Ok(Ok(ips)) => {
                let mut out: Vec<String> = Vec::with_capacity(ips.len());
                for ip in ips {
                    let ip = ip.to_string();
                    if !out.contains(&ip) {
                        out.push(ip);
                    }
                }
                out
            }
            Ok(Err(e)) => {
                debug!("DNS resolution failed for {}: {}", domain, e);
                Vec::new()
            }
            Err(e) => {
                debug!("DNS resolution task failed for {}: {}", domain, e);
                Vec::new()
            }
        }
    }
}
