//! ICMP echo probing via the system `ping` command
//!
//! Requires a `ping` that can run unprivileged (setuid or `CAP_NET_RAW`),
//! which is the norm for iputils.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{Measurement, Prober};
use crate::config::ProbeSettings;
use crate::error::ProbeError;

/// Gap between echo requests within one round
const PING_INTERVAL: Duration = Duration::from_millis(200);

/// Echo prober backed by iputils `ping`
#[derive(Debug, Clone)]
pub struct PingProber {
    binary: String,
    count: u32,
    reply_timeout: Duration,
}

impl PingProber {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            binary: "ping".into(),
            count: settings.count,
            reply_timeout: settings.timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Upper bound for one round, after which the child is abandoned
    fn deadline(&self) -> Duration {
        (PING_INTERVAL + self.reply_timeout) * self.count + Duration::from_secs(1)
    }

    fn args(&self, src: IpAddr, dst: IpAddr) -> Vec<String> {
        vec![
            "-n".into(),
            "-q".into(),
            "-c".into(),
            self.count.to_string(),
            "-i".into(),
            format!("{:.1}", PING_INTERVAL.as_secs_f64()),
            "-W".into(),
            format!("{:.3}", self.reply_timeout.as_secs_f64()),
            "-I".into(),
            src.to_string(),
            dst.to_string(),
        ]
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, src: IpAddr, dst: IpAddr) -> Result<Measurement, ProbeError> {
        debug!(%src, %dst, "Pinging");

        let child = Command::new(&self.binary)
            .args(self.args(src, dst))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match timeout(self.deadline(), child).await {
            Ok(Ok(out)) => out,
            Ok(Err(source)) => return Err(ProbeError::Transport { dst, source }),
            Err(_) => return Err(ProbeError::Deadline { dst }),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_ping_summary(&stdout) {
            Some(summary) => Ok(summary.into_measurement(self.count)),
            None if stdout.contains("packets transmitted") => Err(ProbeError::Parse {
                dst,
                output: stdout.trim().to_string(),
            }),
            // Exit status 2 (and anything without a summary) means ping
            // itself failed: bad source address, socket permission, ...
            None => Err(ProbeError::Failed {
                dst,
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }),
        }
    }
}

/// Summary lines of an iputils `ping` run
#[derive(Debug, Clone, PartialEq)]
struct PingSummary {
    transmitted: u32,
    received: u32,
    avg: Option<Duration>,
}

impl PingSummary {
    fn into_measurement(self, count: u32) -> Measurement {
        let sent = if self.transmitted == 0 { count } else { self.transmitted };
        Measurement::from_counts(sent, self.received, self.avg)
    }
}

/// Parse the statistics block:
///
/// ```text
/// 3 packets transmitted, 2 received, 33.3333% packet loss, time 402ms
/// rtt min/avg/max/mdev = 0.041/0.047/0.053/0.005 ms
/// ```
fn parse_ping_summary(output: &str) -> Option<PingSummary> {
    let counts = output.lines().find(|l| l.contains("packets transmitted"))?;
    let mut fields = counts.split(',').map(str::trim);
    let transmitted = leading_number(fields.next()?)?;
    let received = leading_number(fields.next()?)?;

    let avg = output
        .lines()
        .find(|l| l.contains("min/avg/max"))
        .and_then(|l| l.split('=').nth(1))
        .and_then(|values| values.trim().split('/').nth(1))
        .and_then(|ms| ms.trim().parse::<f64>().ok())
        .map(|ms| Duration::from_secs_f64(ms / 1000.0));

    Some(PingSummary {
        transmitted,
        received,
        avg,
    })
}

fn leading_number(field: &str) -> Option<u32> {
    field.split_whitespace().next()?.parse().ok()
}
