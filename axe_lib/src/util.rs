use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::Command;

use crate::error::Result;

/// name of this machine, as advertised on the report channel
pub async fn local_hostname() -> Result<String> {
    if let Ok(output) = Command::new("hostname").output().await {
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !name.is_empty() {
            return Ok(name);
        }
    }
    Ok("localhost".to_string())
}

/// seconds since the unix epoch; used as the staging suffix
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// order strings the way `sort -V` does: runs of digits compare numerically,
/// everything else compares bytewise
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let mut rest_a = a;
    let mut rest_b = b;
    loop {
        if rest_a.is_empty() || rest_b.is_empty() {
            return rest_a.len().cmp(&rest_b.len());
        }
        let (run_a, tail_a) = take_run(rest_a);
        let (run_b, tail_b) = take_run(rest_b);
        let ord = match (parse_num(run_a), parse_num(run_b)) {
            (Some(num_a), Some(num_b)) => num_a.cmp(&num_b).then_with(|| run_a.cmp(run_b)),
            _ => run_a.cmp(run_b),
        };
        if ord != Ordering::Equal {
            return ord;
        }
        rest_a = tail_a;
        rest_b = tail_b;
    }
}

fn take_run(s: &str) -> (&str, &str) {
    let numeric = s.as_bytes()[0].is_ascii_digit();
    let end = s
        .bytes()
        .position(|b| b.is_ascii_digit() != numeric)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn parse_num(run: &str) -> Option<u64> {
    if run.bytes().all(|b| b.is_ascii_digit()) {
        run.parse().ok()
    } else {
        None
    }
}
