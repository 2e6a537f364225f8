//! Finding and killing the process that listens on a port.

use scfuzz_common::{HarnessError, Result};
use std::process::Command;

/// Ids of the processes listening on TCP `port`.
pub fn listening_pids(port: u16) -> Result<Vec<u32>> {
    let stop_err = |reason: String| HarnessError::NodeStop { port, reason };
    if cfg!(windows) {
        let output = Command::new("netstat")
            .arg("-ano")
            .output()
            .map_err(|e| stop_err(format!("failed to run netstat: {e}")))?;
        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout), port))
    } else {
        let output = Command::new("lsof")
            .args(["-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
            .output()
            .map_err(|e| stop_err(format!("failed to run lsof: {e}")))?;
        // lsof exits with 1 when nothing matches
        Ok(parse_lsof(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Kills every process listening on `port` and returns their ids.
pub fn kill_listener(port: u16) -> Result<Vec<u32>> {
    let pids = listening_pids(port)?;
    if pids.is_empty() {
        return Err(HarnessError::NodeStop { port, reason: "no listening process found".into() });
    }
    for pid in &pids {
        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("taskkill");
            cmd.args(["/PID", &pid.to_string(), "/F"]);
            cmd
        } else {
            let mut cmd = Command::new("kill");
            cmd.args(["-9", &pid.to_string()]);
            cmd
        };
        debug!(?cmd, pid, port, "killing listener");
        let status = cmd
            .status()
            .map_err(|e| HarnessError::NodeStop { port, reason: format!("{cmd:?}: {e}") })?;
        if !status.success() {
            return Err(HarnessError::NodeStop {
                port,
                reason: format!("failed to kill process {pid} ({status})"),
            });
        }
    }
    warn!(?pids, port, "killed unmanaged node");
    Ok(pids)
}

fn parse_lsof(output: &str) -> Vec<u32> {
    let mut pids = output.lines().filter_map(|l| l.trim().parse().ok()).collect::<Vec<u32>>();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Parses `netstat -ano` rows like `TCP  0.0.0.0:8545  0.0.0.0:0  LISTENING  4242`.
fn parse_netstat(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let mut pids = output
        .lines()
        .filter_map(|line| {
            let cols = line.split_whitespace().collect::<Vec<_>>();
            match cols.as_slice() {
                [proto, local, _, state, pid]
                    if proto.eq_ignore_ascii_case("tcp")
                        && local.ends_with(&suffix)
                        && state.eq_ignore_ascii_case("listening") =>
                {
                    pid.parse().ok()
                }
                _ => None,
            }
        })
        .collect::<Vec<u32>>();
    pids.sort_unstable();
    pids.dedup();
    pids
}
