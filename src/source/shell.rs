use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use crate::monitor::MetricsProvider;

use super::stats::{RunningStats, Stats};
use super::{format, HandlerDescriptor, SourceError, SourceHandler};

pub(super) static DESCRIPTOR: HandlerDescriptor = HandlerDescriptor {
    name: "shell",
    unit: "",
    is_dual: false,
    max_scale: 0.0,
    init,
    format: format::one_decimal,
    format_dual: None,
};

/// Longest wait for the first line of a restarted command.
const RESTART_WAIT: Duration = Duration::from_millis(100);

/// A running `sh -c` child whose stdout lines arrive on a channel.
struct Running {
    child: Child,
    lines: Receiver<String>,
}

impl Running {
    fn spawn(command: &str) -> io::Result<Self> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout not captured"))?;

        let (tx, lines) = mpsc::channel();
        thread::Builder::new().name("shell-reader".into()).spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;

        Ok(Self { child, lines })
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Numeric output of a long-running command. Every tick uses the newest line
/// printed since the previous tick.
struct ShellSource {
    command: String,
    running: Option<Running>,
    refresh_interval: Option<Duration>,
    stats: RunningStats,
}

fn init(target: &str, _provider: Box<dyn MetricsProvider>) -> Result<Box<dyn SourceHandler>, SourceError> {
    if target.trim().is_empty() {
        return Err(SourceError::invalid("shell", target, "empty command"));
    }
    let running = Running::spawn(target).map_err(SourceError::Spawn)?;
    Ok(Box::new(ShellSource {
        command: target.to_string(),
        running: Some(running),
        refresh_interval: None,
        stats: RunningStats::new(),
    }))
}

impl ShellSource {
    fn restart(&mut self) -> Result<(), SourceError> {
        self.running = None;
        match Running::spawn(&self.command) {
            Ok(running) => {
                tracing::debug!(command = %self.command, "shell command restarted");
                self.running = Some(running);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "shell command restart failed");
                Err(SourceError::CommandEnded)
            }
        }
    }

    fn restart_wait(&self) -> Duration {
        self.refresh_interval.map_or(RESTART_WAIT, |i| i.min(RESTART_WAIT))
    }

    fn try_next(&self) -> Result<String, TryRecvError> {
        match &self.running {
            Some(running) => running.lines.try_recv(),
            None => Err(TryRecvError::Disconnected),
        }
    }

    fn wait_next(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        match &self.running {
            Some(running) => running.lines.recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        }
    }

    /// Drain everything printed so far and return the newest line.
    fn newest_line(&mut self) -> Result<String, SourceError> {
        let mut newest = None;
        loop {
            match self.try_next() {
                Ok(line) => newest = Some(line),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if newest.is_some() => break,
                Err(TryRecvError::Disconnected) => {
                    self.restart()?;
                    match self.wait_next(self.restart_wait()) {
                        Ok(line) => newest = Some(line),
                        Err(RecvTimeoutError::Timeout) => return Err(SourceError::NoData),
                        Err(RecvTimeoutError::Disconnected) => return Err(SourceError::CommandEnded),
                    }
                }
            }
        }

        newest.ok_or(SourceError::NoData)
    }
}

impl SourceHandler for ShellSource {
    fn collect(&mut self) -> Result<f64, SourceError> {
        let line = self.newest_line()?;
        let value = parse_line(&line).ok_or(SourceError::NoData)?;
        self.stats.record(value);
        Ok(value)
    }

    fn stats(&self) -> Stats {
        Stats::single(&self.stats)
    }

    fn set_refresh_interval(&mut self, interval: Duration) {
        self.refresh_interval = Some(interval);
    }
}

/// Value carried by one output line.
///
/// `ping` headers are skipped and `ping` reply lines yield their `time=`
/// field. Anything else yields the first token with a numeric prefix.
fn parse_line(line: &str) -> Option<f64> {
    if line.contains("PING") || line.contains("data bytes") {
        return None;
    }
    if line.contains("bytes from") {
        return line
            .split_whitespace()
            .find_map(|token| token.strip_prefix("time="))
            .and_then(numeric_prefix);
    }
    line.split_whitespace().find_map(numeric_prefix)
}

/// Longest leading part of `token` that reads as a finite number, so
/// `"42%"` gives 42 and `"1.5e3x"` gives 1500.
fn numeric_prefix(token: &str) -> Option<f64> {
    let candidate_len = token
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .unwrap_or(token.len());
    (1..=candidate_len)
        .rev()
        .find_map(|end| token[..end].parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
