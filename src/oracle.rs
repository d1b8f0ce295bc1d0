//! NoC latency oracle client — a supervised subprocess actor.
//!
//! The oracle is a long-lived external process (BookSim or a stand-in)
//! answering `estimate(src, dst, bytes)` over line-delimited JSON on its
//! stdio. Mirrors the player's background-thread-plus-channel shape
//! (`player::mod`): one physical thread owns the child's pipes and is fed
//! by a `crossbeam_channel`, giving "one request in flight" without a
//! literal mutex. A second reader thread drains the child's stdout so the
//! owning thread can wait on either a response or a deadline with `select!`.
//!
//! `estimate` never returns an error: unavailability, timeout, and the
//! permanent `Disabled` state all collapse to `None`, and every caller
//! treats `None` identically — fall back to a spec-provided or default
//! latency.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const NOISE_BUFFER_CAP: usize = 32;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Ping,
    Estimate { src: i32, dst: i32, bytes: i64 },
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    cycles: Option<f64>,
    #[allow(dead_code)]
    error: Option<String>,
    #[allow(dead_code)]
    details: Option<String>,
}

/// One `estimate` call, round-tripped through the owning thread.
struct EstimateJob {
    src: i32,
    dst: i32,
    bytes: i64,
    reply: Sender<Option<u32>>,
}

/// A client actor owning one child process. Construction performs the
/// `{"op":"ping"}` handshake synchronously; once built, `estimate` is cheap
/// and never blocks longer than `deadline`.
pub struct OracleClient {
    job_tx: Sender<EstimateJob>,
    worker: Option<std::thread::JoinHandle<()>>,
}

enum WorkerMsg {
    Job(EstimateJob),
    Shutdown,
}

impl OracleClient {
    /// Launch `path` with piped stdio and perform the ping handshake. Fails
    /// fast with [`OracleError::Spawn`] if the process can't start, or
    /// [`OracleError::Handshake`] if it doesn't answer `{"ok":true}` within
    /// `deadline`.
    pub fn spawn(path: &Path, deadline: Duration) -> Result<Self, OracleError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| OracleError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");

        let (line_tx, line_rx) = bounded::<std::io::Result<String>>(64);
        let reader_handle = std::thread::Builder::new()
            .name("oracle-reader".into())
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    let mut line = String::new();
                    match reader.read_line(&mut line) {
                        Ok(0) => break,
                        Ok(_) => {
                            if line_tx.send(Ok(line)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = line_tx.send(Err(e));
                            break;
                        }
                    }
                }
            })
            .expect("spawn oracle reader thread");

        let mut actor = Actor {
            child,
            stdin: Some(stdin),
            line_rx,
            _reader_handle: reader_handle,
            noise: Vec::new(),
            disabled: false,
        };

        actor.ping(deadline)?;

        let (job_tx, job_rx) = bounded::<WorkerMsg>(16);
        let worker = std::thread::Builder::new()
            .name("oracle-actor".into())
            .spawn(move || actor.run(job_rx, deadline))
            .expect("spawn oracle actor thread");

        Ok(Self {
            job_tx,
            worker: Some(worker),
        })
    }

    /// Resolve an oracle executable the way §6 describes: `UPIMULATOR_BOOKSIM_SERVICE`
    /// overrides discovery; otherwise walk upward from `start_dir` and the
    /// current working directory, probing the three well-known relative
    /// paths at each ancestor.
    pub fn discover(start_dir: &Path) -> Option<PathBuf> {
        if let Ok(over) = std::env::var("UPIMULATOR_BOOKSIM_SERVICE") {
            let p = PathBuf::from(over);
            if p.is_file() {
                return Some(p);
            }
        }

        const CANDIDATES: &[&str] = &[
            "booksim_service",
            "build/booksim_service",
            "booksim2/build/booksim_service",
        ];

        let mut roots = vec![start_dir.to_path_buf()];
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }

        for root in roots {
            let mut dir = Some(root.as_path());
            while let Some(d) = dir {
                for candidate in CANDIDATES {
                    let p = d.join(candidate);
                    if p.is_file() {
                        return Some(p);
                    }
                }
                dir = d.parent();
            }
        }
        None
    }

    /// Estimate the transfer latency for `bytes` from `src` to `dst`, in
    /// cycles. `None` whenever the oracle is unavailable, times out, or has
    /// been permanently disabled by a previous timeout — every such case is
    /// indistinguishable to the caller by design.
    pub fn estimate(&self, src: i32, dst: i32, bytes: i64) -> Option<u32> {
        let (reply_tx, reply_rx) = bounded(1);
        let job = EstimateJob { src, dst, bytes, reply: reply_tx };
        if self.job_tx.send(WorkerMsg::Job(job)).is_err() {
            return None;
        }
        reply_rx.recv().unwrap_or(None)
    }

    /// Best-effort `{"op":"shutdown"}`, close stdin, bounded wait, then kill.
    pub fn shutdown(mut self) {
        let _ = self.job_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OracleClient {
    fn drop(&mut self) {
        let _ = self.job_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// The single owner of the child's pipes. Lives entirely on the actor
/// thread; nothing here is shared.
struct Actor {
    child: Child,
    stdin: Option<std::process::ChildStdin>,
    line_rx: Receiver<std::io::Result<String>>,
    _reader_handle: std::thread::JoinHandle<()>,
    noise: Vec<String>,
    disabled: bool,
}

impl Actor {
    fn ping(&mut self, deadline: Duration) -> Result<(), OracleError> {
        if self.send(&Request::Ping).is_err() {
            return Err(OracleError::Handshake { details: self.noise_excerpt() });
        }

        match self.recv_response(deadline) {
            Some(resp) if resp.ok => Ok(()),
            Some(_) => Err(OracleError::Handshake {
                details: self.noise_excerpt(),
            }),
            None => {
                self.disabled = true;
                Err(OracleError::Handshake {
                    details: self.noise_excerpt(),
                })
            }
        }
    }

    fn run(mut self, job_rx: Receiver<WorkerMsg>, deadline: Duration) {
        loop {
            match job_rx.recv() {
                Ok(WorkerMsg::Job(job)) => {
                    let result = self.handle_job(&job, deadline);
                    let _ = job.reply.send(result);
                }
                Ok(WorkerMsg::Shutdown) | Err(_) => {
                    self.do_shutdown();
                    return;
                }
            }
        }
    }

    fn handle_job(&mut self, job: &EstimateJob, deadline: Duration) -> Option<u32> {
        if self.disabled {
            return None;
        }

        let req = Request::Estimate { src: job.src, dst: job.dst, bytes: job.bytes };
        if self.send(&req).is_err() {
            self.disabled = true;
            return None;
        }

        match self.recv_response(deadline) {
            Some(resp) if resp.ok => resp
                .cycles
                .map(|c| c.round())
                .filter(|c| *c > 0.0)
                .map(|c| c as u32),
            Some(_) => None,
            None => {
                // Timed out or the transport died: permanently disable per §5.
                log::warn!(
                    "oracle request timed out or transport closed; disabling for the remainder of this run{}",
                    self.noise_excerpt().map(|n| format!(" (noise: {n})")).unwrap_or_default()
                );
                self.disabled = true;
                self.kill();
                None
            }
        }
    }

    fn send(&mut self, req: &Request) -> std::io::Result<()> {
        let mut line = serde_json::to_string(req).expect("request always serializes");
        line.push('\n');
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "oracle stdin closed"));
        };
        stdin.write_all(line.as_bytes())?;
        stdin.flush()
    }

    /// Read lines until one parses as a [`Response`], a deadline elapses, or
    /// the transport closes. Non-JSON lines are noise: recorded, dropped,
    /// and reading continues for the real response.
    fn recv_response(&mut self, deadline: Duration) -> Option<Response> {
        let timeout = after(deadline);
        loop {
            select! {
                recv(self.line_rx) -> msg => {
                    match msg {
                        Ok(Ok(line)) => {
                            match serde_json::from_str::<Response>(line.trim()) {
                                Ok(resp) => return Some(resp),
                                Err(_) => {
                                    self.push_noise(line);
                                    continue;
                                }
                            }
                        }
                        Ok(Err(_)) | Err(_) => return None,
                    }
                }
                recv(timeout) -> _ => return None,
            }
        }
    }

    fn push_noise(&mut self, line: String) {
        if self.noise.len() >= NOISE_BUFFER_CAP {
            self.noise.remove(0);
        }
        self.noise.push(line.trim_end().to_string());
    }

    fn noise_excerpt(&self) -> Option<String> {
        if self.noise.is_empty() {
            None
        } else {
            Some(self.noise.join(" / "))
        }
    }

    fn do_shutdown(&mut self) {
        let _ = self.send(&Request::Shutdown);
        self.stdin.take(); // close stdin so a well-behaved child sees EOF
        self.finish_shutdown();
    }

    fn finish_shutdown(&mut self) {
        let start = std::time::Instant::now();
        while start.elapsed() < SHUTDOWN_GRACE {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        self.kill();
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_finds_env_override() {
        let tmp = tempfile::tempdir().unwrap();
        let fake = tmp.path().join("booksim_service");
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();
        std::env::set_var("UPIMULATOR_BOOKSIM_SERVICE", &fake);
        let found = OracleClient::discover(tmp.path());
        std::env::remove_var("UPIMULATOR_BOOKSIM_SERVICE");
        assert_eq!(found, Some(fake));
    }

    #[test]
    fn discover_walks_ancestors_for_candidate_paths() {
        std::env::remove_var("UPIMULATOR_BOOKSIM_SERVICE");
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let build_dir = tmp.path().join("a/build");
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::write(build_dir.join("booksim_service"), b"#!/bin/sh\n").unwrap();

        let found = OracleClient::discover(&nested);
        assert_eq!(found, Some(build_dir.join("booksim_service")));
    }

    #[test]
    fn spawn_against_nonexistent_binary_is_a_spawn_error() {
        let err = OracleClient::spawn(Path::new("/nonexistent/booksim_service"), Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, OracleError::Spawn { .. }));
    }
}
