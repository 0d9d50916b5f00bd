//! Producer/consumer transfer pipeline
//!
//! Data moves between servers as two external processes joined by an OS pipe:
//! the producer's stdout is handed directly to the consumer's stdin, so no
//! bytes pass through this process and nothing is written to disk.
//!
//! Each child gets a waiter thread that drains its diagnostic output, reaps it
//! and reports the exit status on a channel. The calling thread blocks in a
//! `select!` over those reports and the caller's [`CancelToken`]; on
//! cancellation both children are killed and [`TransferError::Cancelled`] is
//! returned.

use crate::config::ToolPaths;
use crate::connection::{quote_qualified, ConnectionInfo};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use std::fmt;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Cooperative cancellation shared between a caller and long-running work.
///
/// Cloning yields a handle to the same token. Cancelling drops the internal
/// sender, which wakes every receiver blocked on [`CancelToken::signal`].
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                signal: rx,
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        trigger.take();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Becomes ready (disconnected) once the token is cancelled.
    #[must_use]
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// `Err(Cancelled)` if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Cancelled`] after [`CancelToken::cancel`].
    pub fn check(&self) -> Result<(), TransferError> {
        if self.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Which side of the pipe a process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        })
    }
}

/// Transfer pipeline error type
#[derive(Debug)]
pub enum TransferError {
    /// The process could not be started
    Spawn {
        role: Role,
        program: String,
        source: std::io::Error,
    },
    /// The process exited unsuccessfully
    Failed {
        role: Role,
        program: String,
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        stderr: String,
    },
    /// Cancelled by the caller; both processes were terminated
    Cancelled,
    /// Pipe or waiter plumbing failed
    Io(String),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::Spawn {
                role,
                program,
                source,
            } => write!(f, "failed to start {} '{}': {}", role, program, source),
            TransferError::Failed {
                role,
                program,
                code,
                stderr,
            } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                write!(f, "{} '{}' exited with status {}", role, program, code)?;
                let detail = stderr.trim();
                if !detail.is_empty() {
                    write!(f, ": {}", detail)?;
                }
                Ok(())
            }
            TransferError::Cancelled => f.write_str("transfer cancelled"),
            TransferError::Io(msg) => write!(f, "transfer I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransferError {}

/// How to judge a consumer that exits non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPolicy {
    /// Any non-zero exit is a failure
    Strict,
    /// `pg_restore` exits 1 for errors it chose to ignore; accept the exit when
    /// every reported error is a known-harmless kind
    TolerateRestoreWarnings,
}

/// What the two processes printed.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub producer_stderr: String,
    pub consumer_stdout: String,
    pub consumer_stderr: String,
    /// Restore errors accepted under [`ConsumerPolicy::TolerateRestoreWarnings`]
    pub warnings: Vec<String>,
}

/// Restore error fragments that do not indicate a broken copy.
const BENIGN_RESTORE_ERRORS: &[&str] = &[
    "already exists",
    "must be owner of",
    "errors ignored on restore",
    "violates foreign key constraint",
    "unrecognized configuration parameter",
    "role \"",
    "permission denied to create extension",
    "extension \"",
];

/// Returns the error lines of a restore log if all of them are benign.
///
/// `None` means at least one error line is not in the benign list.
#[must_use]
pub fn benign_restore_errors(stderr: &str) -> Option<Vec<String>> {
    let mut accepted = Vec::new();
    for line in stderr.lines() {
        let lower = line.to_ascii_lowercase();
        if !lower.contains("error") {
            continue;
        }
        if BENIGN_RESTORE_ERRORS.iter().any(|pattern| lower.contains(pattern)) {
            accepted.push(line.trim().to_string());
        } else {
            return None;
        }
    }
    Some(accepted)
}

enum Event {
    Exited(Option<Exit>),
    Cancelled,
}

struct Exit {
    role: Role,
    status: std::io::Result<ExitStatus>,
    stdout: String,
    stderr: String,
}

/// Runs `producer | consumer` to completion.
///
/// Either process exiting non-zero fails the transfer, subject to `policy` for
/// the consumer.
///
/// # Errors
///
/// Returns [`TransferError::Cancelled`] if `cancel` fires before or during the
/// transfer, [`TransferError::Spawn`] if a process cannot start and
/// [`TransferError::Failed`] if one exits unsuccessfully.
pub fn run_pipeline(
    producer: &mut Command,
    consumer: &mut Command,
    policy: ConsumerPolicy,
    cancel: &CancelToken,
) -> Result<PipelineOutput, TransferError> {
    cancel.check()?;

    let producer_program = program_name(producer);
    let consumer_program = program_name(consumer);
    log::debug!("pipeline: {} | {}", producer_program, consumer_program);

    let mut producer_child = producer
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| TransferError::Spawn {
            role: Role::Producer,
            program: producer_program.clone(),
            source,
        })?;

    let Some(pipe) = producer_child.stdout.take() else {
        terminate(&mut producer_child);
        return Err(TransferError::Io("producer stdout was not captured".to_string()));
    };

    let spawned = consumer
        .stdin(Stdio::from(pipe))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    // The command holds the read end until its stdin is replaced; the producer
    // must see EPIPE if the consumer exits early.
    consumer.stdin(Stdio::null());

    let consumer_child = match spawned {
        Ok(child) => child,
        Err(source) => {
            terminate(&mut producer_child);
            return Err(TransferError::Spawn {
                role: Role::Consumer,
                program: consumer_program,
                source,
            });
        }
    };

    let (done_tx, done_rx) = unbounded();
    let mut running = vec![
        (Role::Producer, spawn_waiter(Role::Producer, producer_child, done_tx.clone())),
        (Role::Consumer, spawn_waiter(Role::Consumer, consumer_child, done_tx)),
    ];

    let mut cancelled = false;
    let mut exits = Vec::with_capacity(2);
    while exits.len() < 2 {
        let event = if cancelled {
            Event::Exited(done_rx.recv().ok())
        } else {
            select! {
                recv(done_rx) -> msg => Event::Exited(msg.ok()),
                recv(cancel.signal()) -> _ => Event::Cancelled,
            }
        };
        match event {
            Event::Cancelled => {
                log::warn!(
                    "transfer cancelled; terminating {} | {}",
                    producer_program,
                    consumer_program
                );
                cancelled = true;
                for (role, child) in &running {
                    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = child.kill() {
                        log::debug!("killing {} failed: {}", role, e);
                    }
                }
            }
            Event::Exited(Some(exit)) => {
                running.retain(|(role, _)| *role != exit.role);
                exits.push(exit);
            }
            Event::Exited(None) => {
                return Err(TransferError::Io("process waiter disconnected".to_string()));
            }
        }
    }

    if cancelled {
        return Err(TransferError::Cancelled);
    }

    let mut output = PipelineOutput::default();
    let mut producer_failure = None;
    let mut consumer_failure = None;

    for exit in exits {
        let status = exit
            .status
            .map_err(|e| TransferError::Io(format!("waiting for {}: {}", exit.role, e)))?;
        match exit.role {
            Role::Producer => {
                if !status.success() {
                    producer_failure = Some(TransferError::Failed {
                        role: Role::Producer,
                        program: producer_program.clone(),
                        code: status.code(),
                        stderr: exit.stderr.clone(),
                    });
                }
                output.producer_stderr = exit.stderr;
            }
            Role::Consumer => {
                if !status.success() {
                    let tolerated = match policy {
                        ConsumerPolicy::Strict => None,
                        ConsumerPolicy::TolerateRestoreWarnings => benign_restore_errors(&exit.stderr),
                    };
                    // A silent non-zero exit has nothing to tolerate.
                    match tolerated {
                        Some(lines) if !lines.is_empty() => output.warnings = lines,
                        _ => {
                            consumer_failure = Some(TransferError::Failed {
                                role: Role::Consumer,
                                program: consumer_program.clone(),
                                code: status.code(),
                                stderr: exit.stderr.clone(),
                            });
                        }
                    }
                }
                output.consumer_stdout = exit.stdout;
                output.consumer_stderr = exit.stderr;
            }
        }
    }

    // A failing producer usually makes the consumer fail too; report the cause.
    if let Some(err) = producer_failure.or(consumer_failure) {
        return Err(err);
    }
    Ok(output)
}

/// Drains the child's output, then reaps it and reports on `done`.
///
/// The returned handle lets the caller kill the child. The waiter only holds
/// the lock for the final `wait`, after both pipes have closed.
fn spawn_waiter(role: Role, mut child: Child, done: Sender<Exit>) -> Arc<Mutex<Child>> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let child = Arc::new(Mutex::new(child));
    let handle = Arc::clone(&child);

    thread::spawn(move || {
        let stderr_reader = stderr_pipe.map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        let mut stdout = String::new();
        if let Some(mut out) = stdout_pipe {
            let _ = out.read_to_string(&mut stdout);
        }
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let status = child.lock().unwrap_or_else(PoisonError::into_inner).wait();

        let _ = done.send(Exit {
            role,
            status,
            stdout,
            stderr,
        });
    });
    handle
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

/// Options for the bulk `pg_dump`.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Tables whose schema is dumped but whose rows are not
    pub exclude_table_data: Vec<String>,
    /// Tables left out entirely
    pub exclude_tables: Vec<String>,
}

/// Builds `pg_dump`, `pg_restore` and `psql` invocations.
///
/// Passwords travel through `PGPASSWORD` rather than the command line.
#[derive(Debug, Clone)]
pub struct PgTools {
    paths: ToolPaths,
}

impl PgTools {
    #[must_use]
    pub fn new(paths: ToolPaths) -> Self {
        Self { paths }
    }

    fn base(program: &str, conn: &ConnectionInfo) -> Command {
        let mut cmd = Command::new(program);
        if let Some(password) = &conn.password {
            cmd.env("PGPASSWORD", password);
        }
        cmd
    }

    /// Custom-format dump of `conn`'s database to stdout.
    #[must_use]
    pub fn dump(&self, conn: &ConnectionInfo, options: &DumpOptions) -> Command {
        let mut cmd = Self::base(&self.paths.pg_dump, conn);
        cmd.arg("--format=custom")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg(format!("--dbname={}", conn.to_url_without_password()));
        for table in &options.exclude_table_data {
            cmd.arg(format!("--exclude-table-data={}", quote_qualified(table)));
        }
        for table in &options.exclude_tables {
            cmd.arg(format!("--exclude-table={}", quote_qualified(table)));
        }
        cmd
    }

    /// Restore a custom-format dump from stdin into `conn`'s database.
    ///
    /// With `clean`, objects present in the dump are dropped first so a re-sync
    /// replaces them; objects not in the dump (the sync ledger) are untouched.
    #[must_use]
    pub fn restore(&self, conn: &ConnectionInfo, clean: bool) -> Command {
        let mut cmd = Self::base(&self.paths.pg_restore, conn);
        cmd.arg("--no-owner")
            .arg("--no-privileges")
            .arg(format!("--dbname={}", conn.to_url_without_password()));
        if clean {
            cmd.arg("--clean").arg("--if-exists");
        }
        cmd
    }

    /// Stream the rows of `table` matching `predicate` as COPY text to stdout.
    #[must_use]
    pub fn copy_out(&self, conn: &ConnectionInfo, table: &str, predicate: &str) -> Command {
        let sql = format!(
            "COPY (SELECT * FROM {} WHERE {}) TO STDOUT",
            quote_qualified(table),
            predicate
        );
        self.psql(conn, &sql)
    }

    /// Load COPY text from stdin into `table`.
    #[must_use]
    pub fn copy_in(&self, conn: &ConnectionInfo, table: &str) -> Command {
        let sql = format!("COPY {} FROM STDIN", quote_qualified(table));
        self.psql(conn, &sql)
    }

    fn psql(&self, conn: &ConnectionInfo, sql: &str) -> Command {
        let mut cmd = Self::base(&self.paths.psql, conn);
        cmd.arg("--no-psqlrc")
            .arg("--set=ON_ERROR_STOP=1")
            .arg(format!("--dbname={}", conn.to_url_without_password()))
            .arg(format!("--command={}", sql));
        cmd
    }
}

/// Row count from psql's `COPY n` command tag.
#[must_use]
pub fn parse_copy_count(stdout: &str) -> Option<i64> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("COPY "))
        .and_then(|n| n.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_cancel_token_is_shared_and_idempotent() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());
        handle.cancel();
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(TransferError::Cancelled)));
        assert!(token.signal().recv().is_err());
    }

    #[test]
    fn test_benign_restore_errors() {
        let log = "pg_restore: error: could not execute query: ERROR:  role \"app\" does not exist\n\
                   pg_restore: warning: errors ignored on restore: 1\n";
        assert_eq!(benign_restore_errors(log).map(|v| v.len()), Some(2));

        let bad = "pg_restore: error: could not execute query: ERROR:  syntax error at or near \"x\"";
        assert!(benign_restore_errors(bad).is_none());
        assert_eq!(benign_restore_errors("").map(|v| v.len()), Some(0));
    }

    #[test]
    fn test_parse_copy_count() {
        assert_eq!(parse_copy_count("COPY 42\n"), Some(42));
        assert_eq!(parse_copy_count("SET\nCOPY 0"), Some(0));
        assert_eq!(parse_copy_count(""), None);
    }

    #[test]
    fn test_dump_command_quotes_excluded_tables() {
        let tools = PgTools::new(ToolPaths::default());
        let conn = crate::connection::parse_connection_string("postgres://u:secret@db:5432/app").unwrap();
        let cmd = tools.dump(
            &conn,
            &DumpOptions {
                exclude_table_data: vec!["public.events".into()],
                exclude_tables: vec!["audit.log".into()],
            },
        );
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"--exclude-table-data=\"public\".\"events\"".to_string()));
        assert!(args.contains(&"--exclude-table=\"audit\".\"log\"".to_string()));
        assert!(args.iter().all(|a| !a.contains("secret")));
        assert!(cmd
            .get_envs()
            .any(|(k, v)| k == "PGPASSWORD" && v.map(|v| v == "secret").unwrap_or(false)));
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_streams_producer_into_consumer() {
        let out = run_pipeline(
            &mut sh("printf 'a\\nb\\nc\\n'"),
            &mut sh("wc -l | tr -d ' '"),
            ConsumerPolicy::Strict,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.consumer_stdout.trim(), "3");
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_producer_failure() {
        let err = run_pipeline(
            &mut sh("echo boom >&2; exit 3"),
            &mut sh("cat > /dev/null"),
            ConsumerPolicy::Strict,
            &CancelToken::new(),
        )
        .unwrap_err();
        match err {
            TransferError::Failed { role, code, stderr, .. } => {
                assert_eq!(role, Role::Producer);
                assert_eq!(code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_consumer_failure_and_tolerance() {
        let err = run_pipeline(
            &mut sh("echo data"),
            &mut sh("cat > /dev/null; echo 'ERROR: syntax error' >&2; exit 1"),
            ConsumerPolicy::TolerateRestoreWarnings,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Failed { role: Role::Consumer, .. }));

        let out = run_pipeline(
            &mut sh("echo data"),
            &mut sh("cat > /dev/null; echo 'pg_restore: warning: errors ignored on restore: 2' >&2; exit 1"),
            ConsumerPolicy::TolerateRestoreWarnings,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.warnings.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_missing_program() {
        let err = run_pipeline(
            &mut Command::new("/nonexistent/goldcopy-producer"),
            &mut sh("cat"),
            ConsumerPolicy::Strict,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Spawn { role: Role::Producer, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_already_cancelled_does_not_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let err = run_pipeline(
            &mut Command::new("/nonexistent/never-run"),
            &mut sh("cat"),
            ConsumerPolicy::Strict,
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_cancellation_kills_both_processes() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let start = Instant::now();
        let mut producer = Command::new("sleep");
        producer.arg("30");
        let err = run_pipeline(
            &mut producer,
            &mut sh("exec sleep 30"),
            ConsumerPolicy::Strict,
            &token,
        )
        .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, TransferError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_silent_consumer_failure_is_not_tolerated() {
        let err = run_pipeline(
            &mut sh("echo data"),
            &mut sh("cat > /dev/null; exit 1"),
            ConsumerPolicy::TolerateRestoreWarnings,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Failed { role: Role::Consumer, code: Some(1), .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_pipeline_cancel_after_producer_exited() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            trigger.cancel();
        });

        let start = Instant::now();
        let err = run_pipeline(
            &mut sh("true"),
            &mut sh("exec sleep 30"),
            ConsumerPolicy::Strict,
            &token,
        )
        .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, TransferError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
