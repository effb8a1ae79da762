use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{
    self, Incoming, InitializeResult, NativeTool, Notification, Request, ToolsListResult,
};
use crate::error::{CallError, ConnectError};
use crate::manager::LaunchSpec;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub call_timeout: Duration,
    /// How long a closing backend gets between stdin EOF and a kill.
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            close_grace: Duration::from_secs(5),
        }
    }
}

/// Why a waiter was released without a response.
#[derive(Debug, Clone, Copy)]
enum Fault {
    Lost,
    Cancelled,
}

type Waiter = oneshot::Sender<Result<Incoming, Fault>>;

/// Correlator table. `Closed` makes post-failure calls fail fast.
enum Pending {
    Open(HashMap<u64, Waiter>),
    Closed(Fault),
}

type PendingMap = Arc<StdMutex<Pending>>;

/// One live MCP session over a child process's stdio.
///
/// All protocol state is confined here: one reader task drains stdout and
/// releases waiters by correlator, writes serialize through the stdin mutex.
pub struct Session {
    backend: String,
    config: SessionConfig,
    next_id: AtomicU64,
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    pending: PendingMap,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend)
            .field("healthy", &self.is_healthy())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn the backend process and perform the MCP handshake.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::Spawn` if the process cannot be started,
    /// `HandshakeTimeout` or `Protocol` if initialization fails.
    pub async fn connect(
        backend: &str,
        spec: &LaunchSpec,
        config: SessionConfig,
    ) -> Result<Self, ConnectError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ConnectError::Spawn {
            backend: backend.into(),
            source: e,
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            return Err(ConnectError::Protocol {
                backend: backend.into(),
                message: "child process stdio was not piped".into(),
            });
        };
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(backend.to_owned(), stderr);
        }

        let pending: PendingMap = Arc::new(StdMutex::new(Pending::Open(HashMap::new())));
        let reader = tokio::spawn(read_loop(backend.to_owned(), stdout, Arc::clone(&pending)));

        let session = Self {
            backend: backend.to_owned(),
            config,
            next_id: AtomicU64::new(1),
            stdin: Mutex::new(Some(stdin)),
            child: Mutex::new(Some(child)),
            pending,
            reader: StdMutex::new(Some(reader)),
        };

        match session.initialize().await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close(Duration::ZERO).await;
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> Result<(), ConnectError> {
        let params = serde_json::json!({
            "protocolVersion": codec::PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolgate",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let result = self
            .request(codec::METHOD_INITIALIZE, params, self.config.handshake_timeout, "initialize")
            .await
            .map_err(|e| match e {
                CallError::Timeout { timeout_ms, .. } => ConnectError::HandshakeTimeout {
                    backend: self.backend.clone(),
                    timeout_ms,
                },
                other => ConnectError::Protocol {
                    backend: self.backend.clone(),
                    message: other.to_string(),
                },
            })?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| ConnectError::Protocol {
                backend: self.backend.clone(),
                message: format!("malformed initialize result: {e}"),
            })?;
        tracing::debug!(
            backend = self.backend,
            protocol = init.protocol_version,
            "handshake complete"
        );

        self.notify(codec::METHOD_INITIALIZED, serde_json::json!({}))
            .await
            .map_err(|e| ConnectError::Protocol {
                backend: self.backend.clone(),
                message: e.to_string(),
            })
    }

    /// Enumerate the backend's tools.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the request fails.
    pub async fn list_tools(&self) -> Result<Vec<NativeTool>, CallError> {
        let result = self
            .request(
                codec::METHOD_LIST_TOOLS,
                serde_json::json!({}),
                self.config.call_timeout,
                "tools/list",
            )
            .await?;
        let parsed: ToolsListResult =
            serde_json::from_value(result).map_err(|e| CallError::Backend {
                backend: self.backend.clone(),
                tool: "tools/list".into(),
                error: codec::RpcError {
                    code: -32700,
                    message: format!("malformed tools/list result: {e}"),
                    data: None,
                },
            })?;
        Ok(parsed.tools)
    }

    /// Invoke a native tool and return the backend's result payload verbatim.
    ///
    /// # Errors
    ///
    /// `Timeout` retires the correlator but leaves the session usable;
    /// `SessionLost` means the reader loop observed EOF or an I/O error.
    pub async fn call_tool(
        &self,
        tool: &str,
        args: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        let params = serde_json::json!({ "name": tool, "arguments": args });
        self.request(codec::METHOD_CALL_TOOL, params, timeout, tool)
            .await
    }

    async fn request(
        &self,
        method: &'static str,
        params: serde_json::Value,
        timeout: Duration,
        label: &str,
    ) -> Result<serde_json::Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = lock_pending(&self.pending);
            match &mut *pending {
                Pending::Open(map) => {
                    map.insert(id, tx);
                }
                Pending::Closed(fault) => return Err(self.fault_error(*fault, label)),
            }
        }

        let frame = Request::new(id, method, params);
        if let Err(e) = self.write_frame(&frame).await {
            self.retire(id);
            fail_all(&self.backend, &self.pending, Fault::Lost);
            tracing::warn!(backend = self.backend, "stdin write failed: {e}");
            return Err(CallError::SessionLost {
                backend: self.backend.clone(),
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = timeout.as_millis() as u64;
        match tokio::time::timeout(timeout, rx).await {
            Err(_elapsed) => {
                self.retire(id);
                Err(CallError::Timeout {
                    backend: self.backend.clone(),
                    tool: label.into(),
                    timeout_ms,
                })
            }
            Ok(Err(_sender_dropped)) => Err(CallError::SessionLost {
                backend: self.backend.clone(),
            }),
            Ok(Ok(Err(fault))) => Err(self.fault_error(fault, label)),
            Ok(Ok(Ok(frame))) => {
                if let Some(error) = frame.error {
                    return Err(CallError::Backend {
                        backend: self.backend.clone(),
                        tool: label.into(),
                        error,
                    });
                }
                Ok(frame.result.unwrap_or(serde_json::Value::Null))
            }
        }
    }

    async fn notify(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<(), std::io::Error> {
        self.write_frame(&Notification::new(method, params)).await
    }

    async fn write_frame<T: serde::Serialize>(&self, frame: &T) -> Result<(), std::io::Error> {
        let mut line = serde_json::to_string(frame).map_err(std::io::Error::other)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            return Err(std::io::Error::other("stdin already closed"));
        };
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    fn retire(&self, id: u64) {
        if let Pending::Open(map) = &mut *lock_pending(&self.pending) {
            map.remove(&id);
        }
    }

    fn fault_error(&self, fault: Fault, label: &str) -> CallError {
        match fault {
            Fault::Lost => CallError::SessionLost {
                backend: self.backend.clone(),
            },
            Fault::Cancelled => CallError::Cancelled {
                backend: self.backend.clone(),
                tool: label.into(),
            },
        }
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(*lock_pending(&self.pending), Pending::Open(_))
    }

    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Cancel in-flight calls, signal EOF on stdin, and reap the child.
    /// Escalates to a kill after `grace`. Idempotent.
    pub async fn close(&self, grace: Duration) {
        fail_all(&self.backend, &self.pending, Fault::Cancelled);

        // Dropping stdin is the stdio-transport termination signal.
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(backend = self.backend, %status, "backend exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(backend = self.backend, "wait failed: {e}");
                }
                Err(_elapsed) => {
                    tracing::warn!(backend = self.backend, "backend did not exit, killing");
                    let _ = child.kill().await;
                }
            }
        }

        let reader = self.reader.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(handle) = reader {
            // The reader exits on stdout EOF once the child is gone.
            if tokio::time::timeout(Duration::from_secs(1), handle).await.is_err() {
                tracing::warn!(backend = self.backend, "reader loop did not stop in time");
            }
        }
    }
}

fn lock_pending(pending: &StdMutex<Pending>) -> std::sync::MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Release every waiter with `fault` and fail all later calls the same way.
fn fail_all(backend: &str, pending: &PendingMap, fault: Fault) {
    let mut guard = lock_pending(pending);
    if let Pending::Open(map) = &mut *guard {
        let waiters = std::mem::take(map);
        if !waiters.is_empty() {
            tracing::debug!(
                backend,
                count = waiters.len(),
                "releasing in-flight calls: {fault:?}"
            );
        }
        for (_, tx) in waiters {
            let _ = tx.send(Err(fault));
        }
        *guard = Pending::Closed(fault);
    }
}

/// One reader per session: drains stdout, dispatches responses by
/// correlator, logs everything else at debug.
async fn read_loop(backend: String, stdout: ChildStdout, pending: PendingMap) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&backend, &line, &pending),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(backend, "stdout read failed: {e}");
                break;
            }
        }
    }
    fail_all(&backend, &pending, Fault::Lost);
}

fn dispatch_line(backend: &str, line: &str, pending: &PendingMap) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }
    let Ok(frame) = serde_json::from_str::<Incoming>(trimmed) else {
        tracing::debug!(backend, "skipping non-JSON-RPC output");
        return;
    };

    if let Some(id) = frame.correlator() {
        let waiter = match &mut *lock_pending(pending) {
            Pending::Open(map) => map.remove(&id),
            Pending::Closed(_) => None,
        };
        match waiter {
            Some(tx) => {
                let _ = tx.send(Ok(frame));
            }
            // Retired correlator: a timed-out call's late response.
            None => tracing::debug!(backend, id, "dropping response for retired correlator"),
        }
    } else if let Some(method) = frame.method {
        tracing::debug!(backend, method, "ignoring server notification");
    }
}

fn spawn_stderr_logger(backend: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(backend, "stderr: {line}");
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
        }
    }

    const INIT_OK: &str = r#"read _i; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"stub","version":"0"}}}'; read _n"#;

    fn config(call_ms: u64) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_millis(call_ms),
            close_grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_spawn_error() {
        let spec = LaunchSpec {
            command: "nonexistent-mcp-binary".into(),
            args: Vec::new(),
            env: HashMap::new(),
        };
        let err = Session::connect("ghost", &spec, SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Spawn { ref backend, .. } if backend == "ghost"));
    }

    #[tokio::test]
    async fn immediate_exit_fails_handshake() {
        let err = Session::connect("broken", &sh("exit 0"), config(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Protocol { .. }));
    }

    #[tokio::test]
    async fn silent_backend_times_out_handshake() {
        let cfg = SessionConfig {
            handshake_timeout: Duration::from_millis(300),
            ..config(500)
        };
        let start = std::time::Instant::now();
        let err = Session::connect("mute", &sh("sleep 30"), cfg).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectError::HandshakeTimeout { timeout_ms: 300, .. }
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn handshake_and_list_tools() {
        let script = format!(
            "{INIT_OK}; read _l; printf '%s\\n' '{}'",
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object"}}]}}"#
        );
        let session = Session::connect("stub", &sh(&script), config(2000))
            .await
            .unwrap();
        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        session.close(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn call_timeout_leaves_session_usable() {
        // First call is swallowed; the second is answered. The retired
        // correlator (3) must not cross-talk with the live one (4).
        let script = format!(
            "{INIT_OK}; read _l; printf '%s\\n' '{}'; read _c1; read _c2; printf '%s\\n' '{}'; sleep 5",
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#,
            r#"{"jsonrpc":"2.0","id":4,"result":{"answer":"second"}}"#
        );
        let session = Session::connect("flaky", &sh(&script), config(2000))
            .await
            .unwrap();
        session.list_tools().await.unwrap();

        let start = std::time::Instant::now();
        let err = session
            .call_tool("slow", serde_json::json!({}), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout { timeout_ms: 500, .. }));
        assert!(start.elapsed() < Duration::from_millis(700));
        assert!(session.is_healthy());

        let result = session
            .call_tool("slow", serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["answer"], "second");
        session.close(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn backend_error_surfaces_payload() {
        let script = format!(
            "{INIT_OK}; read _c; printf '%s\\n' '{}'",
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"bad arguments"}}"#
        );
        let session = Session::connect("strict", &sh(&script), config(2000))
            .await
            .unwrap();
        let err = session
            .call_tool("pick", serde_json::json!({"x": 1}), Duration::from_secs(2))
            .await
            .unwrap_err();
        match err {
            CallError::Backend { error, tool, .. } => {
                assert_eq!(error.code, -32602);
                assert_eq!(tool, "pick");
            }
            other => panic!("expected Backend error, got {other:?}"),
        }
        session.close(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn backend_death_fails_in_flight_and_later_calls() {
        let script = format!("{INIT_OK}; read _c; exit 1");
        let session = Session::connect("dying", &sh(&script), config(2000))
            .await
            .unwrap();

        let err = session
            .call_tool("any", serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::SessionLost { .. }));
        assert!(!session.is_healthy());

        let err = session
            .call_tool("any", serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::SessionLost { .. }));
        session.close(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn concurrent_calls_get_their_own_responses() {
        // Responses arrive out of submission order: id 4 first, then id 3.
        let script = format!(
            "{INIT_OK}; read _c1; read _c2; printf '%s\\n' '{}'; printf '%s\\n' '{}'",
            r#"{"jsonrpc":"2.0","id":4,"result":{"tag":"b"}}"#,
            r#"{"jsonrpc":"2.0","id":3,"result":{"tag":"a"}}"#
        );
        let session = Arc::new(
            Session::connect("pair", &sh(&script), config(2000))
                .await
                .unwrap(),
        );

        let s1 = Arc::clone(&session);
        let first =
            tokio::spawn(
                async move { s1.call_tool("a", serde_json::json!({}), Duration::from_secs(2)).await },
            );
        // Keep submission order deterministic for the stub.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let s2 = Arc::clone(&session);
        let second =
            tokio::spawn(
                async move { s2.call_tool("b", serde_json::json!({}), Duration::from_secs(2)).await },
            );

        assert_eq!(first.await.unwrap().unwrap()["tag"], "a");
        assert_eq!(second.await.unwrap().unwrap()["tag"], "b");
        session.close(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn close_cancels_in_flight_calls() {
        let script = format!("{INIT_OK}; read _c; sleep 30");
        let session = Arc::new(
            Session::connect("held", &sh(&script), config(2000))
                .await
                .unwrap(),
        );

        let s = Arc::clone(&session);
        let call = tokio::spawn(async move {
            s.call_tool("wait", serde_json::json!({}), Duration::from_secs(10)).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.close(Duration::from_millis(100)).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Cancelled { ref tool, .. } if tool == "wait"));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = Session::connect("twice", &sh(&format!("{INIT_OK}; sleep 30")), config(2000))
            .await
            .unwrap();
        session.close(Duration::from_millis(100)).await;
        session.close(Duration::from_millis(100)).await;
        assert!(!session.is_healthy());
    }
}
