//! Per-connection session handling.
//!
//! A [`Session`] owns one client connection from accept to QUIT. It runs
//! the authentication state machine, parses one command line at a time,
//! and dispatches to a handler. File bytes travel on the same connection
//! as the commands: downloads announce their size in the `150` reply and
//! uploads declare theirs in the `STOR` line, so both sides always know
//! exactly how many raw bytes separate two command lines.
//!
//! Command processing is strictly sequential. The next line is not read
//! until the previous command's replies and any byte stream have been
//! fully written.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use protocol::{Command, ParseError, Reply, ReplyCode};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{Permissions, UserStore};
use crate::files::{LockRegistry, Sandbox, SandboxError};

/// Greeting text sent as the `220` banner.
const GREETING: &str = "Skiff server ready.";

/// Buffer size for streaming file bytes.
const CHUNK_SIZE: usize = 8 * 1024;

/// Tunables a session inherits from server configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Close the connection after this much idle time between commands.
    /// `None` means connections may idle forever.
    pub idle_timeout: Option<Duration>,
    /// Close the connection after this many failed login attempts.
    /// Zero means unlimited attempts.
    pub max_login_failures: u32,
}

/// Authentication progress of one connection.
enum AuthState {
    Unauthenticated,
    UsernamePending { username: String },
    Authenticated(Login),
}

/// State bound at login time from the user's record.
struct Login {
    username: String,
    sandbox: Sandbox,
    cwd: PathBuf,
    permissions: Permissions,
}

/// Snapshot of login state a handler works against.
struct LoginView {
    username: String,
    sandbox: Sandbox,
    cwd: PathBuf,
    permissions: Permissions,
}

/// Whether the session keeps going after a command.
enum Flow {
    Continue,
    Quit,
}

/// Recoverable command failures, each mapping to exactly one reply.
///
/// These never carry OS error details; the wire only ever sees the short
/// reason from [`CommandError::reply`].
#[derive(Debug, Error)]
enum CommandError {
    #[error("authentication required")]
    AuthRequired,
    #[error("credentials rejected")]
    AuthFailed,
    #[error("PASS without a pending username")]
    BadSequence,
    #[error("missing capability")]
    PermissionDenied,
    #[error("path escapes the sandbox")]
    PathForbidden,
    #[error("no such file")]
    FileNotFound,
    #[error("no such directory")]
    DirectoryNotFound,
    #[error("peer closed mid-transfer")]
    TransferIncomplete,
    #[error("storage failure")]
    Io,
}

impl CommandError {
    fn reply(&self) -> Reply {
        match self {
            CommandError::AuthRequired => Reply::new(ReplyCode::NotLoggedIn, "Not logged in."),
            CommandError::AuthFailed => Reply::new(ReplyCode::NotLoggedIn, "Invalid user/pass."),
            CommandError::BadSequence => Reply::new(ReplyCode::BadSequence, "Send USER first."),
            CommandError::PermissionDenied => {
                Reply::new(ReplyCode::ActionFailed, "Permission denied.")
            }
            CommandError::PathForbidden => Reply::new(ReplyCode::ActionFailed, "Invalid path."),
            CommandError::FileNotFound => Reply::new(ReplyCode::ActionFailed, "File not found."),
            CommandError::DirectoryNotFound => {
                Reply::new(ReplyCode::ActionFailed, "Directory not found.")
            }
            CommandError::TransferIncomplete => {
                Reply::new(ReplyCode::TransferAborted, "Transfer aborted.")
            }
            CommandError::Io => Reply::new(ReplyCode::ActionFailed, "Operation failed."),
        }
    }
}

/// Map a sandbox failure for a command that targets a file.
fn file_error(err: SandboxError) -> CommandError {
    match err {
        SandboxError::NotFound(_) => CommandError::FileNotFound,
        SandboxError::Forbidden(_) | SandboxError::BadFileName(_) => CommandError::PathForbidden,
        SandboxError::Io(_) => CommandError::Io,
    }
}

/// Map a sandbox failure for a command that targets a directory.
fn dir_error(err: SandboxError) -> CommandError {
    match err {
        SandboxError::NotFound(_) => CommandError::DirectoryNotFound,
        SandboxError::Forbidden(_) | SandboxError::BadFileName(_) => CommandError::PathForbidden,
        SandboxError::Io(_) => CommandError::Io,
    }
}

/// Server-side state for one client connection.
pub struct Session<S> {
    id: Uuid,
    reader: BufReader<tokio::io::ReadHalf<S>>,
    writer: tokio::io::WriteHalf<S>,
    users: Arc<UserStore>,
    locks: Arc<LockRegistry>,
    options: SessionOptions,
    login_failures: u32,
    state: AuthState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    /// Wrap an accepted connection.
    pub fn new(
        stream: S,
        users: Arc<UserStore>,
        locks: Arc<LockRegistry>,
        options: SessionOptions,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            id: Uuid::new_v4(),
            reader: BufReader::new(read_half),
            writer: write_half,
            users,
            locks,
            options,
            login_failures: 0,
            state: AuthState::Unauthenticated,
        }
    }

    /// The session's identifier, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve the connection until QUIT, disconnect, or a socket error.
    pub async fn run(mut self) -> io::Result<()> {
        self.send(Reply::new(ReplyCode::ServiceReady, GREETING)).await?;

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = self.reader.read_until(b'\n', &mut line);
            let n = match self.options.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, read).await {
                    Ok(result) => result?,
                    Err(_) => {
                        info!(session = %self.id, "closing idle connection");
                        return Ok(());
                    }
                },
                None => read.await?,
            };
            if n == 0 {
                debug!(session = %self.id, "client disconnected");
                return Ok(());
            }

            let text = match std::str::from_utf8(strip_line_ending(&line)) {
                Ok(text) => text,
                Err(_) => {
                    warn!(session = %self.id, "non-UTF-8 command line, closing connection");
                    return Ok(());
                }
            };

            let command = match Command::parse(text) {
                Ok(command) => command,
                Err(ParseError::Empty) => continue,
                Err(ParseError::Unknown(verb)) => {
                    debug!(session = %self.id, verb = %verb, "unimplemented verb");
                    self.send(Reply::new(
                        ReplyCode::NotImplemented,
                        "Command not implemented.",
                    ))
                    .await?;
                    continue;
                }
                Err(ParseError::Syntax(message)) => {
                    self.send(Reply::new(ReplyCode::SyntaxError, message)).await?;
                    continue;
                }
            };

            debug!(session = %self.id, verb = command.verb(), "dispatching");
            match self.handle(command).await? {
                Flow::Continue => {}
                Flow::Quit => return Ok(()),
            }
        }
    }

    async fn handle(&mut self, command: Command) -> io::Result<Flow> {
        match command {
            Command::User { name } => self.cmd_user(name).await,
            Command::Pass { password } => self.cmd_pass(password).await,
            Command::Pwd => self.cmd_pwd().await,
            Command::Cwd { dir } => self.cmd_cwd(dir).await,
            Command::List => self.cmd_list().await,
            Command::Retr { name } => self.cmd_retr(name).await,
            Command::Stor { name, size } => self.cmd_stor(name, size).await,
            Command::Dele { name } => self.cmd_dele(name).await,
            Command::Quit => self.cmd_quit().await,
        }
    }

    // ======================================================
    // Commands
    // ======================================================

    async fn cmd_user(&mut self, name: String) -> io::Result<Flow> {
        // A new USER always restarts authentication, even mid-session.
        self.state = AuthState::UsernamePending { username: name };
        self.ok(ReplyCode::NeedPassword, "Username OK, need password.")
            .await
    }

    async fn cmd_pass(&mut self, password: String) -> io::Result<Flow> {
        let username = match &self.state {
            AuthState::UsernamePending { username } => username.clone(),
            _ => return self.fail(CommandError::BadSequence).await,
        };
        // A failed PASS forces the client to start over with USER.
        self.state = AuthState::Unauthenticated;

        let users = Arc::clone(&self.users);
        let lookup_name = username.clone();
        let verified =
            tokio::task::spawn_blocking(move || users.verify(&lookup_name, &password))
                .await
                .map_err(io::Error::other)?;

        let record = match verified {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.login_failures += 1;
                info!(session = %self.id, user = %username, "login rejected");
                let flow = self.fail(CommandError::AuthFailed).await?;
                if self.options.max_login_failures > 0
                    && self.login_failures >= self.options.max_login_failures
                {
                    warn!(session = %self.id, "closing connection after repeated login failures");
                    return Ok(Flow::Quit);
                }
                return Ok(flow);
            }
            Err(e) => {
                warn!(session = %self.id, user = %username, error = %e, "credential store failure");
                return self.fail(CommandError::Io).await;
            }
        };

        // The home directory is created lazily on first login.
        if let Err(e) = tokio::fs::create_dir_all(&record.home_dir).await {
            warn!(session = %self.id, home = %record.home_dir.display(), error = %e,
                "failed to create home directory");
            return self.fail(CommandError::Io).await;
        }
        let sandbox = match Sandbox::new(&record.home_dir) {
            Ok(sandbox) => sandbox,
            Err(e) => {
                warn!(session = %self.id, home = %record.home_dir.display(), error = %e,
                    "failed to open home directory");
                return self.fail(CommandError::Io).await;
            }
        };

        let cwd = sandbox.home().to_path_buf();
        info!(session = %self.id, user = %record.username, "login successful");
        self.state = AuthState::Authenticated(Login {
            username: record.username,
            sandbox,
            cwd,
            permissions: record.permissions,
        });
        self.ok(ReplyCode::LoggedIn, "Logged in.").await
    }

    async fn cmd_pwd(&mut self) -> io::Result<Flow> {
        let Some(view) = self.login_view() else {
            return self.fail(CommandError::AuthRequired).await;
        };
        let rel = display_path(view.sandbox.home(), &view.cwd);
        self.ok(ReplyCode::PathCreated, &format!("\"{rel}\"")).await
    }

    async fn cmd_cwd(&mut self, dir: String) -> io::Result<Flow> {
        let Some(view) = self.login_view() else {
            return self.fail(CommandError::AuthRequired).await;
        };

        if dir == "/" || dir == "\\" {
            let home = view.sandbox.home().to_path_buf();
            self.set_cwd(home);
            return self.ok(ReplyCode::FileActionOk, "Directory changed.").await;
        }

        // Directory changes resolve from home, not from the current
        // directory; the target is always spelled as a home-relative path.
        let home = view.sandbox.home().to_path_buf();
        let path = match view.sandbox.resolve(&home, &dir) {
            Ok(path) => path,
            Err(e) => return self.fail(dir_error(e)).await,
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return self.fail(CommandError::DirectoryNotFound).await,
        }

        self.set_cwd(path);
        self.ok(ReplyCode::FileActionOk, "Directory changed.").await
    }

    async fn cmd_list(&mut self) -> io::Result<Flow> {
        let Some(view) = self.login_view() else {
            return self.fail(CommandError::AuthRequired).await;
        };
        if !view.permissions.can_read {
            return self.fail(CommandError::PermissionDenied).await;
        }

        let entries = match list_entries(&view.cwd).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(session = %self.id, error = %e, "failed to list directory");
                return self.fail(CommandError::Io).await;
            }
        };

        self.send(Reply::new(ReplyCode::TransferStarting, "Listing directory:"))
            .await?;
        if entries.is_empty() {
            self.send_line("(empty)").await?;
        } else {
            for entry in &entries {
                let kind = if entry.is_dir { "DIR" } else { "FILE" };
                self.send_line(&format!("{} {} {}", kind, entry.size, entry.name))
                    .await?;
            }
        }
        self.ok(ReplyCode::TransferComplete, "Done.").await
    }

    async fn cmd_retr(&mut self, name: String) -> io::Result<Flow> {
        let Some(view) = self.login_view() else {
            return self.fail(CommandError::AuthRequired).await;
        };
        if !view.permissions.can_read {
            return self.fail(CommandError::PermissionDenied).await;
        }

        let path = match view.sandbox.resolve(&view.cwd, &name) {
            Ok(path) => path,
            Err(e) => return self.fail(file_error(e)).await,
        };

        let _guard = self.locks.acquire(&path).await;

        // Stat under the lock so the announced size matches the stream.
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return self.fail(CommandError::FileNotFound).await,
        };
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(session = %self.id, path = %path.display(), error = %e,
                    "failed to open file for download");
                return self.fail(CommandError::Io).await;
            }
        };

        self.send(Reply::new(ReplyCode::TransferStarting, size.to_string()))
            .await?;

        let mut remaining = size;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                // The size has been promised to the peer; there is no way
                // to recover the framing if the file ends early.
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file truncated during download",
                ));
            }
            self.writer.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        self.writer.flush().await?;

        debug!(session = %self.id, user = %view.username, path = %path.display(),
            bytes = size, "download complete");
        self.ok(ReplyCode::TransferComplete, "Transfer complete.").await
    }

    async fn cmd_stor(&mut self, name: String, size: u64) -> io::Result<Flow> {
        let Some(view) = self.login_view() else {
            return self.fail(CommandError::AuthRequired).await;
        };
        if !view.permissions.can_write {
            return self.fail(CommandError::PermissionDenied).await;
        }

        let path = match view.sandbox.resolve_for_creation(&view.cwd, &name) {
            Ok(path) => path,
            Err(e) => return self.fail(file_error(e)).await,
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(session = %self.id, path = %path.display(), error = %e,
                    "failed to create parent directories");
                return self.fail(CommandError::Io).await;
            }
        }

        let _guard = self.locks.acquire(&path).await;

        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(session = %self.id, path = %path.display(), error = %e,
                    "failed to open upload target");
                return self.fail(CommandError::Io).await;
            }
        };

        if let Err(e) = self
            .send(Reply::new(ReplyCode::TransferStarting, "Ready to receive."))
            .await
        {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        let mut remaining = size;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut file_err: Option<io::Error> = None;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = match self.reader.read(&mut buf[..want]).await {
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            remaining -= n as u64;
            // On a storage error keep draining the declared byte count so
            // the connection framing stays intact.
            if file_err.is_none() {
                if let Err(e) = file.write_all(&buf[..n]).await {
                    file_err = Some(e);
                }
            }
        }
        if file_err.is_none() {
            if let Err(e) = file.flush().await {
                file_err = Some(e);
            }
        }
        drop(file);

        if remaining > 0 {
            let _ = tokio::fs::remove_file(&path).await;
            info!(session = %self.id, path = %path.display(), missing = remaining,
                "upload ended early, partial file removed");
            return self.fail(CommandError::TransferIncomplete).await;
        }
        if let Some(e) = file_err {
            let _ = tokio::fs::remove_file(&path).await;
            warn!(session = %self.id, path = %path.display(), error = %e,
                "upload failed to persist");
            return self.fail(CommandError::Io).await;
        }

        debug!(session = %self.id, user = %view.username, path = %path.display(),
            bytes = size, "upload complete");
        self.ok(ReplyCode::TransferComplete, "Transfer complete.").await
    }

    async fn cmd_dele(&mut self, name: String) -> io::Result<Flow> {
        let Some(view) = self.login_view() else {
            return self.fail(CommandError::AuthRequired).await;
        };
        if !view.permissions.can_delete {
            return self.fail(CommandError::PermissionDenied).await;
        }

        let path = match view.sandbox.resolve(&view.cwd, &name) {
            Ok(path) => path,
            Err(e) => return self.fail(file_error(e)).await,
        };

        let _guard = self.locks.acquire(&path).await;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return self.fail(CommandError::FileNotFound).await,
        }
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(session = %self.id, path = %path.display(), error = %e, "delete failed");
            return self.fail(CommandError::Io).await;
        }

        info!(session = %self.id, user = %view.username, path = %path.display(), "file deleted");
        self.ok(ReplyCode::FileActionOk, "File deleted.").await
    }

    async fn cmd_quit(&mut self) -> io::Result<Flow> {
        self.send(Reply::new(ReplyCode::Goodbye, "Goodbye.")).await?;
        Ok(Flow::Quit)
    }

    // ======================================================
    // Helpers
    // ======================================================

    fn login_view(&self) -> Option<LoginView> {
        match &self.state {
            AuthState::Authenticated(login) => Some(LoginView {
                username: login.username.clone(),
                sandbox: login.sandbox.clone(),
                cwd: login.cwd.clone(),
                permissions: login.permissions,
            }),
            _ => None,
        }
    }

    fn set_cwd(&mut self, cwd: PathBuf) {
        if let AuthState::Authenticated(login) = &mut self.state {
            login.cwd = cwd;
        }
    }

    async fn send(&mut self, reply: Reply) -> io::Result<()> {
        self.writer.write_all(reply.to_line().as_bytes()).await?;
        self.writer.flush().await
    }

    /// A bare text line without a reply code (listing payload).
    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await
    }

    async fn ok(&mut self, code: ReplyCode, text: &str) -> io::Result<Flow> {
        self.send(Reply::new(code, text)).await?;
        Ok(Flow::Continue)
    }

    async fn fail(&mut self, err: CommandError) -> io::Result<Flow> {
        debug!(session = %self.id, error = %err, "command rejected");
        self.send(err.reply()).await?;
        Ok(Flow::Continue)
    }
}

/// The working directory as the client sees it: `/` for home itself,
/// otherwise a `/`-separated path below it.
fn display_path(home: &Path, cwd: &Path) -> String {
    match cwd.strip_prefix(home) {
        Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
        Ok(rel) => format!("/{}", rel.to_string_lossy().replace('\\', "/")),
        Err(_) => "/".to_string(),
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

struct ListEntry {
    name: String,
    size: u64,
    is_dir: bool,
}

async fn list_entries(dir: &Path) -> io::Result<Vec<ListEntry>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        // Entries that cannot be stat'd are skipped rather than aborting
        // the whole listing.
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        entries.push(ListEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: if meta.is_file() { meta.len() } else { 0 },
            is_dir: meta.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
