//! End-to-end integration tests for Skiff.
//!
//! These tests drive a real server over TCP and verify complete flows:
//! - Authentication and reply semantics
//! - Navigation, listing, and transfers
//! - Permission gating and sandbox enforcement
//! - Concurrent and interrupted transfers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use daemon::auth::{Permissions, UserStore};
use daemon::server::Server;
use daemon::session::SessionOptions;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Low work factor so tests spend their time on I/O, not key derivation.
const TEST_ITERATIONS: u32 = 1_000;

struct TestServer {
    addr: SocketAddr,
    root: TempDir,
}

impl TestServer {
    /// Start a server with the given users provisioned. Each user's home
    /// is `<root>/homes/<name>`.
    async fn start(users: &[(&str, &str, Permissions)]) -> Self {
        let root = TempDir::new().unwrap();
        let store = UserStore::open(root.path().join("users.db"), TEST_ITERATIONS).unwrap();
        for (name, password, permissions) in users {
            let home = root.path().join("homes").join(name);
            std::fs::create_dir_all(&home).unwrap();
            store.add_user(name, password, &home, *permissions).unwrap();
        }

        let server = Server::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(store),
            SessionOptions::default(),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        Self { addr, root }
    }

    fn home(&self, user: &str) -> std::path::PathBuf {
        self.root.path().join("homes").join(user)
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connect and consume the greeting banner.
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        let banner = client.line().await;
        assert!(banner.starts_with("220"), "banner: {banner}");
        client
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    async fn cmd(&mut self, line: &str) -> String {
        self.send(line).await;
        self.line().await
    }

    async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.reader.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn login(&mut self, user: &str, password: &str) {
        let reply = self.cmd(&format!("USER {user}")).await;
        assert!(reply.starts_with("331"), "USER reply: {reply}");
        let reply = self.cmd(&format!("PASS {password}")).await;
        assert!(reply.starts_with("230"), "PASS reply: {reply}");
    }

    /// Upload a file and return the final reply.
    async fn store(&mut self, name: &str, body: &[u8]) -> String {
        let reply = self.cmd(&format!("STOR {name} {}", body.len())).await;
        assert!(reply.starts_with("150"), "STOR reply: {reply}");
        self.send_bytes(body).await;
        self.line().await
    }

    /// Download a file, asserting the announced size, and return its bytes.
    async fn retrieve(&mut self, name: &str) -> Vec<u8> {
        let reply = self.cmd(&format!("RETR {name}")).await;
        assert!(reply.starts_with("150"), "RETR reply: {reply}");
        let size: usize = reply[4..].trim().parse().unwrap();
        let body = self.read_exact(size).await;
        let done = self.line().await;
        assert!(done.starts_with("226"), "RETR completion: {done}");
        body
    }
}

fn full_access() -> Permissions {
    Permissions {
        can_read: true,
        can_write: true,
        can_delete: true,
    }
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_login_and_quit() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;

    client.login("alice", "alicepwd").await;
    assert_eq!(client.cmd("QUIT").await, "221 Goodbye.");
}

#[tokio::test]
async fn test_bad_credentials_are_indistinguishable() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;

    client.cmd("USER alice").await;
    let wrong_password = client.cmd("PASS wrong").await;

    client.cmd("USER nobody").await;
    let unknown_user = client.cmd("PASS whatever").await;

    assert_eq!(wrong_password, "530 Invalid user/pass.");
    assert_eq!(wrong_password, unknown_user);
}

#[tokio::test]
async fn test_commands_rejected_before_login() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;

    for command in ["PWD", "CWD x", "LIST", "RETR f", "STOR f 1", "DELE f"] {
        assert_eq!(
            client.cmd(command).await,
            "530 Not logged in.",
            "command: {command}"
        );
    }
}

#[tokio::test]
async fn test_pass_before_user_is_out_of_sequence() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.cmd("PASS alicepwd").await, "503 Send USER first.");
}

// =============================================================================
// Navigation and listing
// =============================================================================

#[tokio::test]
async fn test_pwd_cwd_navigation() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    std::fs::create_dir_all(server.home("alice").join("projects/skiff")).unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    assert_eq!(client.cmd("PWD").await, "257 \"/\"");
    assert_eq!(client.cmd("CWD projects").await, "250 Directory changed.");
    assert_eq!(client.cmd("PWD").await, "257 \"/projects\"");
    assert_eq!(
        client.cmd("CWD projects/skiff").await,
        "250 Directory changed."
    );
    assert_eq!(client.cmd("PWD").await, "257 \"/projects/skiff\"");
    assert_eq!(client.cmd("CWD /").await, "250 Directory changed.");
    assert_eq!(client.cmd("PWD").await, "257 \"/\"");
}

#[tokio::test]
async fn test_list_entries_and_placeholder() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let home = server.home("alice");
    std::fs::create_dir_all(home.join("inbox")).unwrap();
    std::fs::write(home.join("a.txt"), "aaa").unwrap();
    std::fs::write(home.join("z.txt"), "zz").unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    assert_eq!(client.cmd("LIST").await, "150 Listing directory:");
    assert_eq!(client.line().await, "FILE 3 a.txt");
    assert_eq!(client.line().await, "DIR 0 inbox");
    assert_eq!(client.line().await, "FILE 2 z.txt");
    assert_eq!(client.line().await, "226 Done.");

    assert_eq!(client.cmd("CWD inbox").await, "250 Directory changed.");
    assert_eq!(client.cmd("LIST").await, "150 Listing directory:");
    assert_eq!(client.line().await, "(empty)");
    assert_eq!(client.line().await, "226 Done.");
}

// =============================================================================
// Transfers
// =============================================================================

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    let body: Vec<u8> = (0..50_000u32).flat_map(|i| i.to_le_bytes()).collect();
    assert_eq!(
        client.store("blob.bin", &body).await,
        "226 Transfer complete."
    );

    let downloaded = client.retrieve("blob.bin").await;
    assert_eq!(downloaded, body);
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(
        client.cmd("USER alice").await,
        "331 Username OK, need password."
    );
    assert_eq!(client.cmd("PASS alicepwd").await, "230 Logged in.");

    assert_eq!(
        client.cmd("STOR report.txt 11").await,
        "150 Ready to receive."
    );
    client.send_bytes(b"hello world").await;
    assert_eq!(client.line().await, "226 Transfer complete.");

    assert_eq!(client.cmd("RETR report.txt").await, "150 11");
    assert_eq!(client.read_exact(11).await, b"hello world");
    assert_eq!(client.line().await, "226 Transfer complete.");
}

#[tokio::test]
async fn test_delete_file() {
    let server = TestServer::start(&[("admin", "adminpwd", full_access())]).await;
    std::fs::write(server.home("admin").join("old.log"), "stale").unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("admin", "adminpwd").await;

    assert_eq!(client.cmd("DELE old.log").await, "250 File deleted.");
    assert!(!server.home("admin").join("old.log").exists());
}

#[tokio::test]
async fn test_partial_upload_leaves_no_file() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;

    {
        let mut client = Client::connect(server.addr).await;
        client.login("alice", "alicepwd").await;

        let reply = client.cmd("STOR foo.txt 1000").await;
        assert!(reply.starts_with("150"));
        client.send_bytes(&[7u8; 400]).await;
        // Drop the connection mid-upload.
    }

    // Give the server a moment to observe the disconnect and clean up.
    let path = server.home("alice").join("foo.txt");
    for _ in 0..50 {
        if !path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!path.exists());
}

#[tokio::test]
async fn test_concurrent_uploads_to_same_file_do_not_interleave() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;

    let body_a = vec![b'A'; 200_000];
    let body_b = vec![b'B'; 200_000];

    let addr = server.addr;
    let upload_a = {
        let body = body_a.clone();
        tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client.login("alice", "alicepwd").await;
            client.store("contended.bin", &body).await
        })
    };
    let upload_b = {
        let body = body_b.clone();
        tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client.login("alice", "alicepwd").await;
            client.store("contended.bin", &body).await
        })
    };

    assert_eq!(upload_a.await.unwrap(), "226 Transfer complete.");
    assert_eq!(upload_b.await.unwrap(), "226 Transfer complete.");

    // Whichever writer won, the file is one upload in full, never a mix.
    let result = std::fs::read(server.home("alice").join("contended.bin")).unwrap();
    assert!(result == body_a || result == body_b);
}

// =============================================================================
// Permissions and sandboxing
// =============================================================================

#[tokio::test]
async fn test_read_only_user_cannot_write_or_delete() {
    let read_only = Permissions {
        can_read: true,
        can_write: false,
        can_delete: false,
    };
    let server = TestServer::start(&[("bob", "bobpwd", read_only)]).await;
    std::fs::write(server.home("bob").join("shared.txt"), "data").unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("bob", "bobpwd").await;

    assert_eq!(client.cmd("STOR new.txt 4").await, "550 Permission denied.");
    assert!(!server.home("bob").join("new.txt").exists());

    assert_eq!(
        client.cmd("DELE shared.txt").await,
        "550 Permission denied."
    );
    assert!(server.home("bob").join("shared.txt").exists());

    // Reads still work.
    assert_eq!(client.retrieve("shared.txt").await, b"data");
}

#[tokio::test]
async fn test_write_only_user_cannot_read() {
    let write_only = Permissions {
        can_read: false,
        can_write: true,
        can_delete: false,
    };
    let server = TestServer::start(&[("drop", "droppwd", write_only)]).await;
    std::fs::write(server.home("drop").join("secret.txt"), "hidden").unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("drop", "droppwd").await;

    assert_eq!(client.cmd("LIST").await, "550 Permission denied.");
    assert_eq!(
        client.cmd("RETR secret.txt").await,
        "550 Permission denied."
    );
    assert_eq!(
        client.store("upload.txt", b"ok").await,
        "226 Transfer complete."
    );
}

#[tokio::test]
async fn test_traversal_rejected_for_every_command() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    // A file just outside the home that must stay unreachable.
    std::fs::write(server.root.path().join("homes/outside.txt"), "no").unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    for command in [
        "CWD ../",
        "RETR ../outside.txt",
        "STOR ../escape.txt 2",
        "DELE ../outside.txt",
    ] {
        let reply = client.cmd(command).await;
        assert!(
            reply.starts_with("550"),
            "command {command} got: {reply}"
        );
    }

    assert!(!server.root.path().join("homes/escape.txt").exists());
    assert!(server.root.path().join("homes/outside.txt").exists());
}

#[tokio::test]
async fn test_sessions_are_confined_to_their_own_home() {
    let server = TestServer::start(&[
        ("alice", "alicepwd", full_access()),
        ("bob", "bobpwd", full_access()),
    ])
    .await;
    std::fs::write(server.home("bob").join("private.txt"), "bob only").unwrap();

    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    let reply = client.cmd("RETR ../bob/private.txt").await;
    assert!(reply.starts_with("550"), "got: {reply}");
}

// =============================================================================
// Protocol edges
// =============================================================================

#[tokio::test]
async fn test_unknown_and_malformed_commands_keep_session_alive() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;

    assert_eq!(client.cmd("NOOP").await, "502 Command not implemented.");
    assert_eq!(client.cmd("USER").await, "501 Syntax: USER <name>");
    assert_eq!(client.cmd("STOR x notanumber").await, "501 Invalid size.");

    // The session is still usable afterwards.
    client.login("alice", "alicepwd").await;
    assert_eq!(client.cmd("PWD").await, "257 \"/\"");
}

#[tokio::test]
async fn test_user_restarts_authentication() {
    let server = TestServer::start(&[
        ("alice", "alicepwd", full_access()),
        ("bob", "bobpwd", full_access()),
    ])
    .await;

    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    // Switching users mid-session drops the previous login.
    client.cmd("USER bob").await;
    assert_eq!(client.cmd("PWD").await, "530 Not logged in.");
    assert_eq!(client.cmd("PASS bobpwd").await, "230 Logged in.");
    assert_eq!(client.cmd("PWD").await, "257 \"/\"");
}

#[tokio::test]
async fn test_stor_declared_size_bounds_the_read() {
    let server = TestServer::start(&[("alice", "alicepwd", full_access())]).await;
    let mut client = Client::connect(server.addr).await;
    client.login("alice", "alicepwd").await;

    // Send the upload body and the next command in one write; the server
    // must stop reading the body at the declared size.
    let reply = client.cmd("STOR exact.bin 5").await;
    assert!(reply.starts_with("150"));
    client.send_bytes(b"12345PWD\r\n").await;
    assert_eq!(client.line().await, "226 Transfer complete.");
    assert_eq!(client.line().await, "257 \"/\"");

    assert_eq!(
        std::fs::read(server.home("alice").join("exact.bin")).unwrap(),
        b"12345"
    );
}
