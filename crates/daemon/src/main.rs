//! Skiff Daemon
//!
//! Multi-user file transfer service with per-user credentials,
//! permissions, and sandboxed home directories.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use daemon::auth::Permissions;
use daemon::config::Config;
use daemon::server::Server;
use daemon::session::SessionOptions;
use daemon::UserStore;

/// Skiff Daemon - multi-user file transfer service.
#[derive(Parser, Debug)]
#[command(name = "skiff")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the Skiff daemon
    Start,

    /// Create the user database and storage directories
    Init {
        /// Also provision the sample users (alice, bob, admin)
        #[arg(long)]
        sample_users: bool,
    },

    /// Manage provisioned users
    #[command(subcommand)]
    User(UserCommands),
}

/// Subcommands for user management.
#[derive(Subcommand, Debug, Clone)]
pub enum UserCommands {
    /// Create or replace a user
    Add {
        /// Login name
        username: String,

        /// Password (prompted on stdin when omitted)
        #[arg(long)]
        password: Option<String>,

        /// Home directory (defaults to <homes_root>/<username>)
        #[arg(long)]
        home: Option<PathBuf>,

        /// Revoke read access (listing and downloads)
        #[arg(long)]
        no_read: bool,

        /// Revoke write access (uploads)
        #[arg(long)]
        no_write: bool,

        /// Grant delete access
        #[arg(long)]
        delete: bool,
    },

    /// Remove a user
    Remove {
        /// Login name
        username: String,
    },

    /// List all users
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
    }

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Start => {
            tracing::info!("Skiff daemon starting...");
            run_server(config).await?;
        }
        Commands::Init { sample_users } => {
            init_storage(&config, sample_users)?;
        }
        Commands::User(cmd) => {
            let store = UserStore::open(&config.storage.db_path, config.auth.pbkdf2_iterations)?;
            handle_user_command(&config, &store, cmd)?;
        }
    }

    Ok(())
}

/// Run the server until a shutdown signal arrives.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let users = Arc::new(UserStore::open(
        &config.storage.db_path,
        config.auth.pbkdf2_iterations,
    )?);

    let options = SessionOptions {
        idle_timeout: config.idle_timeout(),
        max_login_failures: config.auth.max_login_failures,
    };

    let server = Server::bind(config.socket_addr(), users, options).await?;

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = wait_for_shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    tracing::info!("Daemon stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Create the database and storage directories, optionally with sample users.
fn init_storage(config: &Config, sample_users: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.storage.homes_root)?;
    let store = UserStore::open(&config.storage.db_path, config.auth.pbkdf2_iterations)?;
    println!("User database ready: {}", config.storage.db_path.display());
    println!("Homes root ready:    {}", config.storage.homes_root.display());

    if sample_users {
        let homes = &config.storage.homes_root;
        let read_write = Permissions {
            can_read: true,
            can_write: true,
            can_delete: false,
        };
        let read_only = Permissions {
            can_read: true,
            can_write: false,
            can_delete: false,
        };
        let full = Permissions {
            can_read: true,
            can_write: true,
            can_delete: true,
        };

        store.add_user("alice", "alicepwd", &homes.join("alice"), read_write)?;
        store.add_user("bob", "bobpwd", &homes.join("bob"), read_only)?;
        store.add_user("admin", "adminpwd", &homes.join("admin"), full)?;
        println!("Sample users created.");
    }

    Ok(())
}

/// Dispatch a `user` subcommand against the store.
fn handle_user_command(
    config: &Config,
    store: &UserStore,
    cmd: UserCommands,
) -> anyhow::Result<()> {
    match cmd {
        UserCommands::Add {
            username,
            password,
            home,
            no_read,
            no_write,
            delete,
        } => {
            let password = match password {
                Some(password) => password,
                None => read_password_from_stdin(&username)?,
            };
            let home = home.unwrap_or_else(|| config.storage.homes_root.join(&username));
            let permissions = Permissions {
                can_read: !no_read,
                can_write: !no_write,
                can_delete: delete,
            };

            store.add_user(&username, &password, &home, permissions)?;
            println!(
                "User '{}' provisioned ({}) with home {}",
                username,
                permission_string(&permissions),
                home.display()
            );
        }
        UserCommands::Remove { username } => {
            if store.remove_user(&username)? {
                println!("User '{}' removed", username);
            } else {
                eprintln!("No such user: {}", username);
                std::process::exit(1);
            }
        }
        UserCommands::List { json } => {
            let users = store.list_users()?;
            if json {
                let summaries: Vec<UserSummary> = users.into_iter().map(UserSummary::from).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else if users.is_empty() {
                println!("No users provisioned.");
            } else {
                print_users_table(&users);
            }
        }
    }
    Ok(())
}

/// Reduced view of a user record for listing; never exposes the digest.
#[derive(Debug, serde::Serialize)]
struct UserSummary {
    username: String,
    permissions: Permissions,
    home_dir: PathBuf,
}

impl From<daemon::UserRecord> for UserSummary {
    fn from(record: daemon::UserRecord) -> Self {
        Self {
            username: record.username,
            permissions: record.permissions,
            home_dir: record.home_dir,
        }
    }
}

/// Render permissions as an `rwd` triple, e.g. `rw-`.
fn permission_string(permissions: &Permissions) -> String {
    format!(
        "{}{}{}",
        if permissions.can_read { 'r' } else { '-' },
        if permissions.can_write { 'w' } else { '-' },
        if permissions.can_delete { 'd' } else { '-' },
    )
}

/// Print users in a formatted ASCII table.
fn print_users_table(users: &[daemon::UserRecord]) {
    let name_width = users
        .iter()
        .map(|u| u.username.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!("{:<name_width$}  {:<5}  HOME", "USERNAME", "PERMS");
    println!("{}", "-".repeat(name_width + 14));
    for user in users {
        println!(
            "{:<name_width$}  {:<5}  {}",
            user.username,
            permission_string(&user.permissions),
            user.home_dir.display(),
        );
    }
    println!();
    println!("Total: {} user(s)", users.len());
}

/// Read a password from stdin when `--password` was not given.
fn read_password_from_stdin(username: &str) -> anyhow::Result<String> {
    use std::io::Write;

    print!("Password for {}: ", username);
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    Ok(password)
}
