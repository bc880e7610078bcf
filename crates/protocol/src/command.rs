//! Command parsing.
//!
//! One input line maps to one [`Command`] variant. The verb is
//! case-normalized before lookup, so `retr`, `Retr` and `RETR` are the
//! same command. Arguments are whitespace-separated; a wrong argument
//! count is a syntax error carrying the usage string the server echoes
//! back to the client.

use crate::error::ParseError;

/// A fully parsed client command.
///
/// Dispatch happens by matching on this enum; an unimplemented verb can
/// never reach a handler because parsing rejects it first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `USER <name>` — begin authentication.
    User { name: String },
    /// `PASS <password>` — complete authentication.
    Pass { password: String },
    /// `PWD` — report the working directory relative to home.
    Pwd,
    /// `CWD <dir>` — change the working directory.
    Cwd { dir: String },
    /// `LIST` — list the working directory.
    List,
    /// `RETR <name>` — download a file.
    Retr { name: String },
    /// `STOR <name> <size>` — upload a file of exactly `size` bytes.
    Stor { name: String, size: u64 },
    /// `DELE <name>` — delete a file.
    Dele { name: String },
    /// `QUIT` — end the session.
    Quit,
}

impl Command {
    /// Parse one command line (CRLF already stripped).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().ok_or(ParseError::Empty)?.to_uppercase();
        let args: Vec<&str> = parts.collect();

        match verb.as_str() {
            "USER" => match args.as_slice() {
                [name] => Ok(Command::User {
                    name: (*name).to_string(),
                }),
                _ => Err(syntax("USER <name>")),
            },
            "PASS" => match args.as_slice() {
                [password] => Ok(Command::Pass {
                    password: (*password).to_string(),
                }),
                _ => Err(syntax("PASS <password>")),
            },
            "PWD" => Ok(Command::Pwd),
            "CWD" => match args.as_slice() {
                [dir] => Ok(Command::Cwd {
                    dir: (*dir).to_string(),
                }),
                _ => Err(syntax("CWD <dir>")),
            },
            "LIST" => Ok(Command::List),
            "RETR" => match args.as_slice() {
                [name] => Ok(Command::Retr {
                    name: (*name).to_string(),
                }),
                _ => Err(syntax("RETR <file>")),
            },
            "STOR" => match args.as_slice() {
                [name, size] => {
                    let size: u64 = size
                        .parse()
                        .map_err(|_| ParseError::Syntax("Invalid size.".to_string()))?;
                    Ok(Command::Stor {
                        name: (*name).to_string(),
                        size,
                    })
                }
                _ => Err(syntax("STOR <filename> <size>")),
            },
            "DELE" => match args.as_slice() {
                [name] => Ok(Command::Dele {
                    name: (*name).to_string(),
                }),
                _ => Err(syntax("DELE <file>")),
            },
            "QUIT" => Ok(Command::Quit),
            _ => Err(ParseError::Unknown(verb)),
        }
    }

    /// The canonical verb for this command, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::User { .. } => "USER",
            Command::Pass { .. } => "PASS",
            Command::Pwd => "PWD",
            Command::Cwd { .. } => "CWD",
            Command::List => "LIST",
            Command::Retr { .. } => "RETR",
            Command::Stor { .. } => "STOR",
            Command::Dele { .. } => "DELE",
            Command::Quit => "QUIT",
        }
    }
}

fn syntax(usage: &str) -> ParseError {
    ParseError::Syntax(format!("Syntax: {usage}"))
}
