//! Terminal UI: confirmation prompts on stdout, commands on stdin.

use std::process::{Command as Process, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use pigeon_core::{ConfirmationPrompt, ConfirmationRequest};
use tracing::{info, warn};

/// Prints pairing requests; the answer comes back as an `approve` / `deny` command.
pub struct TerminalPrompt;

impl ConfirmationPrompt for TerminalPrompt {
    fn request_confirmation(&mut self, request: ConfirmationRequest) {
        let service = &request.service;
        println!("Pairing request from {}", request.remote_id);
        if service.url.is_empty() {
            println!("  service: {}", service.name);
        } else {
            println!("  service: {} ({})", service.name, service.url);
        }
        if !service.capabilities.is_empty() {
            println!("  wants: {}", service.capabilities.join(", "));
        }
        println!("Type 'approve' or 'deny'.");
    }

    fn open_url(&mut self, url: &str) {
        match spawn_reaped(Process::new("xdg-open").arg(url)) {
            Ok(_) => info!(%url, "opened return url"),
            Err(e) => warn!(%url, error = %e, "xdg-open failed"),
        }
    }
}

/// Spawn `cmd` detached and wait for it on its own thread, so the child is reaped.
fn spawn_reaped(cmd: &mut Process) -> std::io::Result<JoinHandle<Option<ExitStatus>>> {
    let mut child = cmd.stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;
    thread::Builder::new()
        .name("url-opener".into())
        .spawn(move || match child.wait() {
            Ok(status) => {
                if !status.success() {
                    warn!(%status, "url opener exited with failure");
                }
                Some(status)
            }
            Err(e) => {
                warn!(error = %e, "waiting for url opener");
                None
            }
        })
}

/// One line typed on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Pair(String),
    Approve,
    Deny,
    Poll,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Command, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };
        match (word, rest) {
            ("pair", "") => Err("usage: pair <link>".into()),
            ("pair", link) => Ok(Command::Pair(link.to_string())),
            ("approve", "") => Ok(Command::Approve),
            ("deny", "") => Ok(Command::Deny),
            ("poll", "") => Ok(Command::Poll),
            ("quit", "") | ("exit", "") => Ok(Command::Quit),
            _ => Err(format!("unknown command: {line}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn opener_is_waited_on() {
        let ok = spawn_reaped(&mut Process::new("true")).unwrap();
        assert!(ok.join().unwrap().unwrap().success());
        let failed = spawn_reaped(&mut Process::new("false")).unwrap();
        assert!(!failed.join().unwrap().unwrap().success());
        assert!(spawn_reaped(&mut Process::new("/nonexistent/opener")).is_err());
    }

    #[test]
    fn parse_commands() {
        assert_eq!(
            Command::parse("pair  bread://platform/pair?id=x&publicKey=02\n"),
            Ok(Command::Pair("bread://platform/pair?id=x&publicKey=02".into()))
        );
        assert_eq!(Command::parse(" approve "), Ok(Command::Approve));
        assert_eq!(Command::parse("deny"), Ok(Command::Deny));
        assert_eq!(Command::parse("poll"), Ok(Command::Poll));
        assert_eq!(Command::parse("exit"), Ok(Command::Quit));
        assert!(Command::parse("pair").is_err());
        assert!(Command::parse("approve now").is_err());
        assert!(Command::parse("").is_err());
    }
}
