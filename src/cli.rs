//! Command-line surface: server mode, or client mode with one command

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use crate::config::Config;
use crate::protocol::Command;

#[derive(Clone, Debug, Parser)]
#[command(
    author,
    version,
    about = "Pull, push or list files matching a pattern on another host"
)]
#[command(group(ArgGroup::new("mode").required(true).args(["server", "client"])))]
#[command(group(ArgGroup::new("command").args(["pull", "push", "list"])))]
pub struct Args {
    /// Run server mode
    #[arg(short, long)]
    pub server: bool,

    /// Run client mode
    #[arg(short, long, requires = "ip", requires = "command")]
    pub client: bool,

    /// Address of the server
    #[arg(short, long)]
    pub ip: Option<String>,

    /// File pattern to pull
    #[arg(short, long, value_name = "PATTERN")]
    pub pull: Option<String>,

    /// File pattern to push
    #[arg(short = 'u', long, value_name = "PATTERN")]
    pub push: Option<String>,

    /// File pattern to list
    #[arg(short, long, value_name = "PATTERN")]
    pub list: Option<String>,

    /// Port to connect to, or to listen on when --bind is not given
    #[arg(long)]
    pub port: Option<u16>,

    /// Bind address (host:port) for server mode
    #[arg(long)]
    pub bind: Option<String>,

    /// Directory receiving pushed files (server)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory receiving pulled files (client)
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Default root for patterns without a directory (server)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append per-file transfer records to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// The client command and its pattern, if one was given.
    pub fn command(&self) -> Option<(Command, &str)> {
        if let Some(p) = &self.pull {
            Some((Command::Pull, p))
        } else if let Some(p) = &self.push {
            Some((Command::Push, p))
        } else {
            self.list.as_deref().map(|p| (Command::List, p))
        }
    }

    /// Overlay flags onto values loaded from the config file.
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(port) = self.port {
            cfg.client.port = port;
            if self.bind.is_none() {
                cfg.server.bind = format!("0.0.0.0:{}", port);
            }
        }
        if let Some(bind) = &self.bind {
            cfg.server.bind = bind.clone();
        }
        if let Some(dir) = &self.upload_dir {
            cfg.server.upload_dir = dir.clone();
        }
        if let Some(dir) = &self.download_dir {
            cfg.client.download_dir = dir.clone();
        }
        if let Some(root) = &self.root {
            cfg.server.default_root = Some(root.clone());
        }
        if let Some(path) = &self.log_file {
            cfg.log_file = Some(path.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_pull() {
        let args = Args::try_parse_from(["dexft", "-c", "-i", "192.168.1.5", "-p", "*.jpg"]).unwrap();
        assert!(args.client);
        assert_eq!(args.ip.as_deref(), Some("192.168.1.5"));
        assert_eq!(args.command(), Some((Command::Pull, "*.jpg")));
    }

    #[test]
    fn test_client_push_and_list() {
        let args = Args::try_parse_from(["dexft", "--client", "--ip", "h", "--push", "a/*"]).unwrap();
        assert_eq!(args.command(), Some((Command::Push, "a/*")));
        let args = Args::try_parse_from(["dexft", "-c", "-i", "h", "-l", "*"]).unwrap();
        assert_eq!(args.command(), Some((Command::List, "*")));
    }

    #[test]
    fn test_invalid_combinations() {
        // mode required
        assert!(Args::try_parse_from(["dexft", "-p", "x"]).is_err());
        // client needs an address and a command
        assert!(Args::try_parse_from(["dexft", "-c", "-p", "x"]).is_err());
        assert!(Args::try_parse_from(["dexft", "-c", "-i", "h"]).is_err());
        // only one command
        assert!(Args::try_parse_from(["dexft", "-c", "-i", "h", "-p", "x", "-l", "y"]).is_err());
        // not both modes
        assert!(Args::try_parse_from(["dexft", "-s", "-c", "-i", "h", "-p", "x"]).is_err());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "dexft", "-s", "--port", "9500", "--upload-dir", "/in", "--root", "/out",
        ])
        .unwrap();
        let mut cfg = Config::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.server.bind, "0.0.0.0:9500");
        assert_eq!(cfg.client.port, 9500);
        assert_eq!(cfg.server.upload_dir, PathBuf::from("/in"));
        assert_eq!(cfg.server.default_root, Some(PathBuf::from("/out")));

        let args = Args::try_parse_from(["dexft", "-s", "--port", "1", "--bind", "127.0.0.1:2"]).unwrap();
        let mut cfg = Config::default();
        args.apply(&mut cfg);
        assert_eq!(cfg.server.bind, "127.0.0.1:2");
    }
}
