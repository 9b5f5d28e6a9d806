use clap::{Parser, Subcommand};
use proxyup::CheckKind;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "proxyup",
    about = "Proxy pool health checker",
    version = env!("CARGO_PKG_VERSION"),
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(
        short,
        long,
        global = true,
        help = "Config file (defaults to $XDG_CONFIG_HOME/proxyup/config.toml)"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the check schedulers until interrupted (default if no command specified)")]
    Run,

    #[command(about = "Run one batch of checks over every proxy and exit")]
    Check {
        #[arg(short, long, default_value = "liveness", help = "liveness or throughput")]
        kind: CheckKind,
    },

    #[command(about = "Check a single proxy right away (liveness, then throughput)")]
    Verify {
        #[arg(help = "Proxy ID")]
        id: Uuid,
    },

    #[command(about = "Register a proxy")]
    Add {
        #[arg(help = "Proxy host or IP")]
        host: String,

        #[arg(help = "Proxy port")]
        port: u16,

        #[arg(short, long, requires = "password")]
        username: Option<String>,

        #[arg(short, long, requires = "username")]
        password: Option<String>,

        #[arg(long, default_value = "")]
        name: String,

        #[arg(long, default_value = "", help = "Who to ask when this proxy misbehaves")]
        contact: String,

        #[arg(long, default_value = "")]
        tag: String,
    },

    #[command(about = "Remove a proxy (its history is kept)")]
    Remove {
        #[arg(help = "Proxy ID")]
        id: Uuid,
    },

    #[command(about = "List proxies with their last known health")]
    List,

    #[command(about = "Failure statistics, IP history and speed history for one proxy")]
    Stats {
        #[arg(help = "Proxy ID")]
        id: Uuid,

        #[arg(short, long, default_value_t = 7, help = "Window in days")]
        days: u32,

        #[arg(long, help = "Output as JSON")]
        json: bool,
    },

    #[command(about = "Send the status summary now")]
    Summary,

    #[command(about = "Send a test notification")]
    NotifyTest,

    #[command(about = "Show current configuration")]
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["proxyup"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn check_kind_is_parsed() {
        let cli = Cli::try_parse_from(["proxyup", "check", "--kind", "throughput"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check { kind: CheckKind::Throughput })));

        assert!(Cli::try_parse_from(["proxyup", "check", "--kind", "bandwidth"]).is_err());
    }

    #[test]
    fn credentials_come_in_pairs() {
        assert!(Cli::try_parse_from(["proxyup", "add", "10.0.0.1", "3128", "-u", "alice"]).is_err());

        let cli = Cli::try_parse_from([
            "proxyup", "add", "10.0.0.1", "3128", "-u", "alice", "-p", "pw", "--name", "Berlin",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Add { host, port, username, name, .. }) => {
                assert_eq!(host, "10.0.0.1");
                assert_eq!(port, 3128);
                assert_eq!(username.as_deref(), Some("alice"));
                assert_eq!(name, "Berlin");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["proxyup", "list", "--config", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/p.toml")));
    }
}
