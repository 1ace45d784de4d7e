use clap::{Parser, Subcommand};

#[derive(Parser, PartialEq, Eq, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: SubCmd,
}

#[derive(Subcommand, PartialEq, Eq, Clone, Debug)]
pub enum SubCmd {
    #[command(about = "launch the relay (the configuration file is required)")]
    Start {
        #[arg(short = 'c', long = "config", help = "path to the TOML configuration file")]
        config: String,
        #[arg(short = 'l', long = "listen", help = "listen address, overrides the file")]
        listen: Option<String>,
        #[arg(short = 't', long = "target", help = "origin host:port, overrides the file")]
        target: Option<String>,
    },
    #[command(name = "check-config", about = "validate a configuration file and print it")]
    CheckConfig {
        #[arg(short = 'c', long = "config", help = "path to the TOML configuration file")]
        config: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_with_overrides() {
        let args = Args::try_parse_from([
            "relay",
            "start",
            "--config",
            "relay.toml",
            "--target",
            "127.0.0.1:9000",
        ])
        .expect("valid arguments");

        assert_eq!(
            args.cmd,
            SubCmd::Start {
                config: "relay.toml".to_owned(),
                listen: None,
                target: Some("127.0.0.1:9000".to_owned()),
            }
        );
    }

    #[test]
    fn check_config_needs_a_file() {
        assert!(Args::try_parse_from(["relay", "check-config"]).is_err());
        assert!(Args::try_parse_from(["relay", "check-config", "-c", "relay.toml"]).is_ok());
    }
}
