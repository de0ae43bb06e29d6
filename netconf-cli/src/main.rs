use crate::commands::builtin::value_of;
use config::CliConfig;
use env_logger::{Builder, Target};
use log::LevelFilter;
use netconf_session::error::NetconfResult;

mod cli;
mod commands;
mod config;

fn init_logging(verbosity: &u8) {
    let mut builder = Builder::new();
    match verbosity {
        1 => {
            builder.filter_level(LevelFilter::Debug);
            builder.filter_module("netconf_session", LevelFilter::Off)
        }
        2 => {
            builder.filter_level(LevelFilter::Debug);
            builder.filter_module("netconf_session", LevelFilter::Debug);
            builder.filter_module("netconf_session::framer", LevelFilter::Off)
        }
        3 => {
            builder.filter_level(LevelFilter::Trace);
            builder.filter_module("netconf_session", LevelFilter::Trace)
        }
        _ => {
            builder.filter_level(LevelFilter::Info);
            builder.filter_module("netconf_session", LevelFilter::Off)
        }
    };
    builder.target(Target::Stdout);
    builder.init();
}

#[tokio::main]
async fn main() -> NetconfResult<()> {
    let mut args = cli::cli().get_matches();
    let verbosity = value_of::<u8>("verbose", &args).copied().unwrap_or(0);
    let disable_logging = value_of::<bool>("quiet", &args).copied().unwrap_or(false);
    if !disable_logging {
        init_logging(&verbosity);
    }

    match args.remove_subcommand() {
        Some((cmd, args)) => {
            let cli_config = CliConfig::new(args)?;
            cli::exec(cmd, cli_config).await?;
        }
        _ => {
            cli::cli().print_help()?;
        }
    }
    Ok(())
}
