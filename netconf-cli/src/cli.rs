use crate::commands::builtin::{builtin, builtin_exec};
use crate::config::CliConfig;
use clap::{
    arg, crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command,
};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, info};
use netconf_session::error::{NetconfError, NetconfResult};
use netconf_session::session::{Session, SessionConfig};
use netconf_session::transport::ssh::SSHTransport;
use std::time::Instant;
use tokio::task::JoinHandle;

pub async fn exec(cmd: String, cfg: CliConfig) -> NetconfResult<()> {
    let hosts = &cfg.inner.addresses;
    if hosts.is_empty() {
        return Err(NetconfError::new("No host provided".to_string()));
    }
    let mut futures = FuturesUnordered::new();
    for addr in hosts {
        let host = cfg.inner.host(addr)?;
        let start_time = Instant::now();
        let cmd_clone = cmd.clone();
        let cfg_clone = cfg.clone();
        let handle: JoinHandle<NetconfResult<()>> = tokio::spawn(async move {
            let ssh_session = host.connect_ssh().await?;
            let ssh_transport = SSHTransport::new_with_session(ssh_session).await?;
            let session = Session::connect(ssh_transport, SessionConfig::default()).await?;
            info!(target: &host.address, "Connected to host");
            debug!(
                target: &host.address,
                "Started Netconf session with session-id: {:?}, base {}",
                session.session_id(),
                session.base_version()
            );

            let result = match builtin_exec(&cmd_clone, &session, &cfg_clone.inner).await {
                Some(result) => result,
                None => Err(NetconfError::new(format!("Unknown command '{}'", cmd_clone))),
            };
            info!(target: &host.address, "Operation took: {:.3}s", start_time.elapsed().as_secs_f32());
            match result {
                Ok(()) => session.close_session().await,
                Err(err) => {
                    if let Err(close_err) = session.close().await {
                        debug!(target: &host.address, "Close failed: {}", close_err);
                    }
                    Err(err)
                }
            }
        });
        futures.push(handle);
    }

    while let Some(handle) = futures.next().await {
        match handle {
            Ok(result) => {
                if let Err(err) = result {
                    error!("Task failed with error: {}", err);
                } else {
                    debug!("Task completed successfully")
                }
            }
            Err(err) => error!("Task failed: {}", err),
        }
    }
    Ok(())
}

pub fn cli() -> Command {
    Command::new(crate_name!())
        .author(crate_authors!("\n"))
        .about(crate_description!())
        .version(crate_version!())
        .long_version(crate_version!())
        .arg_required_else_help(true)
        .allow_external_subcommands(false)
        .bin_name("netconf")
        .display_name("netconf")
        .help_template(color_print::cstr!(
            "\
{about-with-newline}
<green,bold>Author:</> {author}

<green,bold>Usage:</> {usage}

<green,bold>Options:</>
{options}

<green,bold>Commands:</>
    <cyan,bold>hello</>             Print the peer greeting
    <cyan,bold>rpc</>               Execute raw rpc, one per file
    <cyan,bold>notification</>      Start netconf notification listener

See '<cyan,bold>netconf help</> <cyan><<command>></>' for more information on a specific command.\n",
        ))
        .args([
            arg!(-v --verbose ... "Use verbose output (-vv to log session events, -vvv to trace every message on the wire)")
                .global(true),
            arg!(-q --quiet "Disable logging completely")
                .global(true),
            global_opt("host", "Hosts to connect, addr[:port], port defaults to 830")
                .env("NETCONF_HOST")
                .action(ArgAction::Append)
                .value_delimiter(','),
            global_opt("username", "Username for netconf connection")
                .env("NETCONF_USERNAME"),
            global_opt("password", "Password for netconf connection")
                .env("NETCONF_PASSWORD")
                .hide_env(true),
        ])
        .subcommands(builtin())
}

fn global_opt(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name).help(help).long(name).global(true)
}

#[test]
fn verify_cli() {
    cli().debug_assert();
}
