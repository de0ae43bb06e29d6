use crate::commands::builtin::{help_template, values_of};
use crate::config::Config;
use clap::{Arg, ArgAction, Command, ValueHint};
use futures::future::join_all;
use log::{debug, error, info};
use netconf_session::error::{NetconfError, NetconfResult};
use netconf_session::session::Session;

pub fn cli() -> Command {
    Command::new("rpc")
        .about("Send raw operations, pipelined over one session")
        .help_template(help_template())
        .arg(
            Arg::new("file")
                .help("File containing one operation element, e.g. <get/>")
                .short('f')
                .long("file")
                .required(true)
                .action(ArgAction::Append)
                .value_hint(ValueHint::FilePath),
        )
}

pub async fn exec(cfg: &Config, session: &Session) -> NetconfResult<()> {
    let mut operations = Vec::new();
    for file in values_of::<String>("file", &cfg.args) {
        let operation = tokio::fs::read_to_string(file).await.map_err(|err| {
            NetconfError::new(format!("Could not read operation file '{}': {}", file, err))
        })?;
        operations.push((file, operation));
    }

    debug!("Sending {} operations", operations.len());
    let replies = join_all(
        operations
            .iter()
            .map(|(_, operation)| session.rpc(operation.as_str())),
    )
    .await;

    let mut failed = 0;
    for ((file, _), reply) in operations.iter().zip(replies) {
        match reply {
            Ok(reply) => info!("Reply to '{}':\n{}", file, reply),
            Err(err) => {
                failed += 1;
                error!("Operation '{}' failed: {}", file, err);
            }
        }
    }
    if failed > 0 {
        return Err(NetconfError::new(format!("{} operations failed", failed)));
    }
    Ok(())
}
