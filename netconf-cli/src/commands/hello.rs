use crate::commands::builtin::help_template;
use crate::config::Config;
use clap::Command;
use log::info;
use netconf_session::error::NetconfResult;
use netconf_session::session::Session;

pub fn cli() -> Command {
    Command::new("hello")
        .about("Exchange greetings and print the peer capabilities")
        .help_template(help_template())
}

pub async fn exec(_cfg: &Config, session: &Session) -> NetconfResult<()> {
    let session_id = session
        .session_id()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut capabilities = String::new();
    for capability in session.peer_capabilities().iter() {
        capabilities.push_str("\n  ");
        capabilities.push_str(&capability.to_string());
    }
    info!(
        "Session-id: {}, base: {}, peer capabilities:{}",
        session_id,
        session.base_version(),
        capabilities
    );
    Ok(())
}
