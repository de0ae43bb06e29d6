use crate::commands::builtin::{arg, help_template, value_of};
use crate::config::Config;
use clap::{Command, ValueHint};
use log::{debug, info};
use netconf_session::error::{NetconfError, NetconfResult};
use netconf_session::session::Session;

const NOTIFICATION_URN: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

pub fn cli() -> Command {
    Command::new("notification")
        .about("Execute create-subscription rpc and print notifications")
        .help_template(help_template())
        .args([
            arg(
                "stream",
                "Stream to subscribe",
                false,
                Some('s'),
                Some("NETCONF"),
                None,
                None,
            ),
            arg(
                "filter",
                "File containing a subtree filter",
                false,
                Some('f'),
                None,
                Some(ValueHint::FilePath),
                None,
            ),
        ])
}

pub async fn exec(cfg: &Config, session: &Session) -> NetconfResult<()> {
    let stream = value_of::<String>("stream", &cfg.args)
        .map(String::as_str)
        .unwrap_or("NETCONF");
    let filter = match value_of::<String>("filter", &cfg.args) {
        Some(file) => Some(tokio::fs::read_to_string(file).await.map_err(|err| {
            NetconfError::new(format!("Could not read filter file '{}': {}", file, err))
        })?),
        None => None,
    };

    // subscribe first so nothing sent right after the reply is lost
    let mut notifications = session.subscribe_notifications()?;
    let reply = session
        .rpc(&create_subscription(stream, filter.as_deref()))
        .await?;
    if reply.contains("rpc-error>") {
        return Err(NetconfError::new(format!("Subscription refused:\n{}", reply)));
    }
    info!("Subscribed to stream '{}'", stream);

    loop {
        tokio::select! {
            notification = notifications.recv() => match notification {
                Some(notification) => info!("Notification:\n{}", notification),
                None => {
                    debug!("Notification stream ended");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                return Ok(());
            }
        }
    }
}

fn create_subscription(stream: &str, filter: Option<&str>) -> String {
    let filter = filter
        .map(|filter| format!(r#"<filter type="subtree">{}</filter>"#, filter.trim()))
        .unwrap_or_default();
    format!(
        r#"<create-subscription xmlns="{}"><stream>{}</stream>{}</create-subscription>"#,
        NOTIFICATION_URN, stream, filter
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_subscription() {
        assert_eq!(
            create_subscription("NETCONF", None),
            r#"<create-subscription xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><stream>NETCONF</stream></create-subscription>"#
        );
        assert!(create_subscription("s", Some("\n<interfaces/>\n"))
            .contains(r#"<filter type="subtree"><interfaces/></filter>"#));
    }
}
