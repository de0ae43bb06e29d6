use crate::commands::*;
use crate::config::Config;
use clap::builder::{IntoResettable, ValueParser};
use clap::{Arg, ArgMatches, Command, ValueHint};
use netconf_session::error::NetconfResult;
use netconf_session::session::Session;

pub fn builtin() -> Vec<Command> {
    vec![hello::cli(), rpc::cli(), notification::cli()]
}

/// Runs `cmd` on an open session, `None` for unknown commands.
pub async fn builtin_exec(
    cmd: &str,
    session: &Session,
    args: &Config,
) -> Option<NetconfResult<()>> {
    let f = match cmd {
        "hello" => hello::exec(args, session).await,
        "rpc" => rpc::exec(args, session).await,
        "notification" => notification::exec(args, session).await,
        _ => return None,
    };
    Some(f)
}

pub(crate) fn value_of<'a, T: Clone + Send + Sync + 'static>(
    name: &str,
    args: &'a ArgMatches,
) -> Option<&'a T> {
    args.get_one::<T>(name)
}

pub(crate) fn value_of_if_exists<'a, T: Clone + Send + Sync + 'static>(
    name: &str,
    args: &'a ArgMatches,
) -> Option<&'a T> {
    if args.contains_id(name) {
        args.get_one::<T>(name)
    } else {
        None
    }
}

pub(crate) fn values_of<'a, T: Clone + Send + Sync + 'static>(
    name: &str,
    args: &'a ArgMatches,
) -> Vec<&'a T> {
    args.get_many::<T>(name).unwrap_or_default().collect()
}

pub(super) fn arg(
    name: &'static str,
    help: &'static str,
    required: bool,
    short: Option<char>,
    default: Option<&'static str>,
    hint: Option<ValueHint>,
    parser: impl IntoResettable<ValueParser>,
) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .help(help)
        .required(required)
        .default_value(default)
        .value_hint(hint)
        .value_parser(parser)
}

pub(super) fn help_template() -> &'static str {
    color_print::cstr!(
        "\
{about-with-newline}
<green,bold>Usage:</> {usage}

<green,bold>Options:</>
{options}\n",
    )
}
