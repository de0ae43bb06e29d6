use crate::commands::builtin::{value_of_if_exists, values_of};
use async_ssh2_lite::{AsyncSession, SessionConfiguration};
use clap::ArgMatches;
use dirs::home_dir;
use log::{debug, error, warn};
use netconf_session::error::{NetconfError, NetconfResult};
use ssh2::MethodType;
use ssh2_config::{HostParams, ParseRule, SshConfig};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// IANA port of NETCONF over SSH, see RFC6242 3.
const NETCONF_PORT: u16 = 830;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SSH_TIMEOUT_MS: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub inner: Arc<Config>,
}

#[derive(Debug)]
pub struct Config {
    pub args: ArgMatches,
    pub ssh_config: Option<SshConfig>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub addresses: Vec<String>,
}

impl CliConfig {
    pub fn new(args: ArgMatches) -> NetconfResult<Self> {
        let ssh_config = home_dir()
            .map(|home| home.join(".ssh").join("config"))
            .and_then(|path| read_ssh_config(&path));
        let addresses = values_of::<String>("host", &args)
            .into_iter()
            .cloned()
            .collect();
        let username = value_of_if_exists::<String>("username", &args).cloned();
        let password = value_of_if_exists::<String>("password", &args).cloned();
        Ok(Self {
            inner: Arc::new(Config {
                args,
                ssh_config,
                username,
                password,
                addresses,
            }),
        })
    }
}

impl Config {
    /// Connection target for `addr`, completed from its `~/.ssh/config` entry.
    pub fn host(&self, addr: &str) -> NetconfResult<Host> {
        let params = self
            .ssh_config
            .as_ref()
            .map(|ssh_config| ssh_config.query(addr))
            .unwrap_or_default();
        Host::new(
            addr,
            self.username.as_deref(),
            self.password.as_deref(),
            params,
        )
    }
}

fn read_ssh_config(path: &Path) -> Option<SshConfig> {
    let mut reader = match File::open(path) {
        Ok(file) => BufReader::new(file),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!("No ssh configuration at '{}'", path.display());
            return None;
        }
        Err(err) => {
            warn!("Could not open '{}': {}", path.display(), err);
            return None;
        }
    };
    match SshConfig::default().parse(&mut reader, ParseRule::ALLOW_UNKNOWN_FIELDS) {
        Ok(config) => {
            debug!("Using ssh configuration '{}'", path.display());
            Some(config)
        }
        Err(err) => {
            error!("Failed to parse '{}': {}", path.display(), err);
            None
        }
    }
}

#[derive(Debug)]
enum Credentials {
    Password(String),
    /// Key files from the ssh configuration, then whatever the ssh agent offers.
    PublicKey(Vec<PathBuf>),
}

/// One device to open a NETCONF session with.
#[derive(Debug)]
pub struct Host {
    /// Name as given on the command line, also the log target.
    pub(crate) address: String,
    host_name: String,
    port: u16,
    user: String,
    credentials: Credentials,
    params: HostParams,
}

impl Host {
    pub(crate) fn new(
        addr: &str,
        username: Option<&str>,
        password: Option<&str>,
        params: HostParams,
    ) -> NetconfResult<Host> {
        let (name, port) = split_port(addr)?;
        let user = username
            .map(str::to_string)
            .or_else(|| params.user.clone())
            .ok_or_else(|| NetconfError::new(format!("No username for host '{}'", addr)))?;
        let credentials = match (password, params.identity_file.as_deref()) {
            (Some(password), _) => Credentials::Password(password.to_string()),
            (None, Some(key_files)) if !key_files.is_empty() => {
                Credentials::PublicKey(key_files.to_vec())
            }
            _ => {
                return Err(NetconfError::new(format!(
                    "No password or identity file for host '{}'",
                    addr
                )))
            }
        };

        Ok(Host {
            address: name.to_string(),
            host_name: params.host_name.clone().unwrap_or_else(|| name.to_string()),
            port: port.or(params.port).unwrap_or(NETCONF_PORT),
            user,
            credentials,
            params,
        })
    }

    /// Connects, negotiates and authenticates an SSH session ready for the netconf subsystem.
    pub(crate) async fn connect_ssh(&self) -> NetconfResult<AsyncSession<TcpStream>> {
        let stream = self.tcp_connect().await?;
        let mut session = AsyncSession::new(stream, self.session_configuration())?;
        self.prefer_methods(&session).await?;
        session.handshake().await?;
        self.authenticate(&session).await?;
        debug!(target: &self.address, "Authenticated as '{}'", self.user);
        Ok(session)
    }

    async fn tcp_connect(&self) -> NetconfResult<TcpStream> {
        let connect_timeout = self.params.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        debug!(
            target: &self.address,
            "Connecting to {}:{}", self.host_name, self.port
        );
        let connect = TcpStream::connect((self.host_name.as_str(), self.port));
        match timeout(connect_timeout, connect).await {
            Ok(stream) => Ok(stream?),
            Err(_) => Err(NetconfError::Timeout(connect_timeout)),
        }
    }

    fn session_configuration(&self) -> SessionConfiguration {
        let mut configuration = SessionConfiguration::new();
        configuration.set_timeout(SSH_TIMEOUT_MS);
        if let Some(compress) = self.params.compression {
            configuration.set_compress(compress);
        }
        if let (Some(true), Some(interval)) = (
            self.params.tcp_keep_alive,
            self.params.server_alive_interval,
        ) {
            configuration.set_keepalive(true, interval.as_secs() as u32);
        }
        configuration
    }

    async fn prefer_methods(&self, session: &AsyncSession<TcpStream>) -> NetconfResult<()> {
        let params = &self.params;
        let preferences = [
            (MethodType::Kex, &params.kex_algorithms),
            (MethodType::HostKey, &params.host_key_algorithms),
            (MethodType::CryptCs, &params.ciphers),
            (MethodType::CryptSc, &params.ciphers),
            (MethodType::MacCs, &params.mac),
            (MethodType::MacSc, &params.mac),
        ];
        for (method, algorithms) in preferences {
            if let Some(algorithms) = algorithms {
                session.method_pref(method, &algorithms.join(",")).await?;
            }
        }
        Ok(())
    }

    async fn authenticate(&self, session: &AsyncSession<TcpStream>) -> NetconfResult<()> {
        match &self.credentials {
            Credentials::Password(password) => {
                session.userauth_password(&self.user, password).await?
            }
            Credentials::PublicKey(key_files) => {
                for key_file in key_files {
                    match session
                        .userauth_pubkey_file(&self.user, None, key_file, None)
                        .await
                    {
                        Ok(()) => break,
                        Err(err) => warn!(
                            target: &self.address,
                            "Key '{}' rejected: {}",
                            key_file.display(),
                            err
                        ),
                    }
                }
                if !session.authenticated() {
                    self.authenticate_with_agent(session).await?;
                }
            }
        }
        if !session.authenticated() {
            return Err(NetconfError::new(format!(
                "Authentication failed for user '{}'",
                self.user
            )));
        }
        Ok(())
    }

    async fn authenticate_with_agent(&self, session: &AsyncSession<TcpStream>) -> NetconfResult<()> {
        let mut agent = session.agent()?;
        agent.connect().await?;
        agent.list_identities().await?;
        for identity in agent.identities()? {
            match agent.userauth(&self.user, &identity).await {
                Ok(()) => return Ok(()),
                Err(err) => warn!(
                    target: &self.address,
                    "Agent key '{}' rejected: {}",
                    identity.comment(),
                    err
                ),
            }
        }
        Ok(())
    }
}

/// Splits `host[:port]`. IPv6 literals carry a port only in brackets, `[::1]:830`.
fn split_port(addr: &str) -> NetconfResult<(&str, Option<u16>)> {
    let invalid = |reason: &str| NetconfError::new(format!("Invalid host '{}': {}", addr, reason));
    let (name, port) = match addr.strip_prefix('[') {
        Some(bracketed) => match bracketed.split_once(']') {
            Some((name, "")) => (name, None),
            Some((name, rest)) => match rest.strip_prefix(':') {
                Some(port) => (name, Some(port)),
                None => return Err(invalid("unexpected text after ']'")),
            },
            None => return Err(invalid("missing ']'")),
        },
        None if addr.matches(':').count() == 1 => match addr.split_once(':') {
            Some((name, port)) => (name, Some(port)),
            None => (addr, None),
        },
        None => (addr, None),
    };
    if name.is_empty() {
        return Err(invalid("empty host name"));
    }
    let port = port
        .map(|port| port.parse::<u16>())
        .transpose()
        .map_err(|err| invalid(&err.to_string()))?;
    Ok((name, port))
}
