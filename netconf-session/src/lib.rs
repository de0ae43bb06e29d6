//! # netconf-session
//!
//! NETCONF ([RFC6241]) session core: message framing ([RFC6242]), capability exchange and
//! correlation of concurrent RPCs over one transport.
//!
//! ```toml
//! netconf-session = "^0.1.0"
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use netconf_session::session::{Session, SessionConfig};
//! use netconf_session::transport::ssh::SSHTransport;
//!
//! # async fn run() -> netconf_session::error::NetconfResult<()> {
//! let transport = SSHTransport::new_with_user_auth("192.0.2.1:830", "admin", "admin").await?;
//! let session = Session::connect(transport, SessionConfig::default()).await?;
//! let reply = session.rpc("<get-config><source><running/></source></get-config>").await?;
//! println!("{}", reply);
//! session.close_session().await
//! # }
//! ```
//!
//! [RFC6241]: https://www.rfc-editor.org/rfc/rfc6241.html
//! [RFC6242]: https://www.rfc-editor.org/rfc/rfc6242.html
pub mod capability;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod framer;
pub mod message;
pub mod session;
pub mod transport;

pub const NETCONF_URN: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const NETCONF_BASE_10_CAP: &str = "urn:ietf:params:netconf:base:1.0";
pub const NETCONF_BASE_11_CAP: &str = "urn:ietf:params:netconf:base:1.1";
