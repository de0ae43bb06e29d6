use crate::capability::Capabilities;
use crate::error::{NetconfError, NetconfResult};
use crate::NETCONF_URN;
use log::warn;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::se::Serializer;
use quick_xml::Reader;
use serde_derive::Serialize;

/// The `<hello>` greeting, see [RFC6241 8.1](https://www.rfc-editor.org/rfc/rfc6241.html#section-8.1)
#[derive(Debug, Serialize)]
#[serde(rename(serialize = "hello"))]
pub struct Hello {
    #[serde(rename = "@xmlns")]
    xmlns: String,
    capabilities: CapabilityList,
    #[serde(rename = "session-id", skip_serializing_if = "Option::is_none")]
    session_id: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CapabilityList {
    capability: Vec<String>,
}

impl Hello {
    pub fn new(capabilities: &Capabilities) -> Hello {
        Hello {
            xmlns: NETCONF_URN.to_string(),
            capabilities: CapabilityList {
                capability: capabilities.uris(),
            },
            session_id: None,
        }
    }

    /// Only a server puts a session-id into its greeting.
    pub fn with_session_id(mut self, session_id: u64) -> Hello {
        self.session_id = Some(session_id);
        self
    }

    pub fn to_xml(&self) -> NetconfResult<String> {
        use serde::Serialize;
        let mut buffer = String::with_capacity(256);
        let ser = Serializer::new(&mut buffer);
        self.serialize(ser)?;
        Ok(buffer)
    }
}

/// What the peer announced in its `<hello>`.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub session_id: Option<u64>,
    pub capabilities: Capabilities,
}

impl Greeting {
    /// Parses a peer greeting, ignoring namespace prefixes on element names.
    pub fn parse(raw: &str) -> NetconfResult<Greeting> {
        let mut reader = Reader::from_str(raw);
        reader.trim_text(true);

        let mut path: Vec<String> = Vec::new();
        let mut session_id = None;
        let mut uris = Vec::new();
        let mut has_capabilities = false;
        loop {
            let event = reader
                .read_event()
                .map_err(|err| malformed(format!("{}", err)))?;
            match event {
                Event::Start(element) => {
                    let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                    if path.is_empty() && name != "hello" {
                        return Err(malformed(format!("expected <hello>, got <{}>", name)));
                    }
                    if path.len() == 1 && name == "capabilities" {
                        has_capabilities = true;
                    }
                    path.push(name);
                }
                Event::Empty(element) => {
                    let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                    if path.is_empty() {
                        return Err(malformed(format!("expected <hello>, got empty <{}/>", name)));
                    }
                    if path.len() == 1 && name == "capabilities" {
                        has_capabilities = true;
                    }
                }
                Event::End(_) => {
                    path.pop();
                    if path.is_empty() {
                        break;
                    }
                }
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|err| malformed(format!("{}", err)))?;
                    match path_of(&path).as_slice() {
                        ["hello", "capabilities", "capability"] => uris.push(text.into_owned()),
                        ["hello", "session-id"] => {
                            let id = text.trim().parse::<u64>().map_err(|err| {
                                malformed(format!("invalid session-id {:?}: {}", text, err))
                            })?;
                            session_id = Some(id);
                        }
                        _ => {}
                    }
                }
                Event::Eof => {
                    return Err(malformed(if path.is_empty() {
                        "empty greeting".to_string()
                    } else {
                        format!("truncated greeting inside <{}>", path.join("/"))
                    }));
                }
                _ => {}
            }
        }

        if !has_capabilities {
            return Err(malformed("greeting without <capabilities>".to_string()));
        }
        let mut capabilities = Capabilities::new();
        for uri in uris {
            match uri.parse() {
                Ok(capability) => capabilities.insert(capability),
                Err(err) => warn!("Ignoring capability {:?}: {}", uri, err),
            }
        }
        Ok(Greeting {
            session_id,
            capabilities,
        })
    }
}

fn path_of(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

fn malformed(msg: String) -> NetconfError {
    NetconfError::CapabilityExchange(msg)
}

/// Wraps a single operation element into an `<rpc>` envelope.
pub fn rpc_envelope(message_id: &str, operation: &str) -> String {
    format!(
        r#"<rpc message-id="{}" xmlns="{}">{}</rpc>"#,
        escape(message_id),
        NETCONF_URN,
        operation.trim()
    )
}
