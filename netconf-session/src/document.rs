use crate::error::{NetconfError, NetconfResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

/// Outermost element of a message, without any of its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootElement {
    /// Local name, namespace prefix stripped.
    pub name: String,
    /// Attributes by local name. Namespace declarations are left out.
    pub attributes: HashMap<String, String>,
}

impl RootElement {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Reads only as far as the first start tag of `raw`.
///
/// The rest of the document is neither parsed nor validated.
pub fn parse_root_tag_and_attributes(raw: &str) -> NetconfResult<RootElement> {
    let mut reader = Reader::from_str(raw);
    loop {
        match reader.read_event()? {
            Event::Start(element) | Event::Empty(element) => return root_element(&element),
            Event::Text(text) if !text.iter().all(u8::is_ascii_whitespace) => {
                return Err(NetconfError::MalformedMessage(
                    "text before root element".to_string(),
                ))
            }
            Event::Eof => {
                return Err(NetconfError::MalformedMessage(
                    "no root element".to_string(),
                ))
            }
            _ => {}
        }
    }
}

fn root_element(element: &BytesStart) -> NetconfResult<RootElement> {
    let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
    let mut attributes = HashMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        attributes.insert(key, value);
    }
    Ok(RootElement { name, attributes })
}
