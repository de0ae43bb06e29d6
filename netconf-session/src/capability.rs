use crate::error::{NetconfError, NetconfResult};
use crate::framer::Framing;
use crate::{NETCONF_BASE_10_CAP, NETCONF_BASE_11_CAP};
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use std::collections::BTreeMap;

pub const CAPABILITY_URN_PREFIX: &str = "urn:ietf:params:netconf:capability:";
pub const BASE_URN_PREFIX: &str = "urn:ietf:params:netconf:base:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BaseVersion {
    V1_0,
    V1_1,
}

impl BaseVersion {
    pub fn capability(self) -> &'static str {
        match self {
            BaseVersion::V1_0 => NETCONF_BASE_10_CAP,
            BaseVersion::V1_1 => NETCONF_BASE_11_CAP,
        }
    }

    pub fn framing(self) -> Framing {
        match self {
            BaseVersion::V1_0 => Framing::EndOfMessage,
            BaseVersion::V1_1 => Framing::Chunked,
        }
    }
}

impl Display for BaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseVersion::V1_0 => write!(f, "1.0"),
            BaseVersion::V1_1 => write!(f, "1.1"),
        }
    }
}

/// A single advertised capability, e.g.
/// `urn:ietf:params:netconf:capability:with-defaults:1.0?basic-mode=explicit`.
///
/// Two capabilities are equal when both the URI and the query parameters match;
/// parameter order is irrelevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    uri: String,
    params: BTreeMap<String, String>,
}

impl Capability {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Short forms this capability answers to: `:candidate` and `:candidate:1.0` for
    /// `urn:ietf:params:netconf:capability:candidate:1.0`, `:base` and `:base:1.1` for
    /// the base protocol URIs.
    pub fn abbreviations(&self) -> Vec<String> {
        if let Some(rest) = self.uri.strip_prefix(CAPABILITY_URN_PREFIX) {
            let name = rest.split(':').next().unwrap_or(rest);
            let mut abbreviations = vec![format!(":{}", name)];
            if name != rest {
                abbreviations.push(format!(":{}", rest));
            }
            abbreviations
        } else if let Some(version) = self.uri.strip_prefix(BASE_URN_PREFIX) {
            vec![":base".to_string(), format!(":base:{}", version)]
        } else {
            Vec::new()
        }
    }

    fn matches(&self, key: &str) -> bool {
        self.uri == key || self.abbreviations().iter().any(|abbr| abbr == key)
    }
}

fn expand(abbreviation: &str) -> String {
    let short = abbreviation.trim_start_matches(':');
    match short.split_once(':') {
        Some(("base", version)) => format!("{}{}", BASE_URN_PREFIX, version),
        None if short == "base" => NETCONF_BASE_10_CAP.to_string(),
        Some(_) => format!("{}{}", CAPABILITY_URN_PREFIX, short),
        None => format!("{}{}:1.0", CAPABILITY_URN_PREFIX, short),
    }
}

impl FromStr for Capability {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == ":" {
            return Err(NetconfError::CapabilityExchange(
                "empty capability".to_string(),
            ));
        }
        let (uri, query) = match s.split_once('?') {
            Some((uri, query)) => (uri, Some(query)),
            None => (s, None),
        };
        let uri = if uri.starts_with(':') {
            expand(uri)
        } else {
            uri.to_string()
        };
        let params = query
            .into_iter()
            .flat_map(|query| query.split('&'))
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();
        Ok(Capability { uri, params })
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        for (idx, (key, value)) in self.params.iter().enumerate() {
            let separator = if idx == 0 { '?' } else { '&' };
            if value.is_empty() {
                write!(f, "{}{}", separator, key)?;
            } else {
                write!(f, "{}{}={}", separator, key, value)?;
            }
        }
        Ok(())
    }
}

/// Ordered set of capabilities keyed by URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    capabilities: Vec<Capability>,
}

impl Capabilities {
    pub fn new() -> Capabilities {
        Capabilities::default()
    }

    pub fn parse<I, S>(uris: I) -> NetconfResult<Capabilities>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut capabilities = Capabilities::new();
        for uri in uris {
            capabilities.insert(uri.as_ref().parse()?);
        }
        Ok(capabilities)
    }

    /// Adds `capability`, replacing an existing one with the same URI in place.
    pub fn insert(&mut self, capability: Capability) {
        match self
            .capabilities
            .iter_mut()
            .find(|existing| existing.uri == capability.uri)
        {
            Some(existing) => *existing = capability,
            None => self.capabilities.push(capability),
        }
    }

    /// Looks up a capability by full URI (query part ignored) or by abbreviation.
    pub fn get(&self, key: &str) -> Option<&Capability> {
        let key = key.split('?').next().unwrap_or(key);
        self.capabilities
            .iter()
            .find(|capability| capability.uri == key)
            .or_else(|| {
                self.capabilities
                    .iter()
                    .find(|capability| capability.matches(key))
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.iter()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn uris(&self) -> Vec<String> {
        self.capabilities.iter().map(ToString::to_string).collect()
    }
}

/// Picks the framing base shared by both peers, preferring base:1.1.
pub fn negotiate(local: &Capabilities, peer: &Capabilities) -> NetconfResult<BaseVersion> {
    [BaseVersion::V1_1, BaseVersion::V1_0]
        .into_iter()
        .find(|base| local.contains(base.capability()) && peer.contains(base.capability()))
        .ok_or_else(|| {
            NetconfError::CapabilityExchange(format!(
                "no common base protocol version (local: {:?}, peer: {:?})",
                base_versions(local),
                base_versions(peer)
            ))
        })
}

fn base_versions(capabilities: &Capabilities) -> Vec<&str> {
    capabilities
        .iter()
        .filter(|capability| capability.uri.starts_with(BASE_URN_PREFIX))
        .map(Capability::uri)
        .collect()
}
