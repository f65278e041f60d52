//! Channel identity.

use core::fmt;

/// Key identifying a point of interest in the underlying control system.
///
/// Equality is exact string match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ControlSystemName(String);

impl ControlSystemName {
    /// Wrap a raw control-system name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty name, which no operation accepts.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ControlSystemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ControlSystemName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ControlSystemName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A consumer-facing channel identifier.
///
/// Wraps the [`ControlSystemName`] that backs it plus an optional alias
/// local to one consumer. Many channel names may share one control-system
/// name; the gateway subscribes upstream once per control-system name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelName {
    name: ControlSystemName,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    alias: Option<String>,
}

impl ChannelName {
    /// A channel known to the consumer by its control-system name.
    pub fn new(name: impl Into<ControlSystemName>) -> Self {
        Self {
            name: name.into(),
            alias: None,
        }
    }

    /// A channel known to the consumer under a local alias.
    pub fn aliased(name: impl Into<ControlSystemName>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// The control-system name backing this channel.
    pub fn control_system_name(&self) -> &ControlSystemName {
        &self.name
    }

    /// The consumer-local alias, if any.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// The key consumers see this channel under: the alias when set,
    /// otherwise the control-system name.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(self.name.as_str())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} ({})", alias, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<ControlSystemName> for ChannelName {
    fn from(name: ControlSystemName) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_exact() {
        assert_eq!(ControlSystemName::new("abc"), ControlSystemName::from("abc"));
        assert_ne!(ControlSystemName::new("abc"), ControlSystemName::new("ABC"));
        assert_ne!(ControlSystemName::new("abc"), ControlSystemName::new("abc "));
    }

    #[test]
    fn blank_names_are_empty() {
        assert!(ControlSystemName::new("").is_empty());
        assert!(ControlSystemName::new("  ").is_empty());
        assert!(!ControlSystemName::new("a").is_empty());
    }

    #[test]
    fn key_prefers_alias() {
        let plain = ChannelName::new("sr:current");
        let aliased = ChannelName::aliased("sr:current", "beam");

        assert_eq!(plain.key(), "sr:current");
        assert_eq!(aliased.key(), "beam");
        assert_eq!(plain.control_system_name(), aliased.control_system_name());
        assert_ne!(plain, aliased);
    }

    #[test]
    fn display_includes_alias() {
        assert_eq!(ChannelName::aliased("x:y", "z").to_string(), "z (x:y)");
        assert_eq!(ChannelName::new("x:y").to_string(), "x:y");
    }
}
