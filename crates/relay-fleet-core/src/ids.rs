//! Validated identifier types for relay-fleet.
//!
//! Nodes are keyed by their IP address and roles by their tag. Every type in
//! this module validates on construction so that the rest of the workspace can
//! pass them around without re-checking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Maximum length of a role tag, in characters.
pub const MAX_ROLE_TAG_LEN: usize = 100;

/// The IP address of a managed relay node. This is the node's unique key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeIp(IpAddr);

impl NodeIp {
    /// Wrap an already-parsed address.
    #[must_use]
    pub const fn new(addr: IpAddr) -> Self {
        Self(addr)
    }

    /// Parse a `NodeIp` from its textual form.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidIp` if the input is not an IPv4 or IPv6 literal.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        s.trim()
            .parse::<IpAddr>()
            .map(Self)
            .map_err(|_| IdError::InvalidIp(s.to_string()))
    }

    /// Return the underlying address.
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.0
    }
}

impl fmt::Debug for NodeIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeIp({})", self.0)
    }
}

impl fmt::Display for NodeIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeIp {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<IpAddr> for NodeIp {
    fn from(addr: IpAddr) -> Self {
        Self(addr)
    }
}

impl TryFrom<String> for NodeIp {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeIp> for String {
    fn from(ip: NodeIp) -> Self {
        ip.to_string()
    }
}

/// The name of a role profile (e.g. `"USA VLESS TCP"`).
///
/// A role tag selects both the provisioning script and the outbound routing
/// profile assigned to a node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleTag(String);

impl RoleTag {
    /// Validate and wrap a role tag.
    ///
    /// Allowed characters are alphanumerics, whitespace, `_`, `-` and `.`, and
    /// the tag must contain at least one alphanumeric character.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is empty, too long, or contains other characters.
    pub fn new(tag: impl Into<String>) -> Result<Self, IdError> {
        let tag = tag.into().trim().to_string();
        if tag.is_empty() {
            return Err(IdError::EmptyRoleTag);
        }
        let len = tag.chars().count();
        if len > MAX_ROLE_TAG_LEN {
            return Err(IdError::RoleTagTooLong {
                max: MAX_ROLE_TAG_LEN,
                got: len,
            });
        }
        let allowed = |c: char| c.is_alphanumeric() || c.is_whitespace() || "_-.".contains(c);
        if !tag.chars().all(allowed) || !tag.chars().any(char::is_alphanumeric) {
            return Err(IdError::InvalidRoleTag(tag));
        }
        Ok(Self(tag))
    }

    /// Return the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the provisioning script for this role.
    ///
    /// Punctuation is dropped, the rest is lowercased, whitespace becomes `_`,
    /// and `.sh` is appended: `"USA VLESS TCP"` becomes `usa_vless_tcp.sh`.
    #[must_use]
    pub fn script_name(&self) -> ScriptName {
        let stem: String = self
            .0
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
            .flat_map(char::to_lowercase)
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        ScriptName(format!("{stem}.sh"))
    }

    /// The tag with spaces replaced by `_`, as used for outbound routing tags.
    #[must_use]
    pub fn outbound_tag(&self) -> String {
        self.0.replace(' ', "_")
    }
}

impl fmt::Debug for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoleTag({:?})", self.0)
    }
}

impl fmt::Display for RoleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoleTag {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for RoleTag {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoleTag> for String {
    fn from(tag: RoleTag) -> Self {
        tag.0
    }
}

/// The DNS subdomain discriminator of a role: a lowercase ASCII alphanumeric token.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleLetter(String);

impl RoleLetter {
    /// Validate and wrap a role letter.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidRoleLetter` unless the input matches `^[a-z0-9]+$`.
    pub fn new(letter: impl Into<String>) -> Result<Self, IdError> {
        let letter = letter.into();
        let valid = !letter.is_empty()
            && letter
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        if valid {
            Ok(Self(letter))
        } else {
            Err(IdError::InvalidRoleLetter(letter))
        }
    }

    /// Return the letter as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RoleLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoleLetter({})", self.0)
    }
}

impl fmt::Display for RoleLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoleLetter {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoleLetter> for String {
    fn from(letter: RoleLetter) -> Self {
        letter.0
    }
}

/// The file name of a provisioning script, e.g. `reboot.sh`.
///
/// Only word characters and `-` are allowed before the `.sh` suffix, so a
/// script name can never escape the scripts directory.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScriptName(String);

impl ScriptName {
    /// Validate and wrap a script name.
    ///
    /// # Errors
    ///
    /// Returns `IdError::InvalidScriptName` unless the input matches `^[\w-]+\.sh$`.
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        let valid = name.strip_suffix(".sh").is_some_and(|stem| {
            !stem.is_empty()
                && stem
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        });
        if valid {
            Ok(Self(name))
        } else {
            Err(IdError::InvalidScriptName(name))
        }
    }

    /// The script that reboots a node.
    #[must_use]
    pub fn reboot() -> Self {
        Self("reboot.sh".to_string())
    }

    /// Return the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptName({})", self.0)
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ScriptName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ScriptName {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScriptName> for String {
    fn from(name: ScriptName) -> Self {
        name.0
    }
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not an IP address literal.
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    /// The role tag is empty.
    #[error("role tag must not be empty")]
    EmptyRoleTag,

    /// The role tag exceeds the maximum length.
    #[error("role tag too long: at most {max} characters, got {got}")]
    RoleTagTooLong {
        /// The maximum number of characters.
        max: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The role tag contains characters outside the allowed set.
    #[error("invalid role tag: {0}")]
    InvalidRoleTag(String),

    /// The role letter is not a lowercase alphanumeric token.
    #[error("invalid role letter: {0:?}")]
    InvalidRoleLetter(String),

    /// The script name is not of the form `name.sh`.
    #[error("invalid script name: {0:?}")]
    InvalidScriptName(String),
}
