//! Outbound routing descriptors.
//!
//! A role's routing key is a `vless://` share link. The descriptor pushed for
//! a node points that role's credentials at the node's own address.

use relay_fleet_core::{NodeIp, RoleTag};
use relay_fleet_store::RoleProfile;
use reqwest::Url;
use serde_json::{json, Value};

use crate::error::{ControlError, Result};

/// Port the relay listens on.
pub const RELAY_PORT: u16 = 443;

/// Credentials extracted from a routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlessKey {
    /// User id.
    pub id: String,
    /// TLS server name (`sni`, falling back to the link host).
    pub server_name: String,
    /// Reality public key (`pbk`).
    pub public_key: String,
    /// Reality short id (`sid`).
    pub short_id: String,
}

impl VlessKey {
    /// Parse a `vless://<id>@<host>:<port>?sni=..&pbk=..&sid=..#label` link.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the link is not a vless URL or
    /// lacks the id, public key or short id.
    pub fn parse(link: &str) -> std::result::Result<Self, String> {
        let url = Url::parse(link.trim()).map_err(|e| format!("not a URL: {e}"))?;
        if url.scheme() != "vless" {
            return Err(format!("unsupported scheme: {}", url.scheme()));
        }

        let id = url.username();
        if id.is_empty() {
            return Err("missing user id".to_string());
        }

        let mut sni = None;
        let mut public_key = None;
        let mut short_id = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sni" => sni = Some(value.into_owned()),
                "pbk" => public_key = Some(value.into_owned()),
                "sid" => short_id = Some(value.into_owned()),
                _ => {}
            }
        }

        let server_name = sni
            .filter(|s| !s.is_empty())
            .or_else(|| url.host_str().map(str::to_string))
            .ok_or("missing server name")?;

        Ok(Self {
            id: id.to_string(),
            server_name,
            public_key: public_key
                .filter(|s| !s.is_empty())
                .ok_or("missing public key (pbk)")?,
            short_id: short_id.ok_or("missing short id (sid)")?,
        })
    }
}

/// Build the outbound descriptor for `ip` from a role profile.
///
/// # Errors
///
/// Returns `ControlError::InvalidRoutingKey` if the profile's key is malformed.
pub fn descriptor_for(ip: NodeIp, profile: &RoleProfile) -> Result<Value> {
    let key = VlessKey::parse(&profile.routing_key).map_err(|reason| {
        ControlError::InvalidRoutingKey {
            role: profile.role.clone(),
            reason,
        }
    })?;
    Ok(build_descriptor(ip, &profile.role, &key))
}

/// Build the outbound descriptor document.
#[must_use]
pub fn build_descriptor(ip: NodeIp, role: &RoleTag, key: &VlessKey) -> Value {
    json!({
        "outbounds": [{
            "protocol": "vless",
            "settings": {
                "vnext": [{
                    "address": ip.to_string(),
                    "port": RELAY_PORT,
                    "users": [{
                        "id": key.id,
                        "encryption": "none",
                        "flow": "xtls-rprx-vision"
                    }]
                }]
            },
            "streamSettings": {
                "network": "tcp",
                "security": "reality",
                "realitySettings": {
                    "fingerprint": "chrome",
                    "serverName": key.server_name,
                    "publicKey": key.public_key,
                    "shortId": key.short_id,
                    "show": false
                }
            },
            "tag": role.outbound_tag()
        }]
    })
}
