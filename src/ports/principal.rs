//! Minimal assumed-caller identity. Full RBAC/API-key authentication is explicitly
//! out of scope (§1); this just gives the Stream Receiver and query path something
//! to check `wsCapabilityType` authorization against.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The streaming capability classes named in §6's `subscribe` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsCapabilityType {
    Quote,
    Depth,
    Trade,
    Broker,
    Kline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ReadQuote,
    ReadBasicInfo,
    ReadIndex,
    ReadNews,
    Stream(WsCapabilityType),
    Admin,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    capabilities: HashSet<Capability>,
}

impl Principal {
    pub fn new(id: impl Into<String>, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self { id: id.into(), capabilities: capabilities.into_iter().collect() }
    }

    /// A principal with every capability, for internal wiring and tests.
    pub fn unrestricted(id: impl Into<String>) -> Self {
        Self::new(
            id,
            [
                Capability::ReadQuote,
                Capability::ReadBasicInfo,
                Capability::ReadIndex,
                Capability::ReadNews,
                Capability::Stream(WsCapabilityType::Quote),
                Capability::Stream(WsCapabilityType::Depth),
                Capability::Stream(WsCapabilityType::Trade),
                Capability::Stream(WsCapabilityType::Broker),
                Capability::Stream(WsCapabilityType::Kline),
                Capability::Admin,
            ],
        )
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&Capability::Admin) || self.capabilities.contains(&capability)
    }

    pub fn can_stream(&self, ws_capability_type: WsCapabilityType) -> bool {
        self.can(Capability::Stream(ws_capability_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_implies_all_capabilities() {
        let admin = Principal::new("op", [Capability::Admin]);
        assert!(admin.can_stream(WsCapabilityType::Kline));
        assert!(admin.can(Capability::ReadNews));
    }

    #[test]
    fn scoped_principal_only_has_granted_capabilities() {
        let p = Principal::new("client-1", [Capability::Stream(WsCapabilityType::Quote)]);
        assert!(p.can_stream(WsCapabilityType::Quote));
        assert!(!p.can_stream(WsCapabilityType::Depth));
        assert!(!p.can(Capability::ReadNews));
    }
}
