//! The RDAP data model: queries, normalized response shapes, events,
//! entities, links, and cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};
use strum_macros::{Display, EnumString};

/// A validated, canonicalized user query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Domain(String),
    Ip(String),
    Asn(u32),
    /// An entity handle lookup (SPEC_FULL.md §11's object-tag bootstrap
    /// supplement), not named in spec.md's Data Model.
    Entity(String),
}

impl Query {
    /// The `rdap:{type}:{canonical}` cache key.
    pub fn cache_key(&self) -> String {
        match self {
            Query::Domain(d) => format!("rdap:domain:{}", d),
            Query::Ip(ip) => format!("rdap:ip:{}", ip),
            Query::Asn(n) => format!("rdap:asn:{}", n),
            Query::Entity(h) => format!("rdap:entity:{}", h),
        }
    }

    pub fn object_class(&self) -> ObjectClass {
        match self {
            Query::Domain(_) => ObjectClass::Domain,
            Query::Ip(_) => ObjectClass::IpNetwork,
            Query::Asn(_) => ObjectClass::Autnum,
            Query::Entity(_) => ObjectClass::Entity,
        }
    }
}

/// `objectClassName` as seen on the wire, and as carried by a
/// [`NormalizedResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum ObjectClass {
    #[strum(serialize = "domain")]
    #[serde(rename = "domain")]
    Domain,

    #[strum(serialize = "ip network")]
    #[serde(rename = "ip network")]
    IpNetwork,

    #[strum(serialize = "autnum")]
    #[serde(rename = "autnum")]
    Autnum,

    #[strum(serialize = "entity")]
    #[serde(rename = "entity")]
    Entity,
}

/// RFC 9083 event types, plus a passthrough for actions unknown to this
/// crate: unknown actions pass through as the raw string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Registration,
    Expiration,
    LastChanged,
    Transfer,
    Deletion,
    Reregistration,
    Reinstantiation,
    LastUpdateOfRdapDatabase,
    Locked,
    Unlocked,
    Other(String),
}

impl EventType {
    pub fn parse(action: &str) -> EventType {
        match action {
            "registration" => EventType::Registration,
            "expiration" => EventType::Expiration,
            "last changed" => EventType::LastChanged,
            "transfer" => EventType::Transfer,
            "deletion" => EventType::Deletion,
            "reregistration" => EventType::Reregistration,
            "reinstantiation" => EventType::Reinstantiation,
            "last update of RDAP database" => EventType::LastUpdateOfRdapDatabase,
            "locked" => EventType::Locked,
            "unlocked" => EventType::Unlocked,
            other => EventType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventType::Registration => "registration",
            EventType::Expiration => "expiration",
            EventType::LastChanged => "last changed",
            EventType::Transfer => "transfer",
            EventType::Deletion => "deletion",
            EventType::Reregistration => "reregistration",
            EventType::Reinstantiation => "reinstantiation",
            EventType::LastUpdateOfRdapDatabase => "last update of RDAP database",
            EventType::Locked => "locked",
            EventType::Unlocked => "unlocked",
            EventType::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RDAPEvent {
    pub event_type: EventType,
    /// ISO-8601 date string, passed through verbatim (malformed
    /// dates don't abort normalization, they surface as a remark instead).
    pub date: String,
    pub actor: Option<String>,
}

/// RFC 9083 entity roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Registrant,
    Registrar,
    Admin,
    Tech,
    Abuse,
    Billing,
    Noc,
    Reseller,
    Sponsor,
    Proxy,
}

/// RFC 8605 identifier issued by an external system (e.g. ICANN IANA ids).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicId {
    pub id_type: String,
    pub identifier: String,
}

/// A single RFC 9083 `links[]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Link {
    pub value: Option<String>,
    pub rel: Option<String>,
    pub href: String,
    pub media_type: Option<String>,
}

/// A single RFC 9083 `remarks[]`/`notices[]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Remark {
    pub title: Option<String>,
    pub description: Vec<String>,
}

/// An RDAP entity: registrar, registrant, technical contact, etc. Entities
/// nest recursively; depth is bounded by the normalizer at 8.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RDAPEntity {
    pub handle: Option<String>,
    pub roles: Vec<Role>,
    pub vcard_array: Option<Value>,
    pub entities: Vec<RDAPEntity>,
    pub public_ids: Vec<PublicId>,
    pub remarks: Vec<Remark>,
    pub links: Vec<Link>,
    pub events: Vec<RDAPEvent>,
    pub status: Vec<String>,
}

/// A resolved registrar, extracted from the first entity whose roles
/// contain `"registrar"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registrar {
    pub name: Option<String>,
    pub handle: Option<String>,
    pub url: Option<String>,
}

/// Provenance and cache status attached to every normalized response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DomainResponse {
    pub ldh_name: String,
    pub unicode_name: Option<String>,
    pub nameservers: Vec<String>,
    pub registrar: Option<Registrar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpResponse {
    pub start_address: IpAddr_,
    pub end_address: IpAddr_,
    pub ip_version: u8,
    pub name: Option<String>,
    pub network_type: Option<String>,
    pub country: Option<String>,
}

/// Newtype so `IpResponse` can derive `Default` (`std::net::IpAddr` has no
/// meaningful default); holds the unspecified address until populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpAddr_(pub IpAddr);

impl Default for IpAddr_ {
    fn default() -> Self {
        IpAddr_(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED))
    }
}

impl std::fmt::Display for IpAddr_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AsnResponse {
    pub start_autnum: u32,
    pub end_autnum: u32,
    pub name: Option<String>,
    pub network_type: Option<String>,
    pub country: Option<String>,
}

/// The common envelope shared by every normalized response shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    pub object_class: Option<ObjectClass>,
    pub handle: Option<String>,
    pub status: Vec<String>,
    pub entities: Vec<RDAPEntity>,
    pub events: Vec<RDAPEvent>,
    pub links: Vec<Link>,
    pub remarks: Vec<Remark>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResponse {
    Domain {
        query: Query,
        envelope: Envelope,
        domain: DomainResponse,
        metadata: Metadata,
        raw: Option<Value>,
    },
    Ip {
        query: Query,
        envelope: Envelope,
        ip: IpResponse,
        metadata: Metadata,
        raw: Option<Value>,
    },
    Asn {
        query: Query,
        envelope: Envelope,
        asn: AsnResponse,
        metadata: Metadata,
        raw: Option<Value>,
    },
    /// A direct entity handle lookup (SPEC_FULL.md §11). Carries no
    /// separate [`Envelope`]: [`RDAPEntity`] already has handle/status/
    /// entities/events/links/remarks at the top level.
    Entity {
        query: Query,
        entity: RDAPEntity,
        metadata: Metadata,
        raw: Option<Value>,
    },
}

impl NormalizedResponse {
    pub fn query(&self) -> &Query {
        match self {
            NormalizedResponse::Domain { query, .. } => query,
            NormalizedResponse::Ip { query, .. } => query,
            NormalizedResponse::Asn { query, .. } => query,
            NormalizedResponse::Entity { query, .. } => query,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            NormalizedResponse::Domain { metadata, .. } => metadata,
            NormalizedResponse::Ip { metadata, .. } => metadata,
            NormalizedResponse::Asn { metadata, .. } => metadata,
            NormalizedResponse::Entity { metadata, .. } => metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            NormalizedResponse::Domain { metadata, .. } => metadata,
            NormalizedResponse::Ip { metadata, .. } => metadata,
            NormalizedResponse::Asn { metadata, .. } => metadata,
            NormalizedResponse::Entity { metadata, .. } => metadata,
        }
    }

    pub fn object_class(&self) -> ObjectClass {
        match self {
            NormalizedResponse::Domain { .. } => ObjectClass::Domain,
            NormalizedResponse::Ip { .. } => ObjectClass::IpNetwork,
            NormalizedResponse::Asn { .. } => ObjectClass::Autnum,
            NormalizedResponse::Entity { .. } => ObjectClass::Entity,
        }
    }
}

/// A cache slot: value plus the bookkeeping the LRU/TTL cache needs.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: NormalizedResponse,
    pub inserted_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match now.duration_since(self.inserted_at) {
            Ok(age) => age >= self.ttl,
            Err(_) => false, // inserted_at is in the future (clock skew); not expired.
        }
    }
}
