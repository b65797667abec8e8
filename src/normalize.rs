//! Normalizer (spec §4.7): maps raw RDAP JSON into the shapes from
//! `crate::types`. Includes the vCard tagged-union walker (spec §9) and the
//! registrar/nameserver extraction rules.

use crate::errors::Error;
use crate::types::*;
use chrono::Utc;
use serde_json::Value;

/// RDAP permits entities to nest entities recursively; this bounds the work
/// an adversarial response can force onto the normalizer (spec §9).
const MAX_ENTITY_DEPTH: u32 = 8;

pub struct NormalizeInput<'a> {
    pub raw: &'a Value,
    pub query: Query,
    pub source: String,
    pub cached: bool,
    pub include_raw: bool,
}

/// Converts a raw RDAP document into a [`NormalizedResponse`] of the shape
/// matching its `objectClassName` (spec §4.7).
pub fn normalize(input: NormalizeInput) -> Result<NormalizedResponse, Error> {
    let class = input
        .raw
        .get("objectClassName")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::parse("response is missing objectClassName"))?;

    let mut remarks = parse_remarks(input.raw.get("remarks"));

    let envelope = Envelope {
        object_class: ObjectClass::try_from_wire(class),
        handle: string_field(input.raw, "handle"),
        status: string_array(input.raw.get("status")),
        entities: parse_entities(input.raw.get("entities"), 0, &mut remarks),
        events: parse_events(input.raw.get("events"), &mut remarks),
        links: parse_links(input.raw.get("links")),
        remarks,
    };

    let metadata = Metadata {
        source: input.source,
        timestamp: Utc::now(),
        cached: input.cached,
    };

    let raw = if input.include_raw {
        Some(input.raw.clone())
    } else {
        None
    };

    match class {
        "domain" => Ok(NormalizedResponse::Domain {
            query: input.query,
            domain: parse_domain(input.raw, &envelope),
            envelope,
            metadata,
            raw,
        }),
        "ip network" => Ok(NormalizedResponse::Ip {
            query: input.query,
            ip: parse_ip(input.raw)?,
            envelope,
            metadata,
            raw,
        }),
        "autnum" => Ok(NormalizedResponse::Asn {
            query: input.query,
            asn: parse_asn(input.raw),
            envelope,
            metadata,
            raw,
        }),
        "entity" => {
            let entity = RDAPEntity {
                handle: envelope.handle,
                roles: string_array(input.raw.get("roles"))
                    .iter()
                    .filter_map(|r| r.parse::<Role>().ok())
                    .collect(),
                vcard_array: input.raw.get("vcardArray").cloned(),
                entities: envelope.entities,
                public_ids: parse_public_ids(input.raw.get("publicIds")),
                remarks: envelope.remarks,
                links: envelope.links,
                events: envelope.events,
                status: envelope.status,
            };
            Ok(NormalizedResponse::Entity {
                query: input.query,
                entity,
                metadata,
                raw,
            })
        }
        other => Err(Error::parse(format!("unknown objectClassName: {:?}", other))),
    }
}

impl ObjectClass {
    fn try_from_wire(s: &str) -> Option<ObjectClass> {
        match s {
            "domain" => Some(ObjectClass::Domain),
            "ip network" => Some(ObjectClass::IpNetwork),
            "autnum" => Some(ObjectClass::Autnum),
            "entity" => Some(ObjectClass::Entity),
            _ => None,
        }
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn parse_domain(raw: &Value, envelope: &Envelope) -> DomainResponse {
    DomainResponse {
        ldh_name: string_field(raw, "ldhName").unwrap_or_default(),
        unicode_name: string_field(raw, "unicodeName"),
        nameservers: parse_nameservers(raw.get("nameservers")),
        registrar: extract_registrar(&envelope.entities),
    }
}

/// Nameservers: take `ldhName` else `unicodeName`, drop empties, lowercase,
/// dedupe preserving first occurrence (spec §4.7).
fn parse_nameservers(value: Option<&Value>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    let Some(arr) = value.and_then(Value::as_array) else {
        return out;
    };

    for ns in arr {
        let name = string_field(ns, "ldhName").or_else(|| string_field(ns, "unicodeName"));
        let Some(name) = name else { continue };
        if name.is_empty() {
            continue;
        }
        let lower = name.to_ascii_lowercase();
        if seen.insert(lower.clone()) {
            out.push(lower);
        }
    }

    out
}

/// Finds the first entity whose `roles` contains `"registrar"`, reading its
/// display name out of `vcardArray[1]` (the `fn` property tuple's 4th
/// element) and its URL from the `rel == "self"` link (spec §4.7).
fn extract_registrar(entities: &[RDAPEntity]) -> Option<Registrar> {
    let registrar = entities.iter().find(|e| e.roles.contains(&Role::Registrar))?;

    Some(Registrar {
        name: registrar
            .vcard_array
            .as_ref()
            .and_then(vcard::find_text(vcard::FN_PROPERTY)),
        handle: registrar.handle.clone(),
        url: registrar
            .links
            .iter()
            .find(|l| l.rel.as_deref() == Some("self"))
            .map(|l| l.href.clone()),
    })
}

fn parse_ip(raw: &Value) -> Result<IpResponse, Error> {
    let start = string_field(raw, "startAddress").unwrap_or_default();
    let end = string_field(raw, "endAddress").unwrap_or_default();

    let start_addr: std::net::IpAddr = start
        .parse()
        .map_err(|_| Error::parse(format!("invalid startAddress: {:?}", start)))?;
    let end_addr: std::net::IpAddr = end
        .parse()
        .map_err(|_| Error::parse(format!("invalid endAddress: {:?}", end)))?;

    if address_gt(&start_addr, &end_addr) {
        return Err(Error::parse("startAddress is greater than endAddress"));
    }

    let ip_version = match raw.get("ipVersion").and_then(Value::as_str) {
        Some("v4") => 4,
        Some("v6") => 6,
        _ => match start_addr {
            std::net::IpAddr::V4(_) => 4,
            std::net::IpAddr::V6(_) => 6,
        },
    };

    Ok(IpResponse {
        start_address: IpAddr_(start_addr),
        end_address: IpAddr_(end_addr),
        ip_version,
        name: string_field(raw, "name"),
        network_type: string_field(raw, "type"),
        country: string_field(raw, "country"),
    })
}

/// Numeric comparison for IPv4, lexicographic (octet-wise) for IPv6, per
/// spec §3's invariant on `startAddress <= endAddress`.
fn address_gt(a: &std::net::IpAddr, b: &std::net::IpAddr) -> bool {
    use std::net::IpAddr;
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => u32::from(*a) > u32::from(*b),
        (IpAddr::V6(a), IpAddr::V6(b)) => a.octets() > b.octets(),
        _ => false,
    }
}

fn parse_asn(raw: &Value) -> AsnResponse {
    AsnResponse {
        start_autnum: raw.get("startAutnum").and_then(Value::as_u64).unwrap_or(0) as u32,
        end_autnum: raw.get("endAutnum").and_then(Value::as_u64).unwrap_or(0) as u32,
        name: string_field(raw, "name"),
        network_type: string_field(raw, "type"),
        country: string_field(raw, "country"),
    }
}

fn parse_links(value: Option<&Value>) -> Vec<Link> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|l| Link {
                    value: string_field(l, "value"),
                    rel: string_field(l, "rel"),
                    href: string_field(l, "href").unwrap_or_default(),
                    media_type: string_field(l, "type"),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_remarks(value: Option<&Value>) -> Vec<Remark> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|r| Remark {
                    title: string_field(r, "title"),
                    description: string_array(r.get("description")),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses `events[]`, mapping `eventAction` onto [`EventType`]. A malformed
/// date does not abort normalization; it surfaces as a remark instead
/// (spec §4.7).
fn parse_events(value: Option<&Value>, remarks: &mut Vec<Remark>) -> Vec<RDAPEvent> {
    let Some(arr) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    arr.iter()
        .filter_map(|e| {
            let action = string_field(e, "eventAction")?;
            let date = string_field(e, "eventDate").unwrap_or_default();

            if chrono::DateTime::parse_from_rfc3339(&date).is_err() {
                remarks.push(Remark {
                    title: Some("malformed event date".to_string()),
                    description: vec![format!("event {:?} has unparseable date {:?}", action, date)],
                });
            }

            Some(RDAPEvent {
                event_type: EventType::parse(&action),
                date,
                actor: string_field(e, "eventActor"),
            })
        })
        .collect()
}

fn parse_public_ids(value: Option<&Value>) -> Vec<PublicId> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|p| {
                    Some(PublicId {
                        id_type: string_field(p, "type")?,
                        identifier: string_field(p, "identifier").unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parses `entities[]`, recursing into each entity's own nested
/// `entities[]` up to [`MAX_ENTITY_DEPTH`]; anything deeper is truncated
/// with a remark (spec §9).
fn parse_entities(value: Option<&Value>, depth: u32, remarks: &mut Vec<Remark>) -> Vec<RDAPEntity> {
    let Some(arr) = value.and_then(Value::as_array) else {
        return Vec::new();
    };

    if depth >= MAX_ENTITY_DEPTH {
        remarks.push(Remark {
            title: Some("entity nesting truncated".to_string()),
            description: vec![format!(
                "entities nested beyond the maximum depth of {} were dropped",
                MAX_ENTITY_DEPTH
            )],
        });
        return Vec::new();
    }

    arr.iter()
        .map(|e| RDAPEntity {
            handle: string_field(e, "handle"),
            roles: string_array(e.get("roles"))
                .iter()
                .filter_map(|r| r.parse::<Role>().ok())
                .collect(),
            vcard_array: e.get("vcardArray").cloned(),
            entities: parse_entities(e.get("entities"), depth + 1, remarks),
            public_ids: parse_public_ids(e.get("publicIds")),
            remarks: parse_remarks(e.get("remarks")),
            links: parse_links(e.get("links")),
            events: parse_events(e.get("events"), remarks),
            status: string_array(e.get("status")),
        })
        .collect()
}

/// A minimal tagged-union walker over the untyped vCard array format
/// (RFC 6350, carried inside RDAP as `vcardArray`). Deliberately does not
/// rely on positional indexing beyond what the RFC guarantees: a vCard is
/// `["vcard", [[name, params, type, value...], ...]]`.
pub mod vcard {
    use serde_json::Value;

    pub const FN_PROPERTY: &str = "fn";
    pub const EMAIL_PROPERTY: &str = "email";
    pub const TEL_PROPERTY: &str = "tel";
    pub const ADR_PROPERTY: &str = "adr";

    /// Returns a closure finding the first property tuple named `name` and
    /// extracting its value (index 3) as a string.
    pub fn find_text(name: &'static str) -> impl Fn(&Value) -> Option<String> + '_ {
        move |vcard_array| {
            properties(vcard_array)
                .find(|tuple| tuple_name(tuple) == Some(name))
                .and_then(|tuple| tuple.get(3))
                .and_then(Value::as_str)
                .map(str::to_string)
        }
    }

    /// Iterates the property tuples of a `vcardArray` (`vcard_array[1]`),
    /// skipping the leading `"vcard"` literal at index 0.
    pub fn properties(vcard_array: &Value) -> impl Iterator<Item = &Value> {
        vcard_array
            .as_array()
            .and_then(|top| top.get(1))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
    }

    pub fn tuple_name(tuple: &Value) -> Option<&str> {
        tuple.get(0).and_then(Value::as_str)
    }

    /// All property tuples whose name is one of `names`, used by the PII
    /// redactor (spec §4.9).
    pub fn properties_named<'a>(
        vcard_array: &'a Value,
        names: &'a [&'a str],
    ) -> impl Iterator<Item = &'a Value> {
        properties(vcard_array).filter(move |tuple| {
            tuple_name(tuple)
                .map(|n| names.contains(&n))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_input(raw: &Value) -> NormalizeInput<'_> {
        NormalizeInput {
            raw,
            query: Query::Domain("example.com".into()),
            source: "https://rdap.example-registry.test/domain/example.com".into(),
            cached: false,
            include_raw: false,
        }
    }

    #[test]
    fn missing_object_class_is_parse_error() {
        let raw = json!({});
        assert!(matches!(normalize(base_input(&raw)), Err(Error::Parse { .. })));
    }

    #[test]
    fn unknown_object_class_is_parse_error() {
        let raw = json!({ "objectClassName": "nameserver" });
        assert!(matches!(normalize(base_input(&raw)), Err(Error::Parse { .. })));
    }

    #[test]
    fn domain_extracts_registrar_name_and_url() {
        let raw = json!({
            "objectClassName": "domain",
            "handle": "EX-1",
            "ldhName": "example.com",
            "nameservers": [{ "ldhName": "NS1.EXAMPLE.COM" }, { "ldhName": "ns1.example.com" }],
            "entities": [{
                "objectClassName": "entity",
                "handle": "REG-1",
                "roles": ["registrar"],
                "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", "Example Registrar"]
                ]],
                "links": [{ "rel": "self", "href": "https://rdap.example-registry.test/entity/REG-1" }]
            }]
        });

        let normalized = normalize(base_input(&raw)).unwrap();
        match normalized {
            NormalizedResponse::Domain { domain, .. } => {
                assert_eq!(domain.ldh_name, "example.com");
                // dedup + lowercase, preserving first occurrence.
                assert_eq!(domain.nameservers, vec!["ns1.example.com".to_string()]);
                let registrar = domain.registrar.unwrap();
                assert_eq!(registrar.name.as_deref(), Some("Example Registrar"));
                assert_eq!(
                    registrar.url.as_deref(),
                    Some("https://rdap.example-registry.test/entity/REG-1")
                );
            }
            _ => panic!("expected domain response"),
        }
    }

    #[test]
    fn ip_response_requires_start_le_end() {
        let raw = json!({
            "objectClassName": "ip network",
            "startAddress": "8.8.8.8",
            "endAddress": "8.0.0.0",
        });
        let input = NormalizeInput {
            query: Query::Ip("8.8.8.8".into()),
            ..base_input(&raw)
        };
        assert!(matches!(normalize(input), Err(Error::Parse { .. })));
    }

    #[test]
    fn asn_response_carries_range() {
        let raw = json!({
            "objectClassName": "autnum",
            "startAutnum": 15000,
            "endAutnum": 16000,
        });
        let input = NormalizeInput {
            query: Query::Asn(15169),
            ..base_input(&raw)
        };
        match normalize(input).unwrap() {
            NormalizedResponse::Asn { asn, .. } => {
                assert_eq!(asn.start_autnum, 15000);
                assert_eq!(asn.end_autnum, 16000);
            }
            _ => panic!("expected asn response"),
        }
    }

    #[test]
    fn unknown_event_action_passes_through_as_raw_string() {
        let raw = json!({
            "objectClassName": "domain",
            "ldhName": "example.com",
            "events": [{ "eventAction": "some-future-action", "eventDate": "2024-01-01T00:00:00Z" }]
        });
        match normalize(base_input(&raw)).unwrap() {
            NormalizedResponse::Domain { envelope, .. } => {
                assert_eq!(
                    envelope.events[0].event_type,
                    EventType::Other("some-future-action".to_string())
                );
            }
            _ => panic!("expected domain response"),
        }
    }

    #[test]
    fn malformed_event_date_surfaces_as_remark_not_error() {
        let raw = json!({
            "objectClassName": "domain",
            "ldhName": "example.com",
            "events": [{ "eventAction": "registration", "eventDate": "not-a-date" }]
        });
        match normalize(base_input(&raw)).unwrap() {
            NormalizedResponse::Domain { envelope, .. } => {
                assert_eq!(envelope.events.len(), 1);
                assert!(envelope.remarks.iter().any(|r| r.title.as_deref() == Some("malformed event date")));
            }
            _ => panic!("expected domain response"),
        }
    }

    #[test]
    fn entity_nesting_beyond_max_depth_is_truncated() {
        // Build entities nested 10 levels deep; only 8 should survive.
        let mut innermost = json!({ "objectClassName": "entity", "handle": "LEAF" });
        for i in (0..10).rev() {
            innermost = json!({
                "objectClassName": "entity",
                "handle": format!("E{}", i),
                "entities": [innermost],
            });
        }
        let raw = json!({
            "objectClassName": "domain",
            "ldhName": "example.com",
            "entities": [innermost],
        });

        match normalize(base_input(&raw)).unwrap() {
            NormalizedResponse::Domain { envelope, .. } => {
                let mut depth = 0;
                let mut cursor = &envelope.entities;
                while !cursor.is_empty() {
                    depth += 1;
                    cursor = &cursor[0].entities;
                }
                assert!(depth <= MAX_ENTITY_DEPTH as usize);
                assert!(envelope.remarks.iter().any(|r| r.title.as_deref() == Some("entity nesting truncated")));
            }
            _ => panic!("expected domain response"),
        }
    }

    #[test]
    fn vcard_find_text_locates_fn_property() {
        let vcard_array = json!(["vcard", [
            ["version", {}, "text", "4.0"],
            ["fn", {}, "text", "Jane Doe"],
        ]]);
        assert_eq!(vcard::find_text(vcard::FN_PROPERTY)(&vcard_array), Some("Jane Doe".to_string()));
    }
}
