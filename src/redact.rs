//! PII redactor: walks a [`NormalizedResponse`] tree and replaces
//! `email`/`tel`/`adr` vCard property values with `"[REDACTED]"` under the
//! configured policy. Never mutates its input; always returns a
//! deep-copied view, recursing into nested entities at unbounded depth.

use crate::config::PrivacyOptions;
use crate::normalize::vcard;
use crate::types::{NormalizedResponse, RDAPEntity};
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Returns a redacted deep copy of `response` per `opts`. A no-op copy when
/// `opts.redact_pii` is false: with redaction disabled the emitted JSON
/// equals the normalized JSON.
pub fn redact(response: &NormalizedResponse, opts: &PrivacyOptions) -> NormalizedResponse {
    if !opts.redact_pii {
        return response.clone();
    }

    let mut out = response.clone();
    match &mut out {
        NormalizedResponse::Domain { envelope, .. }
        | NormalizedResponse::Ip { envelope, .. }
        | NormalizedResponse::Asn { envelope, .. } => {
            for entity in &mut envelope.entities {
                redact_entity(entity, opts);
            }
        }
        NormalizedResponse::Entity { entity, .. } => redact_entity(entity, opts),
    }
    out
}

/// Recurses into nested `entities[]` at every depth: redaction is not
/// limited to the top level.
fn redact_entity(entity: &mut RDAPEntity, opts: &PrivacyOptions) {
    if let Some(vcard_array) = entity.vcard_array.take() {
        entity.vcard_array = Some(redact_vcard(vcard_array, opts));
    }

    for nested in &mut entity.entities {
        redact_entity(nested, opts);
    }
}

fn redact_vcard(mut vcard_array: Value, opts: &PrivacyOptions) -> Value {
    let names = targeted_property_names(opts);
    if names.is_empty() || vcard::properties_named(&vcard_array, &names).next().is_none() {
        return vcard_array;
    }

    if let Some(properties) = vcard_array
        .get_mut(1)
        .and_then(|v| v.as_array_mut())
    {
        for tuple in properties.iter_mut() {
            let is_targeted = vcard::tuple_name(tuple)
                .map(|n| names.contains(&n))
                .unwrap_or(false);
            if !is_targeted {
                continue;
            }
            if let Some(value_slot) = tuple.get_mut(3) {
                *value_slot = Value::String(REDACTED.to_string());
            }
        }
    }

    vcard_array
}

fn targeted_property_names(opts: &PrivacyOptions) -> Vec<&'static str> {
    let mut names = Vec::new();
    if opts.redact_emails {
        names.push(vcard::EMAIL_PROPERTY);
    }
    if opts.redact_phones {
        names.push(vcard::TEL_PROPERTY);
    }
    if opts.redact_addresses {
        names.push(vcard::ADR_PROPERTY);
    }
    names
}
