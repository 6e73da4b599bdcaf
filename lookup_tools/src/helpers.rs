use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{LookupApiError, ProviderResponse, ProviderStatus, ServiceId};

#[derive(Deserialize)]
struct Envelope {
    status: Option<String>,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    object: Value,
}

/// Parses the body of a provider reply into a [`ProviderResponse`].
///
/// The provider is not consistent about where it puts the structured data: some services return it in `object`,
/// others return an object in `result` and others only return text. All three shapes are accepted.
pub fn parse_provider_body(service: ServiceId, body: &str) -> Result<ProviderResponse, LookupApiError> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| LookupApiError::JsonError(e.to_string()))?;
    let status = envelope
        .status
        .as_deref()
        .map(ProviderStatus::from)
        .ok_or_else(|| LookupApiError::ResponseError(format!("No status field in reply from {service}")))?;
    let (result, result_object) = match envelope.result {
        Value::String(s) => (s, None),
        Value::Null => (String::new(), None),
        v @ Value::Object(_) => (String::new(), Some(v)),
        v => (v.to_string(), None),
    };
    let object = match envelope.object {
        v @ Value::Object(_) => Some(v),
        _ => result_object,
    };
    Ok(ProviderResponse { service, status, result, object })
}

/// Reduces the provider's HTML fragments to plain text, one logical line per `<br>`.
pub fn strip_markup(html: &str) -> String {
    let with_breaks = html.replace("<br>", "\n").replace("<br/>", "\n").replace("<br />", "\n");
    let mut out = String::with_capacity(with_breaks.len());
    let mut in_tag = false;
    for c in with_breaks.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {},
        }
    }
    out.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collects the `Key: Value` lines of a text payload. Lines without a key or a value are skipped.
pub fn text_fields(text: &str) -> Map<String, Value> {
    strip_markup(text)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}
