//! Participant endpoint sources
//!
//! A joining participant supplies its callback endpoints either as an
//! HTTP `Link` header with rel-qualified URIs, or as a plain-text base
//! URI from which the endpoints are derived by appending the well-known
//! suffixes.

use thiserror::Error;

/// Rejections raised while resolving participant endpoints.
///
/// Each variant maps to a distinct HTTP response at the API surface:
/// missing compensate is the caller's fault (400), an invalid base URI
/// fails the precondition (412), and a Link header the coordinator cannot
/// parse is reported as an internal error (500).
#[derive(Debug, Clone, Error)]
pub enum EndpointError {
    /// Neither a compensate nor a complete endpoint was supplied
    #[error("enlistment supplies neither a compensate nor a complete endpoint")]
    MissingCompensate,

    /// The Link header could not be parsed
    #[error("malformed Link header: {0}")]
    MalformedLink(String),

    /// The plain-text body is not a usable absolute URI
    #[error("invalid participant URI: {0}")]
    InvalidUri(String),
}

/// Resolved callback endpoints for one enlistment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub compensate: Option<String>,
    pub complete: Option<String>,
    pub status: Option<String>,
    pub forget: Option<String>,
    pub after: Option<String>,
}

impl Endpoints {
    /// Parses an HTTP `Link` header of the form
    /// `<uri>; rel="compensate", <uri>; rel="complete", ...`.
    ///
    /// Unknown rels are ignored. The header must name at least one of
    /// `compensate`/`complete`; every LRA can be cancelled, so a purely
    /// decorative enlistment is refused.
    pub fn from_link_header(header: &str) -> Result<Self, EndpointError> {
        let mut endpoints = Endpoints::default();

        if header.trim().is_empty() {
            return Err(EndpointError::MalformedLink("empty header".to_string()));
        }

        for part in header.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (uri, rel) = parse_link_value(part)?;
            validate_uri(&uri).map_err(|_| {
                EndpointError::MalformedLink(format!("link target is not absolute: {}", uri))
            })?;
            match rel.as_str() {
                "compensate" => endpoints.compensate = Some(uri),
                "complete" => endpoints.complete = Some(uri),
                "status" => endpoints.status = Some(uri),
                "forget" => endpoints.forget = Some(uri),
                "after" => endpoints.after = Some(uri),
                _ => {}
            }
        }

        if endpoints.compensate.is_none() && endpoints.complete.is_none() {
            return Err(EndpointError::MissingCompensate);
        }
        Ok(endpoints)
    }

    /// Derives the full endpoint set from a plain-text base URI by
    /// appending `/compensate`, `/complete`, `/status`, `/forget`, and
    /// `/after`.
    pub fn from_base_uri(body: &str) -> Result<Self, EndpointError> {
        let base = body.trim().trim_end_matches('/');
        validate_uri(base).map_err(|_| EndpointError::InvalidUri(body.to_string()))?;
        Ok(Endpoints {
            compensate: Some(format!("{}/compensate", base)),
            complete: Some(format!("{}/complete", base)),
            status: Some(format!("{}/status", base)),
            forget: Some(format!("{}/forget", base)),
            after: Some(format!("{}/after", base)),
        })
    }
}

/// Splits one `<uri>; rel="name"` link-value into its target and rel.
fn parse_link_value(part: &str) -> Result<(String, String), EndpointError> {
    let rest = part
        .strip_prefix('<')
        .ok_or_else(|| EndpointError::MalformedLink(format!("missing '<' in: {}", part)))?;
    let (uri, params) = rest
        .split_once('>')
        .ok_or_else(|| EndpointError::MalformedLink(format!("missing '>' in: {}", part)))?;

    let mut rel = None;
    for param in params.split(';') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| EndpointError::MalformedLink(format!("bad link param: {}", param)))?;
        if name.trim() == "rel" {
            rel = Some(value.trim().trim_matches('"').to_string());
        }
    }

    let rel = rel.ok_or_else(|| EndpointError::MalformedLink(format!("missing rel in: {}", part)))?;
    Ok((uri.trim().to_string(), rel))
}

/// An endpoint URI must be absolute http(s) with an authority and no
/// embedded whitespace.
fn validate_uri(uri: &str) -> Result<(), ()> {
    let rest = uri
        .strip_prefix("http://")
        .or_else(|| uri.strip_prefix("https://"))
        .ok_or(())?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(());
    }
    if uri.chars().any(|c| c.is_whitespace()) {
        return Err(());
    }
    Ok(())
}
