use crate::core::error::{Error, ErrorKind, Result};
use crate::schema::SchemaRegistry;

/// Split a DN into RDN components on unescaped commas. A backslash escapes
/// the character after it; escaped text is kept literally, so the same bytes
/// written are the bytes matched later.
pub fn split_rdns(dn: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in dn.chars() {
        if escaped {
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            current.push(c);
            escaped = true;
        } else if c == ',' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

/// Split one RDN into (attribute, value). The attribute id is lowercased,
/// the value trimmed but otherwise untouched.
pub fn parse_rdn(rdn: &str) -> Result<(String, String)> {
    match rdn.split_once('=') {
        Some((attr, value)) => Ok((attr.trim().to_lowercase(), value.trim().to_string())),
        None => Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("malformed RDN '{}'", rdn),
        )),
    }
}

/// Canonical form of one RDN: lowercased attribute, schema-normalized value.
pub fn normalize_rdn(schema: &SchemaRegistry, rdn: &str) -> Result<String> {
    let (attr, value) = parse_rdn(rdn)?;
    Ok(format!("{}={}", attr, schema.normalize(&attr, &value)))
}

/// Canonical form of a whole DN, used as the ndn index key.
pub fn normalize_dn(schema: &SchemaRegistry, dn: &str) -> Result<String> {
    if dn.trim().is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "empty DN".to_string(),
        ));
    }
    let parts: Result<Vec<String>> = split_rdns(dn)
        .iter()
        .map(|rdn| normalize_rdn(schema, rdn))
        .collect();
    Ok(parts?.join(","))
}

/// The DN with its first RDN removed; None when there is only one RDN.
pub fn parent_dn(dn: &str) -> Option<String> {
    let parts = split_rdns(dn);
    if parts.len() < 2 {
        return None;
    }
    Some(parts[1..].join(","))
}

/// The leading RDN of a DN.
pub fn rdn(dn: &str) -> String {
    split_rdns(dn).into_iter().next().unwrap_or_default()
}
