//! ARN expansion into alternative resource identifiers (akas).
//!
//! Every ARN maps to itself plus service-specific derived forms, so a row
//! can be found under any identifier a user is likely to search for.

/// Expand one ARN into its aka set. The input ARN is always first.
///
/// Derived forms:
/// * object-store bucket ARNs additionally yield the `/*` object wildcard
/// * ARNs with a `resource-type/name` tail additionally yield the bare name
pub fn expand_arn(arn: &str) -> Vec<String> {
    let mut akas = vec![arn.to_string()];

    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    if parts.len() < 6 || parts[0] != "arn" {
        return akas;
    }
    let service = parts[2];
    let resource = parts[5];

    if service == "s3" && !resource.contains('/') {
        akas.push(format!("{}/*", arn));
    }

    if let Some((_, name)) = resource.split_once('/') {
        if !name.is_empty() {
            akas.push(name.to_string());
        }
    }

    akas
}

/// Expand a set of ARNs, deduplicating while preserving first-seen order.
pub fn expand_arns(arns: &[String]) -> Vec<String> {
    let mut akas = Vec::new();
    for arn in arns {
        for aka in expand_arn(arn) {
            if !akas.contains(&aka) {
                akas.push(aka);
            }
        }
    }
    akas
}
