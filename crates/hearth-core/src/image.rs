//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Image reference manipulation."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---

/// Tag used when an update names none.
pub const DEFAULT_TAG: &str = "latest";

/// Replace the tag of `reference`, keeping registry and repository.
///
/// Only the segment after the last `/` carries a tag, so registry ports such
/// as `registry.local:5000/app` survive. Digests are dropped.
pub fn retag(reference: &str, tag: &str) -> String {
    let tag = tag.trim().trim_start_matches(':');
    let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };

    let without_digest = reference.split('@').next().unwrap_or(reference);
    let (prefix, last) = match without_digest.rfind('/') {
        Some(idx) => without_digest.split_at(idx + 1),
        None => ("", without_digest),
    };
    let repository = last.split(':').next().unwrap_or(last);
    format!("{prefix}{repository}:{tag}")
}
