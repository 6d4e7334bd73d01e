//! Static, process-wide registry of supported transformer architectures.
//!
//! Source's `from_pretrained` resolves a model's architecture tag and uses
//! it to decide how to address the model's block list and hidden-dimension
//! attribute. Dynamic languages express this as an attribute-path lookup
//! (`model.layers`, `config.hidden_size`); Rust has no equivalent runtime
//! reflection, so the registry instead records, per tag, the diagnostic
//! path string (for error messages and `layer_name` generation) and the
//! canonical hidden-dim field name. The actual block-resolution *code* for
//! each tag lives in `steering-model`, which looks up entries here to
//! validate a tag before building its adapter.
//!
//! New families are added by inserting a row here and a matching adapter
//! in `steering-model::blocks`.

use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureInfo {
    /// Architecture tag, e.g. `"generic-decoder"`, `"llama"`.
    pub tag: &'static str,
    /// Dotted path to the block list, for diagnostics and `layer_name`.
    pub block_list_path: &'static str,
    /// Canonical attribute name the family uses for hidden dimension.
    pub hidden_dim_attr: &'static str,
}

static REGISTRY: Lazy<HashMap<&'static str, ArchitectureInfo>> = Lazy::new(|| {
    let entries = [
        ArchitectureInfo {
            tag: "generic-decoder",
            block_list_path: "blocks",
            hidden_dim_attr: "hidden_dim",
        },
        ArchitectureInfo {
            tag: "llama",
            block_list_path: "model.layers",
            hidden_dim_attr: "hidden_size",
        },
        ArchitectureInfo {
            tag: "mistral",
            block_list_path: "model.layers",
            hidden_dim_attr: "hidden_size",
        },
        ArchitectureInfo {
            tag: "gpt-neox",
            block_list_path: "gpt_neox.layers",
            hidden_dim_attr: "hidden_size",
        },
    ];
    entries.into_iter().map(|e| (e.tag, e)).collect()
});

/// Look up a registered architecture by tag.
pub fn lookup(tag: &str) -> Option<ArchitectureInfo> {
    REGISTRY.get(tag).copied()
}

pub fn is_supported(tag: &str) -> bool {
    REGISTRY.contains_key(tag)
}

/// All supported tags, sorted, for use in "unsupported architecture"
/// error messages.
pub fn supported_tags() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = REGISTRY.keys().copied().collect();
    tags.sort_unstable();
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_decoder_is_registered() {
        let info = lookup("generic-decoder").expect("generic-decoder must be registered");
        assert_eq!(info.hidden_dim_attr, "hidden_dim");
    }

    #[test]
    fn unknown_tag_is_not_supported() {
        assert!(!is_supported("gpt-5000"));
        assert!(lookup("gpt-5000").is_none());
    }

    #[test]
    fn supported_tags_are_sorted_and_nonempty() {
        let tags = supported_tags();
        assert!(!tags.is_empty());
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        assert_eq!(tags, sorted);
    }
}
