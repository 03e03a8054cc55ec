//! Module-label semantics.
//!
//! A module names one facet of a package's content. `binary` and `runtime`
//! are two historical spellings of the same binary payload and share a
//! lifecycle; every other label (`develop`, `doc`, ...) is an auxiliary facet
//! that is installed and removed independently.

/// The default module installed when a client does not name one.
pub const BINARY_MODULE: &str = "binary";

/// True for the two payload-equivalent labels `binary` and `runtime`.
pub fn module_is_binary(module: &str) -> bool {
    module == "binary" || module == "runtime"
}

/// True when `wanted` and `stored` refer to the same payload, treating
/// `binary` and `runtime` as interchangeable.
pub fn modules_equivalent(wanted: &str, stored: &str) -> bool {
    if wanted == stored {
        return true;
    }
    module_is_binary(wanted) && module_is_binary(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_and_runtime_are_payload_modules() {
        assert!(module_is_binary("binary"));
        assert!(module_is_binary("runtime"));
        assert!(!module_is_binary("develop"));
        assert!(!module_is_binary(""));
    }

    #[test]
    fn equivalence_bridges_binary_and_runtime() {
        assert!(modules_equivalent("binary", "runtime"));
        assert!(modules_equivalent("runtime", "binary"));
        assert!(modules_equivalent("develop", "develop"));
        assert!(!modules_equivalent("develop", "binary"));
        assert!(!modules_equivalent("binary", "develop"));
    }
}
