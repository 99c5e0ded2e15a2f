//! Resource limits enforced by [`crate::Reader`] and [`crate::Writer`]: a
//! small bag of `usize` ceilings passed in at construction time rather than
//! compiled in.

/// Ceilings on untrusted archive metadata. Defaults are generous enough for
/// any archive produced by a conforming writer while still bounding the
/// amount of memory a hostile one can force a reader to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Longest single PAX record body, in bytes, before `Reader` gives up.
    pub max_pax_record_len: usize,
    /// Most sparse-map entries a single header may declare.
    pub max_sparse_entries: usize,
    /// Longest entry name (after GNU long-name / PAX path resolution).
    pub max_entry_name_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_pax_record_len: 1 << 20,
            max_sparse_entries: 4096,
            max_entry_name_len: 1 << 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_generous() {
        let limits = Limits::default();
        assert!(limits.max_pax_record_len > 1000);
        assert!(limits.max_sparse_entries > 100);
    }
}
