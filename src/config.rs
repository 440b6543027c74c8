//! Runtime configuration for a [`crate::session::Session`].
//!
//! There is no file-based configuration: everything a caller can tune is a
//! field on this struct, passed alongside the binary path.

/// Tunables for staging and randomizing a binary.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Page size to stage the code segment in units of. Production use
    /// should leave this at the host's actual page size; tests may shrink
    /// it to keep synthetic fixtures small.
    pub page_size: u64,
    /// Seeds the process-wide RNG before any permutation is drawn.
    /// `None` leaves the RNG seeded from OS entropy (or whatever a prior
    /// `Config` already seeded it to).
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: crate::util::PAGESZ,
            seed: None,
        }
    }
}
