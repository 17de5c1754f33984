//! Capped name-interning tables for render layers and shader defines.

use parking_lot::RwLock;

/// Maps names to stable byte indices.
///
/// Reads are lock-free in spirit (a shared `RwLock` read); registration of a
/// new name takes the write lock. Callers must not register names
/// concurrently with program compilation: registration is an
/// initialisation-time (or externally synchronised) operation.
pub(crate) struct NameTable {
    what: &'static str,
    cap: usize,
    names: RwLock<Vec<String>>,
}

impl NameTable {
    pub(crate) fn new(what: &'static str, cap: usize) -> Self {
        debug_assert!(cap <= 256, "indices are byte-sized");
        Self {
            what,
            cap,
            names: RwLock::new(Vec::new()),
        }
    }

    /// Index of `name`, registering it if unseen.
    ///
    /// A full table logs an error (and asserts in debug builds); the name is
    /// not registered and index 0 is returned.
    pub(crate) fn index_of(&self, name: &str) -> u8 {
        {
            let names = self.names.read();
            if let Some(idx) = names.iter().position(|n| n == name) {
                return idx as u8;
            }
        }
        let mut names = self.names.write();
        // Racing registrations of the same name both end up here.
        if let Some(idx) = names.iter().position(|n| n == name) {
            return idx as u8;
        }
        if names.len() >= self.cap {
            log::error!("too many {}: {name:?} does not fit (cap {})", self.what, self.cap);
            debug_assert!(false, "too many {}", self.what);
            return 0;
        }
        names.push(name.to_owned());
        (names.len() - 1) as u8
    }

    pub(crate) fn name(&self, idx: u8) -> Option<String> {
        self.names.read().get(idx as usize).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.names.read().len()
    }
}
