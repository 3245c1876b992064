//! Signature issuing.

use std::collections::HashSet;

use crate::analysis::facts::{EntityMut, PyModule};

/// Hands out signatures, suffixing `#<n>` on collision.
///
/// Qualification-stack names are unique on their own; collisions come from
/// resolvers that answer the same qualified name for two definitions, or from
/// a class and a function sharing a name in one scope.
#[derive(Debug, Default)]
pub struct SignatureRegistry {
    issued: HashSet<String>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `candidate`, or the first free `candidate#<n>`.
    pub fn claim(&mut self, candidate: &str) -> String {
        if self.issued.insert(candidate.to_string()) {
            return candidate.to_string();
        }
        let mut n = 1;
        loop {
            let suffixed = format!("{}#{}", candidate, n);
            if self.issued.insert(suffixed.clone()) {
                return suffixed;
            }
            n += 1;
        }
    }

    /// Re-issue every class and callable signature in `module`.
    ///
    /// Returns the number of signatures that had to be renamed.
    pub fn apply(&mut self, module: &mut PyModule) -> usize {
        let mut renamed = 0;
        module.for_each_entity_mut(&mut |entity| {
            let signature = match entity {
                EntityMut::Class(class) => &mut class.signature,
                EntityMut::Callable(callable) => &mut callable.signature,
            };
            let claimed = self.claim(signature);
            if claimed != *signature {
                *signature = claimed;
                renamed += 1;
            }
        });
        renamed
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
