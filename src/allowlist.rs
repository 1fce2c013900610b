//! Static model allowlist loaded once at startup.
//!
//! The dispatcher filters every candidate model through this set before a
//! provider call is made. Membership is the only operation; there is no
//! runtime mutation path.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct ModelAllowlist {
    models: HashSet<String>,
}

impl ModelAllowlist {
    pub fn new(models: &[String]) -> Self {
        Self {
            models: models.iter().cloned().collect(),
        }
    }

    /// Pure membership check. No I/O, no side effects.
    pub fn is_allowed(&self, model_id: &str) -> bool {
        self.models.contains(model_id)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership() {
        let allowlist = ModelAllowlist::new(&["gpt-vision-a".to_string(), "llava".to_string()]);
        assert!(allowlist.is_allowed("gpt-vision-a"));
        assert!(allowlist.is_allowed("llava"));
        assert!(!allowlist.is_allowed("gpt-vision-b"));
        assert_eq!(allowlist.len(), 2);
    }

    #[test]
    fn test_empty_allowlist_permits_nothing() {
        let allowlist = ModelAllowlist::new(&[]);
        assert!(allowlist.is_empty());
        assert!(!allowlist.is_allowed("anything"));
    }
}
