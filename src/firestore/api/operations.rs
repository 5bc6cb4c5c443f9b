/// Options that configure the behaviour of `set_doc` writes.
///
/// Unset fields fall back to whatever defaults the caller layers underneath
/// through [`SetOptions::with_defaults`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// When `Some(true)`, `set_doc` deep-merges the provided data into the
    /// existing document instead of replacing it.
    pub merge: Option<bool>,
}

impl SetOptions {
    /// Builds set options that merge every field present in the provided data.
    pub fn merge_all() -> Self {
        Self { merge: Some(true) }
    }

    /// Builds set options that replace the whole document.
    pub fn overwrite() -> Self {
        Self { merge: Some(false) }
    }

    /// Indicates whether the write should behave like a merge.
    pub fn is_merge(&self) -> bool {
        self.merge.unwrap_or(false)
    }

    /// Layers `self` over `defaults`; fields set on `self` win.
    pub fn with_defaults(&self, defaults: &SetOptions) -> SetOptions {
        SetOptions {
            merge: self.merge.or(defaults.merge),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_call_options_win_over_defaults() {
        let defaults = SetOptions::merge_all();
        assert!(SetOptions::default().with_defaults(&defaults).is_merge());
        assert!(!SetOptions::overwrite().with_defaults(&defaults).is_merge());
        assert!(!SetOptions::default().is_merge());
    }
}
