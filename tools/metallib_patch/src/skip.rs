use metallib_ir::SkipEntry;

/// Modules known to break the decompile/recompile round trip, by container path suffix.
const KNOWN_BROKEN: &[(&str, &[&str])] = &[
    (
        "/System/Library/PrivateFrameworks/VectorKit.framework/Versions/A/Resources/default.metallib",
        &["Icon::shadow_vertex"],
    ),
    (
        "/System/Library/PrivateFrameworks/VFX.framework/Versions/A/Resources/default.metallib",
        &["particle_quad_frag"],
    ),
];

/// Modules that are passed over instead of patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipList {
    entries: Vec<SkipEntry>,
}

impl SkipList {
    /// An empty list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in known-broken modules.
    pub fn known_broken() -> Self {
        Self {
            entries: KNOWN_BROKEN
                .iter()
                .map(|(container, modules)| SkipEntry {
                    container: (*container).to_owned(),
                    modules: modules.iter().map(|m| (*m).to_owned()).collect(),
                })
                .collect(),
        }
    }

    /// Adds `entries` to the list.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = SkipEntry>) {
        self.entries.extend(entries);
    }

    /// Returns `true` if `module` of the container at `container_path` should be skipped.
    ///
    /// A container matches an entry when its path ends with the entry's path. Leading `/` on the
    /// entry is ignored, so system paths also match a copy of the tree mounted elsewhere.
    pub fn contains(&self, container_path: &str, module: &str) -> bool {
        self.entries.iter().any(|entry| {
            let suffix = entry.container.trim_start_matches('/');
            container_path.ends_with(suffix) && entry.modules.iter().any(|m| m == module)
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
