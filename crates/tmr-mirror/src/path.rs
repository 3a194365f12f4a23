use std::fmt;

/// Location of a node in the mirror: the local names from the root down.
///
/// Displays as `/a/b/` (the root is `/`). Ordering is component-wise, so a
/// path sorts directly before all of its descendants.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MirrorPath(Vec<String>);

impl MirrorPath {
    /// The root path `/`.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(components.into_iter().map(Into::into).collect())
    }

    /// Parse the display form (`/a/b/`; leading and trailing slashes are
    /// optional).
    pub fn parse(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// This path extended by one name.
    pub fn child(&self, name: &str) -> Self {
        let mut components = self.0.clone();
        components.push(name.to_string());
        Self(components)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    /// The last component; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// `true` if `self` equals `ancestor` or lies beneath it.
    pub fn starts_with(&self, ancestor: &MirrorPath) -> bool {
        self.0.starts_with(&ancestor.0)
    }
}

impl fmt::Display for MirrorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for component in &self.0 {
            write!(f, "{component}/")?;
        }
        Ok(())
    }
}

impl fmt::Debug for MirrorPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MirrorPath({self})")
    }
}

/// Sort `paths` and drop every path that has an ancestor (or a duplicate)
/// in the list. Processing the survivors recursively covers everything
/// that was dropped.
pub fn prune_subpaths(paths: &mut Vec<MirrorPath>) {
    paths.sort();
    let mut kept: Vec<MirrorPath> = Vec::with_capacity(paths.len());
    for path in paths.drain(..) {
        match kept.last() {
            Some(last) if path.starts_with(last) => {}
            _ => kept.push(path),
        }
    }
    *paths = kept;
}
