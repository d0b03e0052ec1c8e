//! Structural addresses into the project tree

use std::fmt;

use serde::{Deserialize, Serialize};

/// Branch index that addresses a Multi's preprocess chain.
pub const PREPROCESS: i32 = -1;

/// Indices from the project root down to a node.
///
/// `[t]` is a track, `[t, d]` a device in that track's chain, `[t, d, c]`
/// branch `c` of that device and so on, alternating device and branch
/// indices below the track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path(pub Vec<i32>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn track(index: usize) -> Self {
        Self(vec![index as i32])
    }

    pub fn child(&self, index: i32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn parent(&self) -> Option<(Path, i32)> {
        let (last, rest) = self.0.split_last()?;
        Some((Path(rest.to_vec()), *last))
    }

    pub fn indices(&self) -> &[i32] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "/{}", parts.join("/"))
    }
}

impl From<Vec<i32>> for Path {
    fn from(indices: Vec<i32>) -> Self {
        Self(indices)
    }
}
