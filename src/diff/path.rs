use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// A declared field of the object addressed so far.
    Field(String),
    /// An entry of the map field addressed so far.
    Key(String),
    /// Descent into a nested object. Segments after it address that object.
    Node(Identity),
}

/// Address of a field or container from the diff root.
///
/// Paths compose: an operation produced while recursing into a nested object
/// carries the parent's path, a [`Segment::Node`] for the child and then the
/// child's own field segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    fn with(&self, segment: Segment) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment);
        Self(segments)
    }

    pub fn field(&self, name: impl Into<String>) -> Self {
        self.with(Segment::Field(name.into()))
    }

    pub fn key(&self, key: impl Into<String>) -> Self {
        self.with(Segment::Key(key.into()))
    }

    pub fn node(&self, identity: Identity) -> Self {
        self.with(Segment::Node(identity))
    }

    /// Chain of nested objects crossed by this path, outermost first.
    pub fn nodes(&self) -> impl Iterator<Item = Identity> + '_ {
        self.0.iter().filter_map(|s| match s {
            Segment::Node(id) => Some(*id),
            _ => None,
        })
    }

    /// Segments after the last [`Segment::Node`]: the address within the
    /// innermost object.
    pub fn local(&self) -> &[Segment] {
        let start = self
            .0
            .iter()
            .rposition(|s| matches!(s, Segment::Node(_)))
            .map_or(0, |i| i + 1);
        &self.0[start..]
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("/")?;
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            match segment {
                Segment::Field(name) => write!(f, "{name}")?,
                Segment::Key(key) => write!(f, "[{key}]")?,
                Segment::Node(id) => write!(f, "<{id}>")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_segments_follow_last_node() {
        let child = Identity::new(4, 0);
        let path = Path::root().field("content").node(child).field("items");
        assert_eq!(path.local(), &[Segment::Field("items".into())]);
        assert_eq!(path.nodes().collect::<Vec<_>>(), vec![child]);
        assert_eq!(path.to_string(), "/content/<4@0>/items");
    }

    #[test]
    fn test_root_path() {
        let path = Path::root().field("y");
        assert_eq!(path.local().len(), 1);
        assert_eq!(path.nodes().count(), 0);
        assert!(Path::root().is_root());
    }
}
