//! Slash-delimited addresses of groups in the store.

use std::fmt;

use crate::error::{Error, Result};
use crate::models::Ion;

/// Location of a group, derived deterministically from element, ion and category
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupPath {
    segments: Vec<String>,
}

impl GroupPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `a/b/c`; leading and trailing slashes are ignored
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        trimmed
            .split('/')
            .try_fold(Self::root(), |path, segment| path.join(segment))
    }

    pub fn join(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
            return Err(Error::store_layout(
                format!("{self}/{segment}"),
                format!("'{segment}' is not a valid group name"),
            ));
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// `<element>/<category>`, for data attached to an element as a whole
    pub fn for_element(element: &str, category: &str) -> Result<Self> {
        Self::root().join(element)?.join(category)
    }

    /// `<element>/<element>_<stage>`
    pub fn for_ion(ion: &Ion) -> Result<Self> {
        Self::root().join(&ion.element)?.join(&ion.name())
    }

    /// `<element>/<element>_<stage>/<category>`
    pub fn for_ion_category(ion: &Ion, category: &str) -> Result<Self> {
        Self::for_ion(ion)?.join(category)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, the group's own name
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path = GroupPath::parse("/fe/fe_12/ioneq/").unwrap();
        assert_eq!(path.segments(), ["fe", "fe_12", "ioneq"]);
        assert_eq!(path.to_string(), "/fe/fe_12/ioneq");
        assert_eq!(path.name(), Some("ioneq"));
        assert_eq!(path.parent().unwrap().to_string(), "/fe/fe_12");
        assert!(GroupPath::parse("").unwrap().is_root());
        assert_eq!(GroupPath::root().to_string(), "/");
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!(GroupPath::parse("fe//ioneq").is_err());
        assert!(GroupPath::root().join("").is_err());
        assert!(GroupPath::root().join("..").is_err());
        assert!(GroupPath::root().join("a/b").is_err());
    }

    #[test]
    fn test_paths_are_deterministic() {
        let ion = Ion::new("Fe", 12);
        assert_eq!(
            GroupPath::for_ion_category(&ion, "ip").unwrap(),
            GroupPath::parse("fe/fe_12/ip").unwrap()
        );
        assert_eq!(
            GroupPath::for_element("h", "abundance").unwrap().to_string(),
            "/h/abundance"
        );
    }
}
