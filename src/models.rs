//! Source descriptors and ion identifiers.
//!
//! A source descriptor is the logical key of one input file: the category
//! it belongs to, its file name, and for per-ion files the ion it describes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::constants::element_symbol;
use crate::error::{Error, Result};

static ION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]{1,2})_([1-9][0-9]*)(d?)$").expect("valid ion name regex"));

/// An ionization stage of an element, e.g. `fe_12` for Fe XII.
///
/// Dielectronic ions (`fe_12d`) carry the autoionizing levels of the same
/// stage in separate files and get their own group in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ion {
    pub element: String,
    pub stage: u32,
    #[serde(default)]
    pub dielectronic: bool,
}

impl Ion {
    pub fn new(element: impl Into<String>, stage: u32) -> Self {
        Self {
            element: element.into().to_lowercase(),
            stage,
            dielectronic: false,
        }
    }

    /// The dielectronic counterpart of `<element>_<stage>`
    pub fn dielectronic(element: impl Into<String>, stage: u32) -> Self {
        Self {
            dielectronic: true,
            ..Self::new(element, stage)
        }
    }

    /// Build the ion from an atomic number using the periodic table
    pub fn from_atomic_number(atomic_number: i64, stage: u32) -> Option<Self> {
        element_symbol(atomic_number).map(|symbol| Self::new(symbol, stage))
    }

    /// Parse names such as `fe_12` or `fe_12d`
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        let captures = ION_NAME
            .captures(&name)
            .ok_or_else(|| Error::Configuration {
                message: format!("'{name}' is not an ion name like fe_12"),
            })?;
        let stage = captures[2].parse::<u32>().map_err(|e| Error::Configuration {
            message: format!("invalid ionization stage in '{name}': {e}"),
        })?;
        Ok(Self {
            dielectronic: !captures[3].is_empty(),
            ..Self::new(&captures[1], stage)
        })
    }

    /// `<element>_<stage>[d]`, the name used for ion groups and per-ion files
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Ion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.element, self.stage)?;
        if self.dielectronic {
            f.write_str("d")?;
        }
        Ok(())
    }
}

/// Logical key of one input file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    category: String,
    filename: String,
    ion: Option<Ion>,
}

impl SourceDescriptor {
    /// Source not attached to an ion, such as an abundance or ioneq file
    pub fn new(category: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            filename: filename.into(),
            ion: None,
        }
    }

    /// Per-ion source named `<ion>.<category>`, e.g. `fe_12.elvlc`
    pub fn for_ion(ion: Ion, category: impl Into<String>) -> Self {
        let category = category.into();
        Self {
            filename: format!("{}.{}", ion.name(), category),
            category,
            ion: Some(ion),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn ion(&self) -> Option<&Ion> {
        self.ion.as_ref()
    }

    /// File name without directory or extension; names datasets in the store
    pub fn stem(&self) -> &str {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.filename)
    }

    /// Identifier used in logs and error reports
    pub fn id(&self) -> String {
        match &self.ion {
            Some(ion) => format!("{}/{}/{}", ion.element, ion.name(), self.filename),
            None => format!("{}/{}", self.category, self.filename),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ion_parse() {
        let ion = Ion::parse("fe_12").unwrap();
        assert_eq!(ion, Ion::new("fe", 12));
        assert_eq!(ion.name(), "fe_12");
        assert!(!ion.dielectronic);
        assert!(Ion::parse("fe12").is_err());
        assert!(Ion::parse("fe_0").is_err());
        assert!(Ion::parse("iron_1").is_err());
    }

    #[test]
    fn test_ion_from_atomic_number() {
        assert_eq!(Ion::from_atomic_number(26, 9), Some(Ion::new("fe", 9)));
        assert_eq!(Ion::from_atomic_number(0, 1), None);
    }

    #[test]
    fn test_source_descriptor_stem_and_id() {
        let source = SourceDescriptor::new("abundance", "sun_photospheric_2009_asplund.abund");
        assert_eq!(source.stem(), "sun_photospheric_2009_asplund");
        assert_eq!(source.id(), "abundance/sun_photospheric_2009_asplund.abund");
        assert!(source.ion().is_none());

        let source = SourceDescriptor::for_ion(Ion::new("fe", 12), "elvlc");
        assert_eq!(source.filename(), "fe_12.elvlc");
        assert_eq!(source.stem(), "fe_12");
        assert_eq!(source.id(), "fe/fe_12/fe_12.elvlc");
    }

    #[test]
    fn test_dielectronic_ion_keeps_suffix() {
        let ion = Ion::parse("Fe_12d").unwrap();
        assert_eq!(ion, Ion::dielectronic("fe", 12));
        assert_ne!(ion, Ion::new("fe", 12));
        assert_eq!(ion.name(), "fe_12d");
        assert_eq!(ion.to_string(), "fe_12d");

        let source = SourceDescriptor::for_ion(ion, "elvlc");
        assert_eq!(source.filename(), "fe_12d.elvlc");
        assert_eq!(source.stem(), "fe_12d");
        assert_eq!(source.id(), "fe/fe_12d/fe_12d.elvlc");
    }
}
