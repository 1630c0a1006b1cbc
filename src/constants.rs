//! Constants shared by the decoder, the transforms and the store writer.
//!
//! Attribute names, sentinels and the footer label layout are read by
//! downstream tools, so they must not change.

// =============================================================================
// Source File Format
// =============================================================================

/// A line consisting solely of this marker ends the data section
pub const TERMINATOR: &str = "-1";

/// Name of the release marker file at the database root
pub const VERSION_FILE_NAME: &str = "VERSION";

// =============================================================================
// Store Attributes
// =============================================================================

pub mod attributes {
    /// Physical unit of a dataset
    pub const UNIT: &str = "unit";

    /// Accumulated commentary of every source that wrote into a group
    pub const FOOTER: &str = "footer";

    /// Data release the group was first written from
    pub const VERSION: &str = "chianti_version";

    /// Element symbol stamped on ion groups
    pub const ELEMENT: &str = "element";

    /// Ion name stamped on ion groups
    pub const ION: &str = "ion";

    /// Value of the unit attribute for columns that carry no unit
    pub const NO_UNIT: &str = "SKIP";
}

/// Underline placed between a source label and its footer text
pub const FOOTER_RULE: &str = "------------------";

/// Labeled footer block appended to shared groups, one per contributing source
pub fn footer_block(label: &str, footer: &str) -> String {
    format!("{label}\n{FOOTER_RULE}\n{footer}\n        ")
}

// =============================================================================
// Well-known Column Names
// =============================================================================

pub mod columns {
    pub const ATOMIC_NUMBER: &str = "atomic number";
    pub const ION: &str = "ion";
    pub const ELEMENT: &str = "element";
    pub const ABUNDANCE: &str = "abundance relative to H";
    pub const TEMPERATURE: &str = "temperature";
    pub const IONIZATION_FRACTION: &str = "ionization fraction";
    pub const IONIZATION_POTENTIAL: &str = "ionization potential";
}

// =============================================================================
// Table Metadata Keys
// =============================================================================

pub mod meta {
    pub const ELEMENT: &str = "element";
    pub const ION: &str = "ion";
    pub const SOURCE: &str = "source";
}

// =============================================================================
// Periodic Table
// =============================================================================

/// Lowercase element symbols indexed by atomic number minus one
pub const ELEMENT_SYMBOLS: [&str; 118] = [
    "h", "he", "li", "be", "b", "c", "n", "o", "f", "ne", // 1-10
    "na", "mg", "al", "si", "p", "s", "cl", "ar", "k", "ca", // 11-20
    "sc", "ti", "v", "cr", "mn", "fe", "co", "ni", "cu", "zn", // 21-30
    "ga", "ge", "as", "se", "br", "kr", "rb", "sr", "y", "zr", // 31-40
    "nb", "mo", "tc", "ru", "rh", "pd", "ag", "cd", "in", "sn", // 41-50
    "sb", "te", "i", "xe", "cs", "ba", "la", "ce", "pr", "nd", // 51-60
    "pm", "sm", "eu", "gd", "tb", "dy", "ho", "er", "tm", "yb", // 61-70
    "lu", "hf", "ta", "w", "re", "os", "ir", "pt", "au", "hg", // 71-80
    "tl", "pb", "bi", "po", "at", "rn", "fr", "ra", "ac", "th", // 81-90
    "pa", "u", "np", "pu", "am", "cm", "bk", "cf", "es", "fm", // 91-100
    "md", "no", "lr", "rf", "db", "sg", "bh", "hs", "mt", "ds", // 101-110
    "rg", "cn", "nh", "fl", "mc", "lv", "ts", "og", // 111-118
];

/// Lowercase symbol for an atomic number, if it names a known element
pub fn element_symbol(atomic_number: i64) -> Option<&'static str> {
    usize::try_from(atomic_number)
        .ok()
        .filter(|&z| z >= 1)
        .and_then(|z| ELEMENT_SYMBOLS.get(z - 1).copied())
}
