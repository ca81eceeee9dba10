use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Settlement file family produced by the acquirer. Chosen once at entry
/// and carried through every component instead of re-inspecting file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileKind {
    /// Credit sales, fixed-width records.
    Eevc,
    /// Debit sales, comma-delimited records.
    Eevd,
    /// Financial extract, fixed-width records in two sub-layouts.
    Eefi,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Eevc => "EEVC",
            FileKind::Eevd => "EEVD",
            FileKind::Eefi => "EEFI",
        }
    }

    /// Detects the kind from a mother-file name by substring, the way the
    /// acquirer names its deliveries.
    pub fn from_filename(name: &str) -> Option<Self> {
        let upper = name.to_uppercase();
        if upper.contains("EEVC") {
            Some(FileKind::Eevc)
        } else if upper.contains("EEVD") {
            Some(FileKind::Eevd)
        } else if upper.contains("EEFI") {
            Some(FileKind::Eefi)
        } else {
            None
        }
    }

    /// Record type code of the mother-file header for this kind.
    pub fn header_type(&self) -> &'static str {
        match self {
            FileKind::Eevc => "002",
            FileKind::Eevd => "00",
            FileKind::Eefi => "030",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EEVC" => Ok(FileKind::Eevc),
            "EEVD" => Ok(FileKind::Eevd),
            "EEFI" => Ok(FileKind::Eefi),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown file kind: {0}")]
pub struct UnknownKind(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_filename() {
        assert_eq!(
            FileKind::from_filename("VENTUNO_EEVC.251005.041"),
            Some(FileKind::Eevc)
        );
        assert_eq!(
            FileKind::from_filename("rede_eevd_20251007.txt"),
            Some(FileKind::Eevd)
        );
        assert_eq!(FileKind::from_filename("extrato.txt"), None);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [FileKind::Eevc, FileKind::Eevd, FileKind::Eefi] {
            assert_eq!(kind.as_str().parse::<FileKind>().unwrap(), kind);
        }
    }
}
