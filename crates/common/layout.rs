//! Frozen positional map of the acquirer record layouts.
//!
//! Fixed-width kinds (EEVC, EEFI) declare byte ranges `[start, end)` on the
//! raw line. The delimited kind (EEVD) declares comma-field indexes in
//! `start` (with `end = start + 1`). The table is immutable and shared by
//! every worker.

use crate::FileKind;
use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text, kept verbatim.
    Alpha,
    /// Unsigned integer counter.
    Num,
    /// Monetary amount in integer cents, no separator, no sign.
    Money,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub start: usize,
    pub end: usize,
    pub kind: FieldKind,
}

const fn f(name: &'static str, start: usize, end: usize, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        start,
        end,
        kind,
    }
}

const fn csv(name: &'static str, index: usize, kind: FieldKind) -> FieldSpec {
    f(name, index, index + 1, kind)
}

use FieldKind::{Alpha, Money, Num};

// EEVC (credit) — fixed width.
const EEVC_002: &[FieldSpec] = &[
    f("data", 3, 11, Alpha),
    f("sequencia", 75, 81, Num),
    f("pv_grupo", 81, 90, Alpha),
];
const EEVC_004: &[FieldSpec] = &[f("pv", 3, 12, Alpha)];
const EEVC_RV: &[FieldSpec] = &[f("valor_liquido", 114, 129, Money)];
const EEVC_026: &[FieldSpec] = &[f("pv", 3, 12, Alpha), f("total_liquido", 124, 138, Money)];
const EEVC_028: &[FieldSpec] = &[f("total_liquido", 133, 148, Money)];

// EEFI (financial extract) — fixed width.
const EEFI_030: &[FieldSpec] = &[
    f("data", 3, 11, Alpha),
    f("sequencia", 75, 81, Num),
    f("pv_grupo", 81, 90, Alpha),
];
const EEFI_032: &[FieldSpec] = &[f("pv", 3, 12, Alpha)];
const EEFI_034: &[FieldSpec] = &[f("valor", 31, 46, Money)];
const EEFI_035: &[FieldSpec] = &[f("valor", 29, 44, Money)];
const EEFI_036: &[FieldSpec] = &[f("valor", 31, 46, Money)];
const EEFI_038: &[FieldSpec] = &[f("valor", 31, 46, Money)];
const EEFI_040: &[FieldSpec] = &[f("pv", 3, 12, Alpha), f("valor", 12, 27, Money)];
const EEFI_043: &[FieldSpec] = &[f("valor", 48, 63, Money)];
const EEFI_045: &[FieldSpec] = &[f("pv", 3, 12, Alpha), f("valor", 12, 27, Money)];
const EEFI_052: &[FieldSpec] = &[
    f("qtde_matrizes", 3, 7, Num),
    f("qtde_registros", 7, 13, Num),
    f("pv_solicitante", 13, 22, Alpha),
    f("qtd_cred_norm", 22, 26, Num),
    f("valor_rv", 26, 41, Money),
    f("qtd_ant", 41, 47, Num),
    f("valor_ant", 47, 62, Money),
    f("qtd_aj_cred", 62, 66, Num),
    f("valor_aj_cred", 66, 81, Money),
    f("qtd_aj_deb", 81, 85, Num),
    f("valor_aj_deb", 85, 100, Money),
];

// EEVD (debit) — comma delimited, `start` is the field index.
const EEVD_00: &[FieldSpec] = &[
    csv("matriz", 1, Alpha),
    csv("data_emissao", 2, Alpha),
    csv("nsa", 7, Num),
];
const EEVD_01: &[FieldSpec] = &[
    csv("pv", 1, Alpha),
    csv("rv", 4, Alpha),
    csv("qtd_cv", 5, Num),
    csv("bruto", 6, Money),
    csv("desconto", 7, Money),
    csv("liquido", 8, Money),
    csv("tipo_resumo", 9, Alpha),
];
const EEVD_PV1: &[FieldSpec] = &[csv("pv", 1, Alpha)];
const EEVD_PV2: &[FieldSpec] = &[csv("pv", 2, Alpha)];
const EEVD_PV5: &[FieldSpec] = &[csv("pv", 5, Alpha)];
const EEVD_20: &[FieldSpec] = &[csv("rv", 3, Alpha)];
const EEVD_04: &[FieldSpec] = &[
    csv("qtd_rv", 2, Num),
    csv("qtd_cv", 3, Num),
    csv("bruto", 4, Money),
    csv("desconto", 5, Money),
    csv("liquido", 6, Money),
    csv("bruto_pred", 7, Money),
    csv("desc_pred", 8, Money),
    csv("liq_pred", 9, Money),
];

lazy_static! {
    static ref REGISTRY: HashMap<(FileKind, &'static str), &'static [FieldSpec]> = {
        let mut m: HashMap<(FileKind, &'static str), &'static [FieldSpec]> = HashMap::new();

        m.insert((FileKind::Eevc, "002"), EEVC_002);
        m.insert((FileKind::Eevc, "004"), EEVC_004);
        for rv in ["006", "010", "016", "022"] {
            m.insert((FileKind::Eevc, rv), EEVC_RV);
        }
        m.insert((FileKind::Eevc, "026"), EEVC_026);
        m.insert((FileKind::Eevc, "028"), EEVC_028);

        m.insert((FileKind::Eefi, "030"), EEFI_030);
        m.insert((FileKind::Eefi, "032"), EEFI_032);
        m.insert((FileKind::Eefi, "034"), EEFI_034);
        m.insert((FileKind::Eefi, "035"), EEFI_035);
        m.insert((FileKind::Eefi, "036"), EEFI_036);
        m.insert((FileKind::Eefi, "038"), EEFI_038);
        m.insert((FileKind::Eefi, "040"), EEFI_040);
        m.insert((FileKind::Eefi, "043"), EEFI_043);
        m.insert((FileKind::Eefi, "045"), EEFI_045);
        m.insert((FileKind::Eefi, "052"), EEFI_052);

        m.insert((FileKind::Eevd, "00"), EEVD_00);
        m.insert((FileKind::Eevd, "01"), EEVD_01);
        for t in ["011", "012", "013", "05", "13", "08", "09"] {
            m.insert((FileKind::Eevd, t), EEVD_PV1);
        }
        for t in ["11", "18", "19"] {
            m.insert((FileKind::Eevd, t), EEVD_PV2);
        }
        m.insert((FileKind::Eevd, "17"), EEVD_PV5);
        m.insert((FileKind::Eevd, "20"), EEVD_20);
        m.insert((FileKind::Eevd, "04"), EEVD_04);

        m
    };
}

pub fn fields(kind: FileKind, record_type: &str) -> Option<&'static [FieldSpec]> {
    REGISTRY.get(&(kind, record_type)).copied()
}

pub fn field(kind: FileKind, record_type: &str, name: &str) -> Option<&'static FieldSpec> {
    fields(kind, record_type)?.iter().find(|f| f.name == name)
}

/// Byte range of the establishment field rewritten in child headers of the
/// fixed-width kinds.
pub const HEADER_PV_RANGE: (usize, usize) = (81, 90);

/// Canonical line width of a synthesized EEFI trailer.
pub const EEFI_TRAILER_WIDTH: usize = 400;

/// Width of a synthesized EEVC per-establishment trailer: type code,
/// establishment and twelve money fields.
pub const EEVC_TRAILER_WIDTH: usize = 3 + 9 + 12 * 15;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ranges_resolve() {
        let spec = field(FileKind::Eefi, "034", "valor").unwrap();
        assert_eq!((spec.start, spec.end), (31, 46));
        assert_eq!(spec.kind, FieldKind::Money);

        let spec = field(FileKind::Eevc, "028", "total_liquido").unwrap();
        assert_eq!((spec.start, spec.end), (133, 148));

        let spec = field(FileKind::Eevd, "01", "bruto").unwrap();
        assert_eq!(spec.start, 6);
    }

    #[test]
    fn rv_types_share_the_net_value_range() {
        for t in ["006", "010", "016", "022"] {
            let spec = field(FileKind::Eevc, t, "valor_liquido").unwrap();
            assert_eq!((spec.start, spec.end), (114, 129));
        }
    }

    #[test]
    fn unknown_types_are_absent() {
        assert!(fields(FileKind::Eevc, "999").is_none());
        assert!(field(FileKind::Eefi, "034", "pv").is_none());
    }
}
