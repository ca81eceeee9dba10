//! Credit sales (EEVC): fixed-width mother files.
//!
//! A `004` record opens an establishment block and every following record
//! belongs to it until `026` closes the block. Reconciliation sums the net
//! value of the sales-summary records {006, 010, 016, 022}; the remaining
//! block records travel with the child without contributing. The per-PV
//! `026` trailer is regenerated and the mother `028` is appended verbatim
//! for downstream reference.

use crate::bucket::Buckets;
use crate::error::EngineError;
use crate::reader::{rewrite_fixed_range, Record};
use crate::reconcile::{compare, Verdict};
use crate::writer::{child_name, ChildDocument};
use crate::{reader, KindRun, MotherMeta, SplitOptions};
use rede_splitter_common::layout::{field, HEADER_PV_RANGE, EEVC_TRAILER_WIDTH};
use rede_splitter_common::money::fmt_cents;
use rede_splitter_common::{ddmmaa_from_ddmmaaaa, normalize_pv, short_nsa, FileKind};
use std::collections::HashMap;
use tracing::warn;

/// Sales-summary types whose net value feeds the reconciliation sum.
const RV_TYPES: [&str; 4] = ["006", "010", "016", "022"];
/// Block records carried into the child without summing.
const CARRIED_TYPES: [&str; 5] = ["008", "012", "014", "018", "024"];

pub(crate) fn process(
    records: &[Record],
    source: &str,
    opts: &SplitOptions,
) -> Result<KindRun, EngineError> {
    let header = &records[0];
    let meta = extract_meta(header, source);

    let mut buckets = Buckets::new();
    let mut type_counts: HashMap<String, u64> = HashMap::new();
    let mut current_pv: Option<String> = None;
    let mut mother_trailer: Option<&Record> = None;

    for rec in &records[1..] {
        let t = rec.rtype.as_str();
        *type_counts.entry(t.to_string()).or_default() += 1;

        if t == "004" {
            let spec = field(FileKind::Eevc, "004", "pv").expect("registry entry");
            let pv = match rec.text(spec) {
                Ok(pv) if pv.chars().any(|c| c.is_ascii_digit()) => normalize_pv(&pv),
                _ => {
                    warn!(line = rec.number, "004 record without PV, skipped");
                    continue;
                }
            };
            buckets.bucket(&pv).push(t, &rec.raw, true);
            current_pv = Some(pv);
        } else if RV_TYPES.contains(&t) {
            let Some(pv) = current_pv.as_deref() else {
                warn!(line = rec.number, rtype = t, "sales summary outside a PV block, skipped");
                continue;
            };
            let spec = field(FileKind::Eevc, t, "valor_liquido").expect("registry entry");
            match rec.money(spec) {
                Ok(value) => {
                    let b = buckets.bucket(pv);
                    b.totals.liquido += value;
                    b.totals.qtd_rv += 1;
                    b.push(t, &rec.raw, true);
                }
                Err(err) => warn!(line = rec.number, rtype = t, %err, "record skipped"),
            }
        } else if t == "026" {
            // closes the current block; the child gets a regenerated one
            current_pv = None;
        } else if t == "028" {
            mother_trailer = Some(rec);
        } else if CARRIED_TYPES.contains(&t) {
            match current_pv.as_deref() {
                Some(pv) => buckets.bucket(pv).push(t, &rec.raw, false),
                None => warn!(line = rec.number, rtype = t, "record outside a PV block, skipped"),
            }
        } else {
            // Unreferenced types inside a block are layout drift worth
            // logging; outside a block they are acquirer sentinel lines.
            if current_pv.is_some() {
                warn!(line = rec.number, rtype = t, "unreferenced record type inside PV block, skipped");
            }
        }
    }

    let trailer = mother_trailer.ok_or(EngineError::MissingMotherTrailer)?;
    let spec = field(FileKind::Eevc, "028", "total_liquido").expect("registry entry");
    let expected = trailer.money(spec)?;
    let computed: i64 = buckets.iter().map(|b| b.totals.liquido).sum();
    let verdict = Verdict::from_dimensions(vec![compare(
        "liquido",
        expected,
        computed,
        opts.tolerance_cents,
    )]);

    let mut docs = Vec::with_capacity(buckets.len());
    for b in buckets.iter() {
        if !b.movement && opts.skip_empty_buckets {
            continue;
        }
        let mut lines = Vec::with_capacity(b.records.len() + 3);
        lines.push(rewrite_fixed_range(
            &header.raw,
            HEADER_PV_RANGE.0,
            HEADER_PV_RANGE.1,
            &b.pv,
            header.number,
            &header.rtype,
        )?);
        lines.extend(b.records.iter().cloned());
        lines.push(synthesize_026(&b.pv, b.totals.liquido));
        lines.push(trailer.raw.clone());

        docs.push(ChildDocument {
            pv: b.pv.clone(),
            name: child_name(&b.pv, &meta.date, &meta.nsa, "EEVC"),
            lines,
        });
    }

    Ok(KindRun {
        meta,
        buckets,
        docs,
        verdict,
        type_counts,
    })
}

fn extract_meta(header: &Record, source: &str) -> MotherMeta {
    let date = field(FileKind::Eevc, "002", "data")
        .and_then(|spec| header.text(spec).ok())
        .and_then(|s| ddmmaa_from_ddmmaaaa(&s))
        .or_else(|| reader::date_hint_from_name(source))
        .unwrap_or_else(|| "000000".to_string());
    let nsa = field(FileKind::Eevc, "002", "sequencia")
        .and_then(|spec| header.text(spec).ok())
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(|s| short_nsa(&s))
        .or_else(|| reader::nsa_hint_from_name(source))
        .unwrap_or_else(|| "000".to_string());
    let matrix = field(FileKind::Eevc, "002", "pv_grupo")
        .and_then(|spec| header.text(spec).ok())
        .unwrap_or_default();
    MotherMeta {
        kind: FileKind::Eevc,
        source: source.to_string(),
        date,
        nsa,
        matrix,
    }
}

/// Regenerated per-establishment trailer: type code, establishment and
/// twelve zeroed money fields, with the net total written over its fixed
/// position.
fn synthesize_026(pv: &str, liquido: i64) -> Vec<u8> {
    let mut line = vec![b'0'; EEVC_TRAILER_WIDTH];
    line[0..3].copy_from_slice(b"026");
    line[3..12].copy_from_slice(&pv.as_bytes()[..9]);
    let spec = field(FileKind::Eevc, "026", "total_liquido").expect("registry entry");
    let total = fmt_cents(liquido, spec.end - spec.start);
    line[spec.start..spec.end].copy_from_slice(total.as_bytes());
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::records_from_bytes;
    use crate::reconcile::VerdictStatus;
    use rede_splitter_common::money::to_cents;

    fn fixed_line(prefix: &str, width: usize) -> String {
        let mut s = prefix.to_string();
        while s.len() < width {
            s.push(' ');
        }
        s
    }

    fn rv_line(code: &str, cents: i64) -> String {
        // net value lives at [114,129)
        let mut s = fixed_line(code, 114);
        s.push_str(&fmt_cents(cents, 15));
        s
    }

    fn header_line() -> String {
        // date at [3,11), NSA at [75,81), matrix at [81,90)
        let mut s = String::from("00205102025");
        while s.len() < 75 {
            s.push(' ');
        }
        s.push_str("000041");
        s.push_str("020770670");
        s.push_str(" DIARIO");
        s
    }

    fn trailer_028(cents: i64) -> String {
        let mut s = fixed_line("028", 133);
        s.push_str(&fmt_cents(cents, 15));
        s
    }

    fn mother(total: i64) -> Vec<u8> {
        let lines = vec![
            header_line(),
            "004020770677 RESTAURANTE".to_string(),
            rv_line("006", 12345),
            rv_line("010", 23456),
            fixed_line("008ajuste qualquer", 60),
            fixed_line("012outra linha", 60),
            fixed_line("014mais uma", 60),
            fixed_line("026", 30),
            trailer_028(total),
        ];
        format!("{}\n", lines.join("\n")).into_bytes()
    }

    fn run(content: &[u8]) -> KindRun {
        let records = records_from_bytes(content, FileKind::Eevc).unwrap();
        process(&records, "VENTUNO_EEVC.251005.041", &SplitOptions::new("unused")).unwrap()
    }

    #[test]
    fn sales_summaries_reconcile_against_the_mother_trailer() {
        let run = run(&mother(35801));
        assert_eq!(run.verdict.status, VerdictStatus::Ok);
        let b = run.buckets.get("020770677").unwrap();
        assert_eq!(b.totals.liquido, 35801);
        assert_eq!(b.totals.qtd_rv, 2);
        // carried records do not contribute
        assert_eq!(b.type_counts.get("008"), Some(&1));
    }

    #[test]
    fn child_carries_block_then_synthesized_trailer_then_mother_028() {
        let run = run(&mother(35801));
        assert_eq!(run.docs.len(), 1);
        let doc = &run.docs[0];
        assert_eq!(doc.name, "020770677_051025_041_EEVC.txt");
        // header + 6 block records + 026 + 028
        assert_eq!(doc.lines.len(), 9);

        let header = &doc.lines[0];
        assert_eq!(&header[81..90], b"020770677");
        assert_eq!(&header[75..81], b"000041");
        assert_eq!(&header[0..11], b"00205102025");

        let synth = &doc.lines[7];
        assert_eq!(synth.len(), EEVC_TRAILER_WIDTH);
        assert_eq!(&synth[0..3], b"026");
        assert_eq!(&synth[3..12], b"020770677");
        assert_eq!(to_cents(&synth[124..138]), 35801);

        let mother_trailer = &doc.lines[8];
        assert_eq!(&mother_trailer[0..3], b"028");
        assert_eq!(to_cents(&mother_trailer[133..148]), 35801);
    }

    #[test]
    fn net_value_is_not_scaled() {
        // the [114,129) range already yields cents
        let run = run(&mother(35801));
        let b = run.buckets.get("020770677").unwrap();
        assert_eq!(b.totals.liquido, 12345 + 23456);
    }

    #[test]
    fn divergent_trailer_still_produces_children() {
        let run = run(&mother(99999));
        assert_eq!(run.verdict.status, VerdictStatus::Divergent);
        assert_eq!(run.docs.len(), 1);
        let dim = &run.verdict.dimensions[0];
        assert_eq!(dim.expected, 99999);
        assert_eq!(dim.computed, 35801);
    }

    #[test]
    fn missing_028_aborts() {
        let lines = vec![
            header_line(),
            "004020770677 RESTAURANTE".to_string(),
            rv_line("006", 100),
        ];
        let records =
            records_from_bytes(format!("{}\n", lines.join("\n")).as_bytes(), FileKind::Eevc)
                .unwrap();
        let err = process(&records, "f.EEVC.001", &SplitOptions::new("unused")).unwrap_err();
        assert!(matches!(err, EngineError::MissingMotherTrailer));
    }

    #[test]
    fn two_blocks_split_into_two_children() {
        let lines = vec![
            header_line(),
            "004020770677 LOJA UM".to_string(),
            rv_line("006", 100),
            fixed_line("026", 30),
            "004020770678 LOJA DOIS".to_string(),
            rv_line("010", 200),
            fixed_line("026", 30),
            trailer_028(300),
        ];
        let records =
            records_from_bytes(format!("{}\n", lines.join("\n")).as_bytes(), FileKind::Eevc)
                .unwrap();
        let run = process(&records, "x.EEVC.041", &SplitOptions::new("unused")).unwrap();
        assert_eq!(run.verdict.status, VerdictStatus::Ok);
        assert_eq!(run.docs.len(), 2);
        assert_eq!(run.buckets.get("020770677").unwrap().totals.liquido, 100);
        assert_eq!(run.buckets.get("020770678").unwrap().totals.liquido, 200);
    }
}
