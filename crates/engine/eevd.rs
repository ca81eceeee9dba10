//! Debit sales (EEVD): comma-delimited mother files.
//!
//! Per-PV totals come from the `01` summary records (plus `012`/`013` when
//! present). Cancellations (`011`) travel with the child but never count
//! towards money totals. Recharge records (`20`) have no direct PV and are
//! attached through the RV map built from previously seen `01` records.

use crate::bucket::{Buckets, Totals};
use crate::error::EngineError;
use crate::reader::{csv_fields, rewrite_csv_field, Record};
use crate::reconcile::{compare, Verdict};
use crate::writer::{child_name, ChildDocument};
use crate::{reader, KindRun, MotherMeta, SplitOptions};
use rede_splitter_common::layout::field;
use rede_splitter_common::money::{fmt_cents, fmt_num, to_cents};
use rede_splitter_common::{normalize_pv, short_nsa, FileKind};
use std::collections::HashMap;
use tracing::warn;

pub(crate) fn process(
    records: &[Record],
    source: &str,
    opts: &SplitOptions,
) -> Result<KindRun, EngineError> {
    let header = &records[0];
    let header_fields = csv_fields(&header.raw);
    let matrix = header_fields.get(1).cloned().unwrap_or_default();

    // The file trailer is the LAST type-04 record; some deliveries carry
    // intermediate 02/03/04 blocks in the middle.
    let trailer_idx = records
        .iter()
        .rposition(|r| r.rtype == "04")
        .ok_or(EngineError::MissingMotherTrailer)?;
    let trailer_fields = csv_fields(&records[trailer_idx].raw);
    let details = &records[1..trailer_idx];

    let meta = extract_meta(&header_fields, source, &matrix);

    let mut buckets = Buckets::new();
    let mut type_counts: HashMap<String, u64> = HashMap::new();
    let mut rv_to_pv: HashMap<String, String> = HashMap::new();

    for rec in details {
        let fields = csv_fields(&rec.raw);
        let t = rec.rtype.as_str();
        *type_counts.entry(t.to_string()).or_default() += 1;

        // Embedded per-PV/matrix/file trailers are regenerated per child.
        if matches!(t, "02" | "03" | "04") {
            continue;
        }

        // PV location comes from the per-type registry entry.
        let idx_of = |name: &str| field(FileKind::Eevd, t, name).map(|spec| spec.start);

        match t {
            "01" => {
                let Some(pv) = idx_of("pv").and_then(|i| field_pv(&fields, i)) else {
                    warn!(line = rec.number, "01 record without PV, skipped");
                    continue;
                };
                let rv_index = idx_of("rv").unwrap_or(4);
                if let Some(rv) = fields.get(rv_index).filter(|s| !s.is_empty()) {
                    rv_to_pv.insert(rv.clone(), pv.clone());
                }
                let b = buckets.bucket(&pv);
                b.totals.qtd_rv += 1;
                b.totals.qtd_cv += parse_count(fields.get(idx_of("qtd_cv").unwrap_or(5)));
                let bruto = money_at(&fields, idx_of("bruto").unwrap_or(6));
                let desconto = money_at(&fields, idx_of("desconto").unwrap_or(7));
                let liquido = money_at(&fields, idx_of("liquido").unwrap_or(8));
                b.totals.bruto += bruto;
                b.totals.desconto += desconto;
                b.totals.liquido += liquido;
                let flag_index = idx_of("tipo_resumo").unwrap_or(9);
                if fields.get(flag_index).map(|s| s.to_uppercase()) == Some("P".to_string()) {
                    b.totals.bruto_pred += bruto;
                    b.totals.desc_pred += desconto;
                    b.totals.liq_pred += liquido;
                }
                b.push(t, &rec.raw, true);
            }
            "012" | "013" => {
                let Some(pv) = idx_of("pv").and_then(|i| field_pv(&fields, i)) else {
                    warn!(line = rec.number, rtype = t, "record without PV, skipped");
                    continue;
                };
                // same money columns as the 01 summaries
                let b = buckets.bucket(&pv);
                b.totals.qtd_cv += 1;
                b.totals.bruto += money_at(&fields, 6);
                b.totals.desconto += money_at(&fields, 7);
                b.totals.liquido += money_at(&fields, 8);
                b.push(t, &rec.raw, true);
            }
            // Cancellation: carried in the child and counted, never summed.
            "011" => {
                let Some(pv) = idx_of("pv").and_then(|i| field_pv(&fields, i)) else {
                    warn!(line = rec.number, "011 record without PV, skipped");
                    continue;
                };
                let b = buckets.bucket(&pv);
                b.totals.qtd_cv += 1;
                b.push(t, &rec.raw, true);
            }
            "05" | "13" => {
                let Some(pv) = idx_of("pv").and_then(|i| field_pv(&fields, i)) else {
                    warn!(line = rec.number, rtype = t, "record without PV, skipped");
                    continue;
                };
                let b = buckets.bucket(&pv);
                b.totals.qtd_cv += 1;
                b.push(t, &rec.raw, true);
            }
            "20" => {
                // RV sits at the declared index, one to the left in older
                // deliveries.
                let rv_index = idx_of("rv").unwrap_or(3);
                let digits = |s: &&String| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
                let rv = fields
                    .get(rv_index)
                    .filter(digits)
                    .or_else(|| fields.get(rv_index.saturating_sub(1)).filter(digits))
                    .cloned();
                let pv = rv
                    .as_ref()
                    .and_then(|rv| rv_to_pv.get(rv).cloned())
                    .or_else(|| buckets.single_pv());
                match pv {
                    Some(pv) => {
                        let b = buckets.bucket(&pv);
                        b.totals.qtd_cv += 1;
                        b.push(t, &rec.raw, true);
                    }
                    None => {
                        warn!(line = rec.number, ?rv, "20 record with unknown RV, dropped");
                    }
                }
            }
            "08" | "09" | "11" | "17" | "18" | "19" => {
                let Some(index) = idx_of("pv") else {
                    continue;
                };
                route_only(&mut buckets, rec, &fields, index);
            }
            other => {
                warn!(line = rec.number, rtype = other, "unreferenced record type, skipped");
            }
        }
    }

    // No movement at all: emit a single marker child with a zeroed trailer.
    if buckets.is_empty() {
        let doc = sem_mov_document(header, &matrix, &meta);
        return Ok(KindRun {
            meta,
            buckets,
            docs: vec![doc],
            verdict: Verdict::ok_with_note("no movement: 0 = 0"),
            type_counts,
        });
    }

    let trailer_idx_of = |name: &str| {
        field(FileKind::Eevd, "04", name)
            .map(|spec| spec.start)
            .unwrap_or(usize::MAX)
    };
    let expected_bruto = money_at(&trailer_fields, trailer_idx_of("bruto"));
    let expected_desconto = money_at(&trailer_fields, trailer_idx_of("desconto"));
    let expected_liquido = money_at(&trailer_fields, trailer_idx_of("liquido"));
    let computed_bruto: i64 = buckets.iter().map(|b| b.totals.bruto).sum();
    let computed_desconto: i64 = buckets.iter().map(|b| b.totals.desconto).sum();
    let computed_liquido: i64 = buckets.iter().map(|b| b.totals.liquido).sum();

    let verdict = Verdict::from_dimensions(vec![
        compare("bruto", expected_bruto, computed_bruto, opts.tolerance_cents),
        compare(
            "desconto",
            expected_desconto,
            computed_desconto,
            opts.tolerance_cents,
        ),
        compare(
            "liquido",
            expected_liquido,
            computed_liquido,
            opts.tolerance_cents,
        ),
    ]);

    let mut docs = Vec::with_capacity(buckets.len());
    for b in buckets.iter() {
        if !b.movement && opts.skip_empty_buckets {
            continue;
        }
        let mut lines = Vec::with_capacity(b.records.len() + 4);
        lines.push(rewrite_csv_field(&header.raw, 1, &b.pv));
        lines.extend(b.records.iter().cloned());

        let t = &b.totals;
        lines.push(trailer_record("02", &matrix, t, 3, None).into_bytes());
        lines.push(trailer_record("03", &matrix, t, 3, None).into_bytes());
        // File trailer of the child: total records = header + details + 3.
        let total_records = (1 + b.records.len() + 3) as u64;
        lines.push(trailer_record("04", &matrix, t, 6, Some(total_records)).into_bytes());

        docs.push(ChildDocument {
            pv: b.pv.clone(),
            name: child_name(&b.pv, &meta.date, &meta.nsa, "EEVD"),
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

fn extract_meta(header_fields: &[String], source: &str, matrix: &str) -> MotherMeta {
    let date = header_fields
        .get(2)
        .and_then(|s| rede_splitter_common::ddmmaa_from_ddmmaaaa(s))
        .or_else(|| reader::date_hint_from_name(source))
        .unwrap_or_else(|| "000000".to_string());
    let nsa = header_fields
        .get(7)
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(|s| short_nsa(s))
        .or_else(|| reader::nsa_hint_from_name(source))
        .unwrap_or_else(|| "000".to_string());
    MotherMeta {
        kind: FileKind::Eevd,
        source: source.to_string(),
        date,
        nsa,
        matrix: matrix.to_string(),
    }
}

fn field_pv(fields: &[String], index: usize) -> Option<String> {
    fields
        .get(index)
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(|s| normalize_pv(s))
}

fn parse_count(field: Option<&String>) -> u64 {
    field
        .map(|s| s.chars().filter(|c| c.is_ascii_digit()).collect::<String>())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn money_at(fields: &[String], index: usize) -> i64 {
    fields.get(index).map(|s| to_cents(s.as_bytes())).unwrap_or(0)
}

/// Routes a record that neither sums nor counts; it only travels with its
/// establishment.
fn route_only(buckets: &mut Buckets, rec: &Record, fields: &[String], pv_index: usize) {
    match field_pv(fields, pv_index) {
        Some(pv) => buckets.bucket(&pv).push(&rec.rtype, &rec.raw, true),
        None => warn!(
            line = rec.number,
            rtype = %rec.rtype,
            "record without PV, skipped"
        ),
    }
}

/// Builds a 02/03/04 trailer line from per-PV totals. `02`/`03` use a
/// three-digit RV counter; the file-level `04` widens it to six and appends
/// the record count.
fn trailer_record(
    code: &str,
    matrix: &str,
    t: &Totals,
    rv_width: usize,
    total_records: Option<u64>,
) -> String {
    let mut fields = vec![
        code.to_string(),
        matrix.to_string(),
        fmt_num(t.qtd_rv, rv_width),
        fmt_num(t.qtd_cv, 6),
        fmt_cents(t.bruto, 15),
        fmt_cents(t.desconto, 15),
        fmt_cents(t.liquido, 15),
        fmt_cents(t.bruto_pred, 15),
        fmt_cents(t.desc_pred, 15),
        fmt_cents(t.liq_pred, 15),
    ];
    if let Some(total) = total_records {
        fields.push(fmt_num(total, 6));
    }
    fields.join(",")
}

/// Marker child for a delivery with no movement: the mother header plus a
/// zeroed file trailer counting only itself and the header.
fn sem_mov_document(header: &Record, matrix: &str, meta: &MotherMeta) -> ChildDocument {
    let trailer = trailer_record("04", matrix, &Totals::default(), 6, Some(2));
    ChildDocument {
        pv: String::new(),
        name: child_name("SEM_MOV", &meta.date, &meta.nsa, "EEVD"),
        lines: vec![header.raw.clone(), trailer.into_bytes()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::records_from_bytes;
    use crate::reconcile::VerdictStatus;

    fn run(content: &[u8]) -> KindRun {
        let records = records_from_bytes(content, FileKind::Eevd).unwrap();
        let opts = SplitOptions::new("unused");
        process(&records, "MATRIZ_EEVD.txt", &opts).unwrap()
    }

    fn mother_single_pv() -> Vec<u8> {
        // Two 01 rows summing bruto=30000 desc=100 liq=29900, one 011
        // cancellation (not summed), trailer mirrors the 01 sums.
        let lines: Vec<String> = vec![
            "00,020770677,07102025,08102025,1,2,3,000043,x".into(),
            "01,020770677,08102025,07102025,12345,2,20000,60,19940,D".into(),
            "01,020770677,08102025,07102025,12346,3,10000,40,9960,P".into(),
            "011,020770677,08102025,07102025,12345,1,500,0,500,D".into(),
            "04,020770677,000002,000005,30000,100,29900,10000,40,9960,000006".into(),
        ];
        format!("{}\n", lines.join("\n")).into_bytes()
    }

    #[test]
    fn single_pv_with_cancellation_reconciles() {
        let run = run(&mother_single_pv());
        assert_eq!(run.verdict.status, VerdictStatus::Ok);
        assert_eq!(run.docs.len(), 1);

        let b = run.buckets.get("020770677").unwrap();
        assert_eq!(b.totals.bruto, 30000);
        assert_eq!(b.totals.desconto, 100);
        assert_eq!(b.totals.liquido, 29900);
        // cancellation counted, not summed
        assert_eq!(b.totals.qtd_cv, 2 + 3 + 1);
        assert_eq!(b.totals.qtd_rv, 2);
        // pre-dated subtotal only from the P row
        assert_eq!(b.totals.liq_pred, 9960);
    }

    #[test]
    fn child_trailers_mirror_the_totals() {
        let run = run(&mother_single_pv());
        let doc = &run.docs[0];
        assert_eq!(doc.name, "020770677_071025_043_EEVD.txt");

        // header + 3 details + 02 + 03 + 04
        assert_eq!(doc.lines.len(), 7);
        let reg04 = String::from_utf8(doc.lines[6].clone()).unwrap();
        let fields: Vec<&str> = reg04.split(',').collect();
        assert_eq!(fields[0], "04");
        assert_eq!(fields[2], "000002");
        assert_eq!(fields[4], "000000000030000");
        assert_eq!(fields[5], "000000000000100");
        assert_eq!(fields[6], "000000000029900");
        // record count equals the child's own line count
        assert_eq!(fields[10], "000007");

        let reg02 = String::from_utf8(doc.lines[4].clone()).unwrap();
        assert!(reg02.starts_with("02,020770677,002,"));
    }

    #[test]
    fn detail_records_are_preserved_byte_for_byte() {
        let run = run(&mother_single_pv());
        let doc = &run.docs[0];
        assert_eq!(
            doc.lines[1],
            b"01,020770677,08102025,07102025,12345,2,20000,60,19940,D".to_vec()
        );
        assert_eq!(
            doc.lines[3],
            b"011,020770677,08102025,07102025,12345,1,500,0,500,D".to_vec()
        );
        // header rewritten in field 1, rest intact
        assert_eq!(
            doc.lines[0],
            b"00,020770677,07102025,08102025,1,2,3,000043,x".to_vec()
        );
    }

    #[test]
    fn divergent_bruto_is_reported_low() {
        let lines: Vec<String> = vec![
            "00,020770677,07102025,08102025,1,2,3,000043,x".into(),
            "01,020770677,08102025,07102025,12345,2,900,0,900,D".into(),
            "04,020770677,000001,000002,1000,0,900,0,0,0,000003".into(),
        ];
        let run = run(format!("{}\n", lines.join("\n")).as_bytes());
        assert_eq!(run.verdict.status, VerdictStatus::Divergent);
        let bruto = &run.verdict.dimensions[0];
        assert_eq!(bruto.name, "bruto");
        assert_eq!(bruto.detail, "divergence of 100 cents (low)");
        // children are still produced
        assert_eq!(run.docs.len(), 1);
    }

    #[test]
    fn recharge_records_follow_the_rv_map() {
        let lines: Vec<String> = vec![
            "00,020770677,07102025,08102025,1,2,3,000043,x".into(),
            "01,020770677,08102025,07102025,12345,1,100,0,100,D".into(),
            "01,020770678,08102025,07102025,22222,1,200,0,200,D".into(),
            "20,x,020770677,22222,whatever".into(),
            "04,020770677,000002,000002,300,0,300,0,0,0,000005".into(),
        ];
        let run = run(format!("{}\n", lines.join("\n")).as_bytes());
        let b = run.buckets.get("020770678").unwrap();
        assert_eq!(b.type_counts.get("20"), Some(&1));
        assert!(run.buckets.get("020770677").unwrap().type_counts.get("20").is_none());
    }

    #[test]
    fn orphan_recharge_with_multiple_pvs_is_dropped() {
        let lines: Vec<String> = vec![
            "00,020770677,07102025,08102025,1,2,3,000043,x".into(),
            "01,020770677,08102025,07102025,12345,1,100,0,100,D".into(),
            "01,020770678,08102025,07102025,22222,1,200,0,200,D".into(),
            "20,x,y,99999,unknown-rv".into(),
            "04,020770677,000002,000002,300,0,300,0,0,0,000005".into(),
        ];
        let run = run(format!("{}\n", lines.join("\n")).as_bytes());
        for b in run.buckets.iter() {
            assert!(b.type_counts.get("20").is_none());
        }
    }

    #[test]
    fn no_movement_emits_the_marker_child() {
        let lines: Vec<String> = vec![
            "00,020770677,07102025,08102025,1,2,3,000043,x".into(),
            "04,020770677,000000,000000,0,0,0,0,0,0,000002".into(),
        ];
        let run = run(format!("{}\n", lines.join("\n")).as_bytes());
        assert!(run.buckets.is_empty());
        assert_eq!(run.docs.len(), 1);
        assert_eq!(run.docs[0].name, "SEM_MOV_071025_043_EEVD.txt");
        let trailer = String::from_utf8(run.docs[0].lines[1].clone()).unwrap();
        assert!(trailer.starts_with("04,020770677,000000,000000,000000000000000,"));
        assert!(trailer.ends_with(",000002"));
        assert!(run.verdict.is_ok());
    }

    #[test]
    fn missing_trailer_aborts() {
        let records = records_from_bytes(
            b"00,020770677,07102025\n01,020770677,x,y,1,1,100,0,100,D\n",
            FileKind::Eevd,
        )
        .unwrap();
        let err = process(&records, "f.txt", &SplitOptions::new("unused")).unwrap_err();
        assert!(matches!(err, EngineError::MissingMotherTrailer));
    }

    #[test]
    fn reprocessing_a_child_reproduces_its_trailer_totals() {
        let run = run(&mother_single_pv());
        let child_bytes: Vec<u8> = run.docs[0]
            .lines
            .iter()
            .flat_map(|l| {
                let mut l = l.clone();
                l.push(b'\n');
                l
            })
            .collect();
        let reparsed = records_from_bytes(&child_bytes, FileKind::Eevd).unwrap();
        let rerun = process(&reparsed, "child.txt", &SplitOptions::new("unused")).unwrap();
        assert_eq!(rerun.verdict.status, VerdictStatus::Ok);
        let b = rerun.buckets.get("020770677").unwrap();
        assert_eq!(b.totals.bruto, 30000);
        assert_eq!(b.totals.liquido, 29900);
    }
}
