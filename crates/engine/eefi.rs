//! Financial extract (EEFI): fixed-width mother files in two sub-layouts.
//!
//! The complete layout opens establishment blocks with `032` records and
//! attaches the financial records {034, 035, 036, 038, 043} to the current
//! block. The simplified layout has no blocks: each `040` summary record
//! carries its own establishment. `045` cancellations count as debits in
//! both. The per-PV `052` trailer is regenerated with the aggregated
//! counters and values.

use crate::bucket::Buckets;
use crate::error::EngineError;
use crate::reader::{rewrite_fixed_range, Record};
use crate::reconcile::{compare, Verdict};
use crate::writer::{child_name, ChildDocument};
use crate::{reader, KindRun, MotherMeta, SplitOptions};
use rede_splitter_common::layout::{field, EEFI_TRAILER_WIDTH, HEADER_PV_RANGE};
use rede_splitter_common::money::{fmt_cents, fmt_num};
use rede_splitter_common::{ddmmaa_from_ddmmaaaa, normalize_pv, short_nsa, FileKind};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// 032 establishment blocks with itemized financial records.
    Complete,
    /// 040 summary records, one establishment each.
    Simplified,
}

pub(crate) fn process(
    records: &[Record],
    source: &str,
    opts: &SplitOptions,
) -> Result<KindRun, EngineError> {
    let header = &records[0];
    let meta = extract_meta(header, source);

    let layout = if records.iter().any(|r| r.rtype == "032") {
        Layout::Complete
    } else {
        Layout::Simplified
    };

    let mother_trailer = records.iter().rev().find(|r| r.rtype == "052");
    if mother_trailer.is_none() && layout == Layout::Complete {
        return Err(EngineError::MissingMotherTrailer);
    }

    let mut buckets = Buckets::new();
    let mut type_counts: HashMap<String, u64> = HashMap::new();
    let mut current_pv: Option<String> = None;

    for rec in &records[1..] {
        let t = rec.rtype.as_str();
        if t == "052" {
            // file trailer, regenerated per child
            continue;
        }
        *type_counts.entry(t.to_string()).or_default() += 1;

        match t {
            "032" => {
                let spec = field(FileKind::Eefi, "032", "pv").expect("registry entry");
                match rec.text(spec) {
                    Ok(pv) if pv.chars().any(|c| c.is_ascii_digit()) => {
                        let pv = normalize_pv(&pv);
                        buckets.bucket(&pv).push(t, &rec.raw, false);
                        current_pv = Some(pv);
                    }
                    _ => {
                        warn!(line = rec.number, "032 record without PV, skipped");
                        current_pv = None;
                    }
                }
            }
            "034" | "036" | "035" | "038" | "043" => {
                let Some(pv) = current_pv.clone() else {
                    warn!(line = rec.number, rtype = t, "financial record outside a PV block, skipped");
                    continue;
                };
                let spec = field(FileKind::Eefi, t, "valor").expect("registry entry");
                let value = match rec.money(spec) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(line = rec.number, rtype = t, %err, "record skipped");
                        continue;
                    }
                };
                let b = buckets.bucket(&pv);
                match t {
                    "034" => {
                        b.totals.qtd_cred_norm += 1;
                        b.totals.valor_rv += value;
                    }
                    "036" => {
                        b.totals.qtd_ant += 1;
                        b.totals.valor_ant += value;
                    }
                    "043" => {
                        b.totals.qtd_aj_cred += 1;
                        b.totals.valor_aj_cred += value;
                    }
                    // 035 and 038 are debit adjustments
                    _ => {
                        b.totals.qtd_aj_deb += 1;
                        b.totals.valor_aj_deb += value;
                    }
                }
                b.push(t, &rec.raw, true);
            }
            "040" => {
                let Some(pv) = extract_pv(&rec.raw) else {
                    warn!(line = rec.number, "040 record without resolvable PV, skipped");
                    continue;
                };
                let b = buckets.bucket(&pv);
                if layout == Layout::Simplified {
                    let spec = field(FileKind::Eefi, "040", "valor").expect("registry entry");
                    match rec.money(spec) {
                        Ok(value) => {
                            b.totals.qtd_cred_norm += 1;
                            b.totals.valor_rv += value;
                        }
                        Err(err) => {
                            warn!(line = rec.number, %err, "record skipped");
                            continue;
                        }
                    }
                }
                b.push(t, &rec.raw, true);
            }
            "045" => {
                // cancellation, booked as a debit
                let Some(pv) = extract_pv(&rec.raw) else {
                    warn!(line = rec.number, "045 record without resolvable PV, skipped");
                    continue;
                };
                let spec = field(FileKind::Eefi, "045", "valor").expect("registry entry");
                let value = match rec.money(spec) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(line = rec.number, %err, "record skipped");
                        continue;
                    }
                };
                let b = buckets.bucket(&pv);
                b.totals.qtd_aj_deb += 1;
                b.totals.valor_aj_deb += value;
                b.push(t, &rec.raw, true);
            }
            other => {
                if current_pv.is_some() {
                    warn!(line = rec.number, rtype = other, "unreferenced record type inside PV block, skipped");
                }
            }
        }
    }

    let computed: i64 = buckets.iter().map(|b| b.totals.signed_total()).sum();
    let verdict = match mother_trailer {
        Some(trailer) => {
            let expected = trailer_signed_total(trailer)?;
            Verdict::from_dimensions(vec![compare(
                "total",
                expected,
                computed,
                opts.tolerance_cents,
            )])
        }
        // simplified extracts may legitimately lack the trailer
        None => Verdict::ok_with_note("no mother trailer in simplified extract"),
    };

    let mut docs = Vec::with_capacity(buckets.len());
    for b in buckets.iter() {
        if !b.movement && opts.skip_empty_buckets {
            continue;
        }
        let mut lines = Vec::with_capacity(b.records.len() + 2);
        lines.push(rewrite_fixed_range(
            &header.raw,
            HEADER_PV_RANGE.0,
            HEADER_PV_RANGE.1,
            &b.pv,
            header.number,
            &header.rtype,
        )?);
        lines.extend(b.records.iter().cloned());
        lines.push(synthesize_052(b));

        docs.push(ChildDocument {
            pv: b.pv.clone(),
            name: child_name(&b.pv, &meta.date, &meta.nsa, "EEFI"),
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
    let date = field(FileKind::Eefi, "030", "data")
        .and_then(|spec| header.text(spec).ok())
        .and_then(|s| ddmmaa_from_ddmmaaaa(&s))
        .or_else(|| reader::date_hint_from_name(source))
        .unwrap_or_else(|| "000000".to_string());
    let nsa = field(FileKind::Eefi, "030", "sequencia")
        .and_then(|spec| header.text(spec).ok())
        .filter(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(|s| short_nsa(&s))
        .or_else(|| reader::nsa_hint_from_name(source))
        .unwrap_or_else(|| "000".to_string());
    let matrix = field(FileKind::Eefi, "030", "pv_grupo")
        .and_then(|spec| header.text(spec).ok())
        .unwrap_or_default();
    MotherMeta {
        kind: FileKind::Eefi,
        source: source.to_string(),
        date,
        nsa,
        matrix,
    }
}

/// Robust establishment extractor for the summary/cancellation records,
/// whose PV position drifts between acquirer versions: the declared range
/// first, then the known alternatives, then the first nine-digit run in the
/// head of the line.
fn extract_pv(raw: &[u8]) -> Option<String> {
    const CANDIDATES: [(usize, usize); 4] = [(3, 12), (12, 21), (13, 22), (22, 31)];
    for (start, end) in CANDIDATES {
        if let Some(slice) = raw.get(start..end) {
            if slice.iter().all(|b| b.is_ascii_digit()) {
                return Some(String::from_utf8_lossy(slice).to_string());
            }
        }
    }
    let head = &raw[..raw.len().min(60)];
    let mut run_start = None;
    for (i, b) in head.iter().enumerate() {
        if b.is_ascii_digit() {
            let start = *run_start.get_or_insert(i);
            if i - start + 1 == 9 {
                return Some(String::from_utf8_lossy(&head[start..=i]).to_string());
            }
        } else {
            run_start = None;
        }
    }
    None
}

fn trailer_signed_total(trailer: &Record) -> Result<i64, EngineError> {
    let get = |name| {
        let spec = field(FileKind::Eefi, "052", name).expect("registry entry");
        trailer.money(spec)
    };
    Ok(get("valor_rv")? + get("valor_ant")? + get("valor_aj_cred")? - get("valor_aj_deb")?)
}

/// Regenerated per-establishment trailer, space-padded to the canonical
/// 400-character width.
fn synthesize_052(bucket: &crate::bucket::PvBucket) -> Vec<u8> {
    let t = &bucket.totals;
    // header + routed records + this trailer
    let total_records = 1 + bucket.records.len() as u64 + 1;
    let mut line = String::with_capacity(EEFI_TRAILER_WIDTH);
    line.push_str("052");
    line.push_str(&fmt_num(1, 4));
    line.push_str(&fmt_num(total_records, 6));
    line.push_str(&bucket.pv);
    line.push_str(&fmt_num(t.qtd_cred_norm, 4));
    line.push_str(&fmt_cents(t.valor_rv, 15));
    line.push_str(&fmt_num(t.qtd_ant, 6));
    line.push_str(&fmt_cents(t.valor_ant, 15));
    line.push_str(&fmt_num(t.qtd_aj_cred, 4));
    line.push_str(&fmt_cents(t.valor_aj_cred, 15));
    line.push_str(&fmt_num(t.qtd_aj_deb, 4));
    line.push_str(&fmt_cents(t.valor_aj_deb, 15));
    while line.len() < EEFI_TRAILER_WIDTH {
        line.push(' ');
    }
    line.into_bytes()
}
