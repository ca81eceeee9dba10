//! End-to-end split scenarios over real files: mother in, children out,
//! trailers and verdicts checked against the on-disk bytes.

use rede_splitter_common::money::{fmt_cents, fmt_num, to_cents};
use rede_splitter_common::FileKind;
use rede_splitter_engine::reconcile::VerdictStatus;
use rede_splitter_engine::{split_file, writer, SplitOptions};
use std::fs;
use std::path::Path;

fn fixed(prefix: &str, width: usize) -> String {
    let mut s = prefix.to_string();
    while s.len() < width {
        s.push(' ');
    }
    s
}

fn write_mother(dir: &Path, name: &str, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("{}\n", lines.join("\n"))).unwrap();
    path
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

mod eefi {
    use super::*;

    fn header_030(nsa: &str, date: &str, matrix: &str) -> String {
        let mut s = format!("030{date}");
        while s.len() < 75 {
            s.push(' ');
        }
        s.push_str(nsa);
        s.push_str(matrix);
        s
    }

    fn value_record(code: &str, value_start: usize, cents: i64) -> String {
        let mut s = fixed(code, value_start);
        s.push_str(&fmt_cents(cents, 15));
        s
    }

    fn trailer_052(rv: i64, aj_deb: i64) -> String {
        let mut s = String::from("052");
        s.push_str(&fmt_num(2, 4));
        s.push_str(&fmt_num(0, 6));
        s.push_str("020770670");
        s.push_str(&fmt_num(2, 4));
        s.push_str(&fmt_cents(rv, 15));
        s.push_str(&fmt_num(0, 6));
        s.push_str(&fmt_cents(0, 15));
        s.push_str(&fmt_num(0, 4));
        s.push_str(&fmt_cents(0, 15));
        s.push_str(&fmt_num(2, 4));
        s.push_str(&fmt_cents(aj_deb, 15));
        s
    }

    #[test]
    fn two_pv_extract_produces_two_reconciled_children() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            header_030("000041", "05102025", "020770670"),
            "032020770677 LOJA UM".to_string(),
            value_record("034", 31, 100),
            value_record("035", 29, 50),
            "032020770678 LOJA DOIS".to_string(),
            value_record("034", 31, 100),
            value_record("035", 29, 50),
            trailer_052(200, 100),
        ];
        let mother = write_mother(dir.path(), "MATRIZ_EEFI.251005.041", &lines);

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother, Some(FileKind::Eefi), &opts).unwrap();

        assert_eq!(outcome.verdict.status, VerdictStatus::Ok);
        assert_eq!(outcome.children.len(), 2);
        assert_eq!(outcome.mother.nsa, "041");
        assert_eq!(outcome.mother.date, "051025");

        let lote = writer::lote_dir(&opts.output_root, "041");
        for pv in ["020770677", "020770678"] {
            let child = read_lines(&lote.join(format!("{pv}_051025_041_EEFI.txt")));
            // header + 032 + 034 + 035 + 052
            assert_eq!(child.len(), 5);
            assert_eq!(&child[0][81..90], pv);

            let trailer = child.last().unwrap();
            assert_eq!(trailer.len(), 400);
            assert_eq!(&trailer[0..3], "052");
            assert_eq!(to_cents(trailer[26..41].as_bytes()), 100);
            assert_eq!(to_cents(trailer[85..100].as_bytes()), 50);
        }
    }
}

mod eevc {
    use super::*;

    fn header_002() -> String {
        let mut s = String::from("00205102025");
        while s.len() < 75 {
            s.push(' ');
        }
        s.push_str("000041");
        s.push_str("020770670");
        s
    }

    fn rv(code: &str, cents: i64) -> String {
        let mut s = fixed(code, 114);
        s.push_str(&fmt_cents(cents, 15));
        s
    }

    fn trailer_028(cents: i64) -> String {
        let mut s = fixed("028", 133);
        s.push_str(&fmt_cents(cents, 15));
        s
    }

    #[test]
    fn credit_block_reconciles_and_regenerates_the_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            header_002(),
            "004020770677 RESTAURANTE".to_string(),
            rv("006", 12345),
            rv("010", 23456),
            fixed("008qualquer", 40),
            fixed("012qualquer", 40),
            fixed("014qualquer", 40),
            fixed("026", 20),
            trailer_028(35801),
        ];
        let mother = write_mother(dir.path(), "VENTUNO_EEVC.251005.041", &lines);

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother, None, &opts).unwrap();
        assert_eq!(outcome.verdict.status, VerdictStatus::Ok);
        assert_eq!(outcome.children.len(), 1);

        let child = read_lines(&outcome.children[0].path);
        // header + 004 + two RVs + three carried + 026 + 028
        assert_eq!(child.len(), 9);
        assert_eq!(&child[0][81..90], "020770677");

        let synth = &child[7];
        assert_eq!(&synth[0..3], "026");
        assert_eq!(to_cents(synth[124..138].as_bytes()), 35801);
        assert_eq!(&child[8], &lines[8], "mother trailer appended verbatim");
    }

    #[test]
    fn trailer_divergence_is_reported_but_children_survive() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            header_002(),
            "004020770677 RESTAURANTE".to_string(),
            rv("006", 900),
            trailer_028(1000),
        ];
        let mother = write_mother(dir.path(), "VENTUNO_EEVC.251005.041", &lines);

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother, None, &opts).unwrap();
        assert_eq!(outcome.verdict.status, VerdictStatus::Divergent);
        assert_eq!(
            outcome.verdict.dimensions[0].detail,
            "divergence of 100 cents (low)"
        );
        assert!(outcome.children[0].path.exists());
    }
}

mod eevd {
    use super::*;

    fn mother_lines() -> Vec<String> {
        vec![
            "00,020770670,07102025,08102025,1,2,3,000043,x".to_string(),
            "01,020770677,08102025,07102025,11111,2,20000,60,19940,D".to_string(),
            "01,020770678,08102025,07102025,22222,3,10000,40,9960,P".to_string(),
            "05,020770677,11111,extra".to_string(),
            "04,020770670,000002,000005,30000,100,29900,10000,40,9960,000006".to_string(),
        ]
    }

    #[test]
    fn detail_records_are_partitioned_without_alteration() {
        let dir = tempfile::tempdir().unwrap();
        let mother = write_mother(dir.path(), "MATRIZ_EEVD.txt", &mother_lines());

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother, None, &opts).unwrap();
        assert_eq!(outcome.children.len(), 2);

        // every mother detail record appears verbatim in exactly one child
        let mut all_details = Vec::new();
        for child in &outcome.children {
            let lines = read_lines(&child.path);
            // strip header and the three regenerated trailers
            all_details.extend_from_slice(&lines[1..lines.len() - 3]);
        }
        let mother_details = &mother_lines()[1..4];
        assert_eq!(all_details.len(), mother_details.len());
        for detail in mother_details {
            assert_eq!(
                all_details.iter().filter(|l| *l == detail).count(),
                1,
                "{detail} must appear in exactly one child"
            );
        }
    }

    #[test]
    fn child_digests_match_the_bytes_on_disk() {
        use sha2::{Digest, Sha256};

        let dir = tempfile::tempdir().unwrap();
        let mother = write_mother(dir.path(), "MATRIZ_EEVD.txt", &mother_lines());

        let opts = SplitOptions::new(dir.path().join("output"));
        let outcome = split_file(&mother, None, &opts).unwrap();
        for child in &outcome.children {
            let bytes = fs::read(&child.path).unwrap();
            assert_eq!(child.size, bytes.len() as u64);
            assert_eq!(child.sha256, hex::encode(Sha256::digest(&bytes)));
        }
    }
}
