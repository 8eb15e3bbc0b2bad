// =============================================================================
// extract.rs — THE RENDERED-TEXT STRIP MINE
// =============================================================================
//
// This module is where a wall of rendered court-site text becomes structured
// case data. And we do it FAST. How fast? We use:
//
// 1. Aho-Corasick automatons — multi-pattern matching that scans a line for
//    ALL noise keywords and ALL metadata labels simultaneously in a single
//    pass. O(n + m). Built on a finite automaton. This is how antivirus
//    scanners work. We're using antivirus-grade technology to decide whether
//    "Documentos juntados em 01/01/2024" is a lawsuit. Let that sink in.
//
// 2. memchr — SIMD-accelerated byte scanning for the cheap preliminary
//    checks, so the automatons only fire on lines that could possibly
//    matter.
//
// One honesty note before the speed talk goes to our heads: everything in
// here is pattern-matching over the rendered text of a page we do not
// control. It is a heuristic, not a parser against a grammar. The site
// WILL eventually render something these patterns misread, and when it
// does, the answer is to adjust the keyword lists — not to believe a
// grammar exists.
// =============================================================================

use aho_corasick::AhoCorasick;
use std::sync::LazyLock;

/// UI chrome that must never be mistaken for case data: attachment notices,
/// certificate lines, "view" links, pagination, receipts, and the PJeOffice
/// desktop-app nag banner. Accented and unaccented spellings both appear in
/// the wild, so both are listed.
static NOISE_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "documentos juntados",
        "documento", // also covers "documentos", and the plural phrase above
        "certidão",
        "certidao",
        "visualizar",
        "pjeoffice",
        "aplicativo pjeoffice",
        "indisponível",
        "indisponivel",
        "página",
        "pagina",
        "resultado encontrado",
        "resultados encontrados",
        "recibo",
    ]
});

/// The noise automaton. ascii_case_insensitive folds A-Z only, which handles
/// "Documentos"/"DOCUMENTO" fine; the accented-vowel variants are covered by
/// listing both spellings above.
static NOISE_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*NOISE_KEYWORDS)
        .expect("Failed to build noise automaton — the keywords are invalid somehow")
});

/// Lines the SITE uses to say "no results" or to complain about the query.
/// These become the `aviso` field of an empty result — a meaningful outcome,
/// not an error.
static BANNER_KEYWORDS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        "nenhum resultado",
        "nenhum registro",
        "nenhum processo",
        "não foram encontrados",
        "nao foram encontrados",
        "sem resultados",
        "resultados encontrados",
    ]
});

static BANNER_AUTOMATON: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(&*BANNER_KEYWORDS)
        .expect("Failed to build banner automaton")
});

/// Metadata label synonym sets. Each field has 1-3 keyword variants because
/// the site's own templates can't agree on what to call things.
const ASSUNTO_KEYS: &[&str] = &["assunto(s)", "assunto"];
const CLASSE_KEYS: &[&str] = &["classe judicial", "classe"];
const DISTRIBUICAO_KEYS: &[&str] = &[
    "data da distribuição",
    "data de distribuição",
    "distribuição",
];
const ORGAO_KEYS: &[&str] = &["órgão julgador", "orgao julgador"];
const JURISDICAO_KEYS: &[&str] = &["jurisdição", "jurisdicao", "comarca"];

/// Scanned-row ceiling for movement extraction. The movement table of a
/// 20-year-old execução fiscal can run to thousands of rows; past 500 the
/// marginal row is not worth the CDP round trips.
pub const MOVEMENT_ROW_CAP: usize = 500;

/// If a movement-container strategy yields at least this many kept rows,
/// it found the real table and we stop trying other strategies.
pub const MOVEMENT_SUFFICIENT: usize = 5;

/// Collapse all internal whitespace runs to single spaces and trim.
/// The site pads its table cells with enough whitespace to typeset a novel.
pub fn norm_line(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = true;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Split raw visible text into normalized, non-blank lines.
pub fn clean_lines(text: &str) -> Vec<String> {
    text.replace('\r', "")
        .split('\n')
        .map(norm_line)
        .filter(|ln| !ln.is_empty())
        .collect()
}

/// Is this line UI chrome rather than data?
///
/// The memchr pre-check scans for keyword fragments with the leading letter
/// chopped off, so "Documento"/"documento"/"DOCUMENTO" all hit the same
/// lowercase fragment and the automaton only runs on lines that could
/// possibly be noise. (All-caps accented text slips past the fold; it has
/// not been observed on this site.)
pub fn is_noise(line: &str) -> bool {
    let bytes = line.as_bytes();
    let has_potential = memchr::memmem::find(bytes, b"ocument").is_some()
        || memchr::memmem::find(bytes, b"ertid").is_some()
        || memchr::memmem::find(bytes, b"isualizar").is_some()
        || memchr::memmem::find(bytes, b"jeoffice").is_some()
        || memchr::memmem::find(bytes, b"JeOffice").is_some()
        || memchr::memmem::find(bytes, b"JEOFFICE").is_some()
        || memchr::memmem::find(bytes, b"ndispon").is_some()
        || memchr::memmem::find(bytes, b"gina").is_some()
        || memchr::memmem::find(bytes, b"esultado").is_some()
        || memchr::memmem::find(bytes, b"ecibo").is_some();

    if !has_potential {
        return false;
    }
    NOISE_AUTOMATON.is_match(line)
}

/// Find the site's own "nothing here" / validation banner in the page text,
/// if it rendered one. Returns the normalized line so the caller can surface
/// the court's exact words.
pub fn find_site_banner(text: &str) -> Option<String> {
    clean_lines(text)
        .into_iter()
        .find(|ln| BANNER_AUTOMATON.is_match(ln.to_lowercase().as_str()))
}

/// The five best-effort metadata fields of one case detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseMetadata {
    pub assunto: Option<String>,
    pub classe_judicial: Option<String>,
    pub data_distribuicao: Option<String>,
    pub orgao_julgador: Option<String>,
    pub jurisdicao: Option<String>,
}

/// Extract the metadata fields from the raw visible text of a detail view.
///
/// For each label set: scan the lines for a case-insensitive keyword hit.
/// On a hit, prefer the `label: value` / `label - value` split on that same
/// line; if the split yields nothing usable, take the following line. Either
/// way the candidate value must survive the noise filter, or the scan keeps
/// walking — a label followed by chrome is a label without a value.
pub fn extract_metadata(text: &str) -> CaseMetadata {
    let lines = clean_lines(text);
    CaseMetadata {
        assunto: find_labeled_value(&lines, ASSUNTO_KEYS),
        classe_judicial: find_labeled_value(&lines, CLASSE_KEYS),
        data_distribuicao: find_labeled_value(&lines, DISTRIBUICAO_KEYS),
        orgao_julgador: find_labeled_value(&lines, ORGAO_KEYS),
        jurisdicao: find_labeled_value(&lines, JURISDICAO_KEYS),
    }
}

/// The shared label-scan walk described on `extract_metadata`.
fn find_labeled_value(lines: &[String], keys: &[&str]) -> Option<String> {
    for (i, line) in lines.iter().enumerate() {
        let low = line.to_lowercase();
        if !keys.iter().any(|k| low.contains(k)) {
            continue;
        }

        // Same-line `label: value` or `label - value` split, first separator
        // wins. The value side must be non-empty and must not be chrome.
        if let Some(sep) = line.find(|c| c == ':' || c == '-') {
            let value = line[sep + 1..].trim();
            if !value.is_empty() && !is_noise(value) {
                return Some(value.to_string());
            }
        }

        // Fall back to the following line.
        if let Some(next) = lines.get(i + 1) {
            if !is_noise(next) {
                return Some(next.clone());
            }
        }
    }
    None
}

/// Filter candidate movement rows: normalize, drop blanks and chrome,
/// deduplicate by exact text, stop at the row cap. Order is preserved —
/// the site lists movements newest-first and callers rely on that.
pub fn filter_movements<I>(rows: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    let mut kept = Vec::new();
    for raw in rows.into_iter().take(MOVEMENT_ROW_CAP) {
        let line = norm_line(&raw);
        if line.is_empty() || is_noise(&line) {
            continue;
        }
        if seen.insert(line.clone()) {
            kept.push(line);
        }
    }
    kept
}

/// Fallback movement extraction: when no movement container was found,
/// run every line of the whole page through the same filter and hope.
pub fn movements_from_page_text(text: &str) -> Vec<String> {
    filter_movements(text.replace('\r', "").split('\n').map(str::to_string))
}

/// Locate the first CNJ-formatted case number in a blob of text.
///
/// The CNJ shape is NNNNNNN-DD.YYYY.J.TR.OOOO — 25 characters, fixed
/// punctuation, the one stable landmark on the whole results page. We scan
/// byte-by-byte instead of reaching for a regex engine: the shape check is
/// a 25-entry table and the memchr bouncer skips texts with no hyphen at all.
pub fn find_cnj(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    memchr::memchr(b'-', bytes)?;

    if bytes.len() < 25 {
        return None;
    }
    for start in 0..=bytes.len() - 25 {
        if cnj_shape_at(bytes, start) {
            // Reject when the match is embedded in a longer digit run
            // ("00000001-..." is not a case number, it's a typo).
            let digit_before = start > 0 && bytes[start - 1].is_ascii_digit();
            let digit_after = start + 25 < bytes.len() && bytes[start + 25].is_ascii_digit();
            if !digit_before && !digit_after {
                // The shape check guarantees ASCII throughout the window.
                return Some(&text[start..start + 25]);
            }
        }
    }
    None
}

/// Does `bytes[at..at + 25]` have the exact CNJ shape?
fn cnj_shape_at(bytes: &[u8], at: usize) -> bool {
    // NNNNNNN-DD.YYYY.J.TR.OOOO
    // 0123456 7 89 10 ...
    const SHAPE: &[(usize, u8)] = &[(7, b'-'), (10, b'.'), (15, b'.'), (17, b'.'), (20, b'.')];
    let window = &bytes[at..at + 25];
    for (i, &b) in window.iter().enumerate() {
        match SHAPE.iter().find(|(pos, _)| *pos == i) {
            Some(&(_, expected)) => {
                if b != expected {
                    return false;
                }
            }
            None => {
                if !b.is_ascii_digit() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_line_collapses_whitespace() {
        assert_eq!(norm_line("  Assunto:\t  Cobrança  "), "Assunto: Cobrança");
    }

    #[test]
    fn test_noise_rejects_attachment_notice() {
        assert!(is_noise("Documentos juntados em 01/01/2024"));
    }

    #[test]
    fn test_noise_rejects_accented_and_unaccented_chrome() {
        assert!(is_noise("Certidão emitida"));
        assert!(is_noise("certidao emitida"));
        assert!(is_noise("página 2 de 5"));
        assert!(is_noise("Pagina 2 de 5"));
        assert!(is_noise("Recibo de protocolo"));
        assert!(is_noise("Visualizar detalhes"));
        assert!(is_noise("Aplicativo PJeOffice indisponível"));
    }

    #[test]
    fn test_noise_passes_real_data() {
        assert!(!is_noise("Cobrança"));
        assert!(!is_noise("2ª Vara Cível da Comarca de Belo Horizonte"));
        assert!(!is_noise("Juntada de petição intercorrente"));
    }

    #[test]
    fn test_metadata_colon_split() {
        let meta = extract_metadata("Assunto: Cobrança\nClasse Judicial: Procedimento Comum");
        assert_eq!(meta.assunto.as_deref(), Some("Cobrança"));
        assert_eq!(meta.classe_judicial.as_deref(), Some("Procedimento Comum"));
    }

    #[test]
    fn test_metadata_dash_split() {
        let meta = extract_metadata("Jurisdição - Belo Horizonte");
        assert_eq!(meta.jurisdicao.as_deref(), Some("Belo Horizonte"));
    }

    #[test]
    fn test_metadata_next_line_fallback() {
        let meta = extract_metadata("Órgão Julgador\n2ª Vara Cível");
        assert_eq!(meta.orgao_julgador.as_deref(), Some("2ª Vara Cível"));
    }

    #[test]
    fn test_metadata_rejects_noise_values() {
        // The label is real but both candidate values are chrome, so the
        // field must come back empty rather than polluted.
        let meta = extract_metadata("Assunto: Documentos juntados\nVisualizar");
        assert_eq!(meta.assunto, None);
    }

    #[test]
    fn test_metadata_synonym_comarca() {
        let meta = extract_metadata("Comarca: Uberlândia");
        assert_eq!(meta.jurisdicao.as_deref(), Some("Uberlândia"));
    }

    #[test]
    fn test_metadata_distribution_date_kept_raw() {
        let meta = extract_metadata("Data da Distribuição: 05/03/2021 14:22");
        assert_eq!(meta.data_distribuicao.as_deref(), Some("05/03/2021 14:22"));
    }

    #[test]
    fn test_filter_movements_dedups_and_drops_noise() {
        let rows = vec![
            "Juntada de petição".to_string(),
            "  Juntada   de petição ".to_string(), // same after normalization
            "Documentos juntados em 01/01/2024".to_string(),
            "Conclusos para despacho".to_string(),
            "".to_string(),
        ];
        let kept = filter_movements(rows);
        assert_eq!(kept, vec!["Juntada de petição", "Conclusos para despacho"]);
    }

    #[test]
    fn test_filter_movements_respects_row_cap() {
        let rows = (0..MOVEMENT_ROW_CAP + 100).map(|i| format!("Movimento {}", i));
        let kept = filter_movements(rows);
        assert_eq!(kept.len(), MOVEMENT_ROW_CAP);
    }

    #[test]
    fn test_find_cnj_in_anchor_text() {
        let text = "Ver processo 1234567-89.2021.8.13.0024 (detalhes)";
        assert_eq!(find_cnj(text), Some("1234567-89.2021.8.13.0024"));
    }

    #[test]
    fn test_find_cnj_rejects_wrong_shape() {
        assert_eq!(find_cnj("1234567-89.2021.8.13.24"), None);
        assert_eq!(find_cnj("123456789.2021.8.13.0024"), None);
        assert_eq!(find_cnj("no numbers here"), None);
    }

    #[test]
    fn test_find_cnj_rejects_embedded_digit_runs() {
        let text = "91234567-89.2021.8.13.0024";
        assert_eq!(find_cnj(text), None);
    }

    #[test]
    fn test_find_site_banner() {
        let page = "Consulta Pública\nNenhum resultado encontrado para o documento informado\nRodapé";
        let banner = find_site_banner(page).expect("banner present");
        assert!(banner.contains("Nenhum resultado"));
    }

    #[test]
    fn test_find_site_banner_absent_on_results_page() {
        assert_eq!(find_site_banner("Processo 1234567-89.2021.8.13.0024"), None);
    }

    #[test]
    fn test_movements_from_page_text_fallback() {
        let page = "Movimentações\nJuntada de petição\nVisualizar\nConclusos";
        let movs = movements_from_page_text(page);
        assert!(movs.contains(&"Juntada de petição".to_string()));
        assert!(movs.contains(&"Conclusos".to_string()));
        assert!(!movs.iter().any(|m| m.contains("Visualizar")));
    }
}
