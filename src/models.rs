// =============================================================================
// models.rs — THE SACRED DATA STRUCTURES OF JUDICIAL FATE
// =============================================================================
//
// These structs represent everything we know (and everything we merely hope
// we know) about a person's or company's entanglement with the Brazilian
// court system. Every field extracted from PJe is best-effort text matching
// against a page we do not control, which is why half of them are Options.
//
// Is it overkill to stamp a UUID on every lookup of a public website?
// Yes. Do we care? Absolutely not.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The two kinds of Brazilian taxpayer identifier PJe will accept.
/// Each comes with its own digit count, its own radio button on the search
/// form, and its own way of ruining an afternoon when the count is wrong.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    /// CPF — Cadastro de Pessoas Físicas. Eleven digits identifying a
    /// natural person. If it's on PJe under a CPF, somebody is having
    /// a genuinely bad year.
    Cpf,

    /// CNPJ — Cadastro Nacional da Pessoa Jurídica. Fourteen digits
    /// identifying a company, because companies deserve three extra
    /// digits of bureaucracy.
    Cnpj,
}

impl DocKind {
    /// How many digits this kind of document must carry. The registry is
    /// not flexible on this point and neither are we.
    pub fn digit_count(self) -> usize {
        match self {
            DocKind::Cpf => 11,
            DocKind::Cnpj => 14,
        }
    }

    /// The 400-level reason code surfaced when a document of this kind
    /// fails validation. Stable, machine-readable, Portuguese.
    pub fn invalid_reason(self) -> &'static str {
        match self {
            DocKind::Cpf => "cpf_invalido",
            DocKind::Cnpj => "cnpj_invalido",
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKind::Cpf => write!(f, "cpf"),
            DocKind::Cnpj => write!(f, "cnpj"),
        }
    }
}

/// A validated, canonicalized document identifier. By the time one of these
/// exists, the digits are guaranteed to be digits and the count is guaranteed
/// to match the kind. The Normalizer is the only factory; everything
/// downstream gets to stop worrying about punctuation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub kind: DocKind,
    pub digits: String,
}

impl Identifier {
    /// The cache key for this identifier. Kind-prefixed so a hypothetical
    /// 11-digit CNPJ typo can never collide with a real CPF's entry.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.kind, self.digits)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.digits)
    }
}

/// One discovered case, scraped from a detail popup.
///
/// The CNJ number is the only field we actually trust — it matched a strict
/// 25-character pattern. Everything else came out of a wall of rendered text
/// via keyword heuristics, which is why every metadata field is an Option
/// and why `erro` exists at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// The CNJ-formatted case number: NNNNNNN-DD.YYYY.J.TR.OOOO.
    /// The one piece of structure the judiciary standardized in 2009,
    /// and we are very grateful for it.
    pub numero: String,

    /// The case subject ("Cobrança", "Execução Fiscal", ...).
    /// None when the popup text didn't yield one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assunto: Option<String>,

    /// The judicial class of the proceeding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classe_judicial: Option<String>,

    /// When the case was distributed to its court. Kept as the raw text the
    /// site displayed — parsing Brazilian court date formats is a quagmire
    /// we deliberately stay out of.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_distribuicao: Option<String>,

    /// The adjudicating body ("2ª Vara Cível de ...").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orgao_julgador: Option<String>,

    /// The jurisdiction / comarca.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdicao: Option<String>,

    /// The case's movement history: filings, rulings, notices, each one an
    /// unstructured line of text. Ordered as the site presented them.
    pub movimentacoes: Vec<String>,

    /// Per-case failure tag. When the detail popup refused to open we record
    /// the case number with `erro: "nao_abriu_popup"` instead of failing the
    /// whole lookup — one stubborn popup must never sink the other nine cases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

impl CaseRecord {
    /// A record for a case whose detail view could not be retrieved.
    /// The number survives; everything else is honestly absent.
    pub fn stub(numero: impl Into<String>, erro: impl Into<String>) -> Self {
        Self {
            numero: numero.into(),
            assunto: None,
            classe_judicial: None,
            data_distribuicao: None,
            orgao_julgador: None,
            jurisdicao: None,
            movimentacoes: Vec::new(),
            erro: Some(erro.into()),
        }
    }
}

/// The payload callers receive and the cache stores. One of these is the
/// entire observable output of a lookup: who we asked about, when we asked,
/// what we found, and whatever the site itself had to say about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResult {
    /// A UUID v4 for this specific lookup. Because even a cache hit
    /// deserves provenance.
    pub id: String,

    /// The normalized digits that were submitted to the court site.
    pub documento: String,

    /// Which kind of document this was.
    pub tipo: DocKind,

    /// When THIS result was computed. Cache hits return the original
    /// timestamp, which is exactly the honest thing to do.
    pub timestamp: DateTime<Utc>,

    /// The discovered cases, deduplicated by CNJ number, in discovery order.
    pub processos: Vec<CaseRecord>,

    /// A site-level message when PJe reported no results or showed a
    /// validation banner. This is a valid, meaningful outcome — the court
    /// saying "nothing here" is information, not an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aviso: Option<String>,
}

impl LookupResult {
    /// A fresh, empty result for an identifier. Cases and warnings get
    /// attached as the session discovers them.
    pub fn new(ident: &Identifier) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            documento: ident.digits.clone(),
            tipo: ident.kind,
            timestamp: Utc::now(),
            processos: Vec::new(),
            aviso: None,
        }
    }

    /// Append a case, enforcing the one invariant this payload actually
    /// guarantees: no two records share a CNJ number.
    pub fn push_unique(&mut self, record: CaseRecord) -> bool {
        if self.processos.iter().any(|p| p.numero == record.numero) {
            return false;
        }
        self.processos.push(record);
        true
    }
}

impl fmt::Display for LookupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) — {} processo(s){}",
            self.id,
            self.documento,
            self.tipo,
            self.processos.len(),
            if self.aviso.is_some() { ", com aviso" } else { "" },
        )
    }
}

/// Terminal classification of one lookup attempt. Every request ends in
/// exactly one of these, and the HTTP layer maps them to status codes
/// without ever having to peek inside the error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The lookup ran to completion (possibly with zero cases and an aviso,
    /// possibly with some error-tagged stubs — still a success).
    Success,
    /// The overall deadline expired. The browser was torn down mid-flight.
    Timeout,
    /// The page's expected interactive elements could not be located or
    /// driven. The site changed, or the site is down, or the site is the
    /// site. Nothing was cached.
    InternalError,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Timeout => write!(f, "TIMEOUT"),
            Outcome::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident() -> Identifier {
        Identifier {
            kind: DocKind::Cpf,
            digits: "12345678901".to_string(),
        }
    }

    #[test]
    fn test_cache_key_is_kind_prefixed() {
        assert_eq!(ident().cache_key(), "cpf:12345678901");
    }

    #[test]
    fn test_push_unique_rejects_duplicate_numbers() {
        let mut result = LookupResult::new(&ident());
        assert!(result.push_unique(CaseRecord::stub("0000001-11.2024.8.13.0024", "x")));
        assert!(!result.push_unique(CaseRecord::stub("0000001-11.2024.8.13.0024", "y")));
        assert_eq!(result.processos.len(), 1);
    }

    #[test]
    fn test_stub_carries_error_and_nothing_else() {
        let stub = CaseRecord::stub("0000001-11.2024.8.13.0024", "nao_abriu_popup");
        assert_eq!(stub.erro.as_deref(), Some("nao_abriu_popup"));
        assert!(stub.assunto.is_none());
        assert!(stub.movimentacoes.is_empty());
    }

    #[test]
    fn test_doc_kind_digit_counts() {
        assert_eq!(DocKind::Cpf.digit_count(), 11);
        assert_eq!(DocKind::Cnpj.digit_count(), 14);
    }

    #[test]
    fn test_result_serializes_without_null_noise() {
        let result = LookupResult::new(&ident());
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"documento\":\"12345678901\""));
        assert!(json.contains("\"tipo\":\"cpf\""));
        // aviso is None and should be omitted entirely
        assert!(!json.contains("aviso"));
    }
}
