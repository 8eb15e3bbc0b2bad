// =============================================================================
// errors.rs — THE TAXONOMY OF THINGS THAT GO WRONG
// =============================================================================
//
// Scraping a government website fails in layers, and each layer deserves its
// own type instead of a blanket catch-and-shrug. The rules:
//
// - Bad user input is the USER's problem (400, never logged as a fault).
// - A page whose widgets moved is the SITE's problem (500, no blind retry —
//   retrying against markup that changed underneath us just burns the one
//   concurrency slot we have).
// - A popup that won't open is ONE CASE's problem (recorded on the record,
//   the lookup continues).
// - A blown deadline is EVERYONE's problem (504, browser torn down).
//
// Everything carries a stable Portuguese reason code because the callers on
// the other end of this API match on strings, and strings that wobble are
// how integrations die.
// =============================================================================

use std::time::Duration;
use thiserror::Error;

/// Per-case reason code: the detail popup never appeared.
pub const REASON_POPUP: &str = "nao_abriu_popup";

/// Per-case reason code: the popup opened but reading it failed.
pub const REASON_DETAIL: &str = "detalhe_indisponivel";

/// Site-level aviso used when PJe returned zero case links and no
/// recognizable banner explaining why.
pub const REASON_NO_RESULTS: &str = "nenhum_processo_encontrado";

/// Whole-lookup failures. Each variant knows its HTTP status and its
/// machine-readable reason code, so the HTTP layer is a dumb pipe.
#[derive(Error, Debug)]
pub enum LookupError {
    /// The supplied document failed validation before we touched a browser.
    /// The reason is one of cpf_invalido / cnpj_invalido / documento_invalido.
    #[error("invalid identifier: {reason}")]
    InvalidIdentifier { reason: &'static str },

    /// We searched every frame on the page and the document input simply
    /// was not there. The site changed, or never loaded.
    #[error("document input not found on page")]
    FieldNotFound,

    /// We found the field but could not drive the form to submission —
    /// either typing left the field empty (the site's input mask ate the
    /// digits) or the search button was missing.
    #[error("search form could not be submitted: {reason}")]
    SubmitFailed { reason: &'static str },

    /// The overall wall-clock deadline expired. Whatever the browser was
    /// doing, it has been stopped and dismantled.
    #[error("lookup exceeded deadline of {deadline:?}")]
    Timeout { deadline: Duration },

    /// The browser engine itself misbehaved: launch failure, CDP error,
    /// a tab that died mid-navigation.
    #[error("browser failure: {0}")]
    Browser(#[from] BrowserError),
}

impl LookupError {
    /// The stable reason code for the JSON error body.
    pub fn reason_code(&self) -> &'static str {
        match self {
            LookupError::InvalidIdentifier { reason } => reason,
            LookupError::FieldNotFound => "nao_encontrei_campo_cpf",
            LookupError::SubmitFailed { reason } => reason,
            LookupError::Timeout { .. } => "timeout_no_tribunal",
            LookupError::Browser(_) => "erro_interno",
        }
    }

    /// The HTTP status this failure surfaces as.
    pub fn http_status(&self) -> u16 {
        match self {
            LookupError::InvalidIdentifier { .. } => 400,
            LookupError::Timeout { .. } => 504,
            _ => 500,
        }
    }
}

/// Failures inside the browser-automation capability. Kept separate from
/// LookupError so the capability trait doesn't need to know what a CPF is.
#[derive(Error, Debug)]
pub enum BrowserError {
    /// Could not launch the browser process at all. On a VPS this usually
    /// means Chrome isn't installed or the sandbox flags are wrong.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// Navigation to the target URL failed or never settled.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A CDP command (evaluate, click, read) came back with an error.
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_identifier_maps_to_400() {
        let err = LookupError::InvalidIdentifier {
            reason: "cpf_invalido",
        };
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.reason_code(), "cpf_invalido");
    }

    #[test]
    fn test_timeout_maps_to_504_with_stable_code() {
        let err = LookupError::Timeout {
            deadline: Duration::from_secs(180),
        };
        assert_eq!(err.http_status(), 504);
        assert_eq!(err.reason_code(), "timeout_no_tribunal");
    }

    #[test]
    fn test_field_not_found_keeps_legacy_code() {
        let err = LookupError::FieldNotFound;
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.reason_code(), "nao_encontrei_campo_cpf");
    }

    #[test]
    fn test_browser_errors_surface_as_internal() {
        let err = LookupError::from(BrowserError::Launch("no chrome".into()));
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.reason_code(), "erro_interno");
    }
}
