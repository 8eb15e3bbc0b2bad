// =============================================================================
// normalizer.rs — THE DOCUMENT DECONTAMINATION CHAMBER
// =============================================================================
//
// Users send CPFs as "123.456.789-01", "123 456 789 01", or occasionally
// as interpretive free verse. The court site wants digits. This module is
// the airlock between the two: strip everything that isn't a digit, figure
// out (or verify) which kind of document we're holding, and refuse entry
// to anything that doesn't match the registry's arithmetic.
//
// Pure functions only. No I/O, no clocks, no state. The one module in this
// engine that will never page anyone at 3 AM.
// =============================================================================

use crate::errors::LookupError;
use crate::models::{DocKind, Identifier};

/// Strip every non-digit character from the raw input.
/// "123.456.789-01" becomes "12345678901". " " becomes "".
pub fn strip_non_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Normalize a raw document string into a validated Identifier.
///
/// With a declared kind, the stripped digit count must match that kind
/// exactly — a 12-digit "CPF" is rejected as cpf_invalido, not silently
/// reinterpreted. With no declared kind we infer from the count: 11 digits
/// is a CPF, 14 a CNPJ, anything else is documento_invalido.
///
/// This is deliberately NOT a check-digit validator. PJe itself runs the
/// mod-11 verification on its side and shows its own banner for documents
/// that fail it; duplicating that arithmetic here would just give us two
/// sources of truth to keep in sync.
pub fn normalize(raw: &str, declared: Option<DocKind>) -> Result<Identifier, LookupError> {
    let digits = strip_non_digits(raw);

    match declared {
        Some(kind) => {
            if digits.len() != kind.digit_count() {
                return Err(LookupError::InvalidIdentifier {
                    reason: kind.invalid_reason(),
                });
            }
            Ok(Identifier { kind, digits })
        }
        None => match digits.len() {
            11 => Ok(Identifier {
                kind: DocKind::Cpf,
                digits,
            }),
            14 => Ok(Identifier {
                kind: DocKind::Cnpj,
                digits,
            }),
            _ => Err(LookupError::InvalidIdentifier {
                reason: "documento_invalido",
            }),
        },
    }
}
