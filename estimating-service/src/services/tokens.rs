//! View tokens and invoice numbers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{NaiveDate, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

const TOKEN_BYTES: usize = 32;
/// Encoded length of a 32-byte token without padding.
pub const TOKEN_LEN: usize = 43;
const INVOICE_SUFFIX_LEN: usize = 6;

/// Mint a view token: 256 bits from the OS CSPRNG, URL-safe base64.
pub fn generate_view_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cheap shape check so malformed tokens never reach storage.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// `INV-YYYYMMDD-XXXXXX`, unique per owner.
pub fn generate_invoice_number() -> String {
    invoice_number_for(Utc::now().date_naive())
}

fn invoice_number_for(date: NaiveDate) -> String {
    let suffix: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(INVOICE_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("INV-{}-{}", date.format("%Y%m%d"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_url_safe_and_well_formed() {
        let token = generate_view_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(is_well_formed(&token));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_view_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"a".repeat(44)));
        assert!(!is_well_formed(&format!("{}=", "a".repeat(42))));
        assert!(!is_well_formed(&"../".repeat(15)[..43]));
    }

    #[test]
    fn invoice_number_format() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let number = invoice_number_for(date);
        assert!(number.starts_with("INV-20261018-"));
        let suffix = &number["INV-20261018-".len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
