//! Session code and controller token generation.
//!
//! - **Session codes** are short, human-presentable, drawn uniformly from an
//!   alphabet without visually confusable symbols (no `0/O`, `1/I/L`).
//! - **Controller tokens** are 128-bit CSPRNG secrets, hex-encoded.
//!
//! Both use `ring::rand::SystemRandom` (OS entropy).

use crate::errors::TimerError;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Default session code alphabet.
pub const DEFAULT_CODE_ALPHABET: &str = "23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Default session code length.
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Random bytes in a controller token (hex-encoded to 32 characters).
pub const CONTROLLER_TOKEN_BYTES: usize = 16;

/// Upper bound on collision retries before giving up.
const MAX_CODE_ATTEMPTS: usize = 1000;

/// Why a session code alphabet was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlphabetError {
    #[error("alphabet may only contain ASCII letters and digits, got '{0}'")]
    InvalidSymbol(char),

    #[error("alphabet contains duplicate symbol '{0}'")]
    DuplicateSymbol(char),

    #[error("alphabet must contain at least 2 symbols")]
    TooFewSymbols,
}

/// Validated set of symbols session codes are drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAlphabet {
    symbols: Vec<u8>,
}

impl CodeAlphabet {
    /// Build an alphabet from a string of distinct ASCII alphanumerics.
    ///
    /// Lowercase letters are upper-cased since codes are matched
    /// case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`AlphabetError`] for non-alphanumeric or repeated symbols,
    /// or fewer than two symbols.
    pub fn new(symbols: &str) -> Result<Self, AlphabetError> {
        let mut out: Vec<u8> = Vec::with_capacity(symbols.len());
        for ch in symbols.chars() {
            if !ch.is_ascii_alphanumeric() {
                return Err(AlphabetError::InvalidSymbol(ch));
            }
            let upper = ch.to_ascii_uppercase() as u8;
            if out.contains(&upper) {
                return Err(AlphabetError::DuplicateSymbol(ch));
            }
            out.push(upper);
        }

        if out.len() < 2 {
            return Err(AlphabetError::TooFewSymbols);
        }

        Ok(Self { symbols: out })
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Always false; construction rejects empty alphabets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Whether `ch` belongs to this alphabet.
    #[must_use]
    pub fn contains(&self, ch: char) -> bool {
        ch.is_ascii() && self.symbols.contains(&(ch as u8))
    }
}

impl Default for CodeAlphabet {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_CODE_ALPHABET.as_bytes().to_vec(),
        }
    }
}

/// Generate a session code of `length` symbols, retrying while `is_taken`
/// reports a collision with a live session.
///
/// Symbols are chosen by rejection sampling so every symbol is equally
/// likely regardless of alphabet size.
pub fn generate_session_code(
    alphabet: &CodeAlphabet,
    length: usize,
    is_taken: impl Fn(&str) -> bool,
) -> Result<String, TimerError> {
    let rng = SystemRandom::new();

    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = random_code(&rng, alphabet, length)?;
        if !is_taken(&code) {
            return Ok(code);
        }
    }

    tracing::error!(
        target: "timer.ids",
        attempts = MAX_CODE_ATTEMPTS,
        "Exhausted session code attempts"
    );
    Err(TimerError::Internal(
        "could not allocate a unique session code".to_string(),
    ))
}

fn random_code(
    rng: &SystemRandom,
    alphabet: &CodeAlphabet,
    length: usize,
) -> Result<String, TimerError> {
    let n = alphabet.symbols.len();
    // Largest multiple of n that fits in a byte; bytes at or above it are
    // rejected to avoid modulo bias.
    let limit = 256 - (256 % n);

    let mut code = String::with_capacity(length);
    let mut buf = [0u8; 32];
    while code.len() < length {
        rng.fill(&mut buf).map_err(|e| {
            tracing::error!(target: "timer.ids", error = %e, "Failed to generate random bytes for session code");
            TimerError::Internal("RNG failure".to_string())
        })?;

        for &b in &buf {
            if code.len() == length {
                break;
            }
            let b = usize::from(b);
            if b >= limit {
                continue;
            }
            let symbol = alphabet
                .symbols
                .get(b % n)
                .ok_or_else(|| TimerError::Internal("alphabet index out of range".to_string()))?;
            code.push(char::from(*symbol));
        }
    }

    Ok(code)
}

/// Generate a controller token: 16 random bytes hex-encoded to 32 characters.
pub fn generate_controller_token() -> Result<String, TimerError> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; CONTROLLER_TOKEN_BYTES];

    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!(target: "timer.ids", error = %e, "Failed to generate random bytes for controller token");
        TimerError::Internal("RNG failure".to_string())
    })?;

    Ok(hex::encode(bytes))
}

/// Constant-time token comparison.
#[must_use]
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    ring::constant_time::verify_slices_are_equal(expected.as_bytes(), presented.as_bytes()).is_ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_alphabet_excludes_confusable_symbols() {
        let alphabet = CodeAlphabet::default();
        for ch in ['0', 'O', '1', 'I', 'L'] {
            assert!(!alphabet.contains(ch), "'{ch}' should be excluded");
        }
        assert_eq!(alphabet.len(), 31);
    }

    #[test]
    fn test_alphabet_rejects_invalid_input() {
        assert_eq!(CodeAlphabet::new("A"), Err(AlphabetError::TooFewSymbols));
        assert_eq!(CodeAlphabet::new(""), Err(AlphabetError::TooFewSymbols));
        assert_eq!(
            CodeAlphabet::new("AB-C"),
            Err(AlphabetError::InvalidSymbol('-'))
        );
        assert_eq!(
            CodeAlphabet::new("ABCA"),
            Err(AlphabetError::DuplicateSymbol('A'))
        );
        assert_eq!(
            CodeAlphabet::new("abA"),
            Err(AlphabetError::DuplicateSymbol('A'))
        );
    }

    #[test]
    fn test_alphabet_uppercases_letters() {
        let alphabet = CodeAlphabet::new("xyz9").unwrap();
        assert!(alphabet.contains('X'));
        assert!(!alphabet.contains('x'));
    }

    #[test]
    fn test_generate_session_code_format() {
        let alphabet = CodeAlphabet::default();
        for _ in 0..100 {
            let code = generate_session_code(&alphabet, DEFAULT_CODE_LENGTH, |_| false).unwrap();
            assert_eq!(code.len(), DEFAULT_CODE_LENGTH);
            assert!(code.chars().all(|c| alphabet.contains(c)), "bad code {code}");
        }
    }

    #[test]
    fn test_generate_session_code_retries_on_collision() {
        let alphabet = CodeAlphabet::new("AB").unwrap();
        let taken: HashSet<String> = ["AA", "AB", "BA"].iter().map(|s| s.to_string()).collect();

        for _ in 0..20 {
            let code = generate_session_code(&alphabet, 2, |c| taken.contains(c)).unwrap();
            assert_eq!(code, "BB");
        }
    }

    #[test]
    fn test_generate_session_code_gives_up_when_space_exhausted() {
        let alphabet = CodeAlphabet::new("AB").unwrap();
        let result = generate_session_code(&alphabet, 1, |_| true);
        assert!(matches!(result, Err(TimerError::Internal(_))));
    }

    #[test]
    fn test_generate_session_code_uses_whole_alphabet() {
        let alphabet = CodeAlphabet::new("ABC").unwrap();
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let code = generate_session_code(&alphabet, 8, |_| false).unwrap();
            seen.extend(code.chars());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_generate_controller_token_format() {
        let token = generate_controller_token().unwrap();
        assert_eq!(token.len(), CONTROLLER_TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_controller_token_uniqueness() {
        let a = generate_controller_token().unwrap();
        let b = generate_controller_token().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc123", "abc124"));
        assert!(!tokens_match("abc123", "abc12"));
        assert!(!tokens_match("abc123", ""));
    }
}
