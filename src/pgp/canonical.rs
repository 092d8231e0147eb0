//! Clear-sign framing and text canonicalization
//!
//! Signers and verifiers may disagree on line endings and trailing
//! whitespace, so the signed bytes are always the canonical form: every line
//! stripped of trailing spaces, tabs, CR and LF, lines joined with CRLF.
//! CR, LF and CRLF all terminate a line; a terminator at the very end of the
//! text does not open another (empty) line.

use crate::pgp::{PgpError, Result};

pub const BEGIN_SIGNED_MESSAGE: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
pub const BEGIN_SIGNATURE: &str = "-----BEGIN PGP SIGNATURE-----";

/// One line of input with its terminator ("" when unterminated)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    pub offset: usize,
    pub content: &'a str,
    pub terminator: &'a str,
}

/// Split on CR, LF and CRLF, keeping each line's terminator.
pub fn split_lines(text: &str) -> Vec<Line<'_>> {
    let bytes = text.as_bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let end = match bytes[i] {
            b'\r' if bytes.get(i + 1) == Some(&b'\n') => i + 2,
            b'\r' | b'\n' => i + 1,
            _ => {
                i += 1;
                continue;
            }
        };
        lines.push(Line {
            offset: start,
            content: &text[start..i],
            terminator: &text[i..end],
        });
        start = end;
        i = end;
    }

    if start < text.len() {
        lines.push(Line {
            offset: start,
            content: &text[start..],
            terminator: "",
        });
    }

    lines
}

fn is_trailing_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// The exact bytes a clear-text signature is computed over.
pub fn canonicalize(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 16);
    for (i, line) in split_lines(text).iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(line.content.trim_end_matches(is_trailing_whitespace).as_bytes());
    }
    out
}

/// A clear-signed message split into its text and its armored signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearSigned<'a> {
    /// Dash-unescaped text, as framed (not canonicalized)
    pub text: String,
    /// `-----BEGIN PGP SIGNATURE-----` through the end of input
    pub signature_block: &'a str,
}

impl<'a> ClearSigned<'a> {
    pub fn parse(input: &'a str) -> Result<Self> {
        let lines = split_lines(input);
        let mut rest = lines.iter();

        rest.by_ref()
            .find(|line| line.content.trim_end() == BEGIN_SIGNED_MESSAGE)
            .ok_or_else(|| PgpError::malformed("missing clear-signed message header"))?;

        // Armor headers ("Hash: SHA512") run until the first blank line.
        loop {
            let line = rest
                .next()
                .ok_or_else(|| PgpError::malformed("unterminated armor headers"))?;
            let header = line.content.trim_end();
            if header.is_empty() {
                break;
            }
            if !header.contains(": ") {
                return Err(PgpError::malformed(format!("invalid armor header {header:?}")));
            }
        }

        let mut body: Vec<&Line<'_>> = Vec::new();
        let signature_line = loop {
            let line = rest
                .next()
                .ok_or_else(|| PgpError::malformed("missing signature block"))?;
            if line.content.trim_end() == BEGIN_SIGNATURE {
                break line;
            }
            body.push(line);
        };

        let mut text = String::with_capacity(signature_line.offset);
        let last = body.len().saturating_sub(1);
        for (i, line) in body.iter().enumerate() {
            text.push_str(line.content.strip_prefix("- ").unwrap_or(line.content));
            // The final line ending belongs to the armor, not the text.
            if i != last {
                text.push_str(line.terminator);
            }
        }

        Ok(Self {
            text,
            signature_block: &input[signature_line.offset..],
        })
    }
}

/// Frame `text` and an armored signature as a clear-signed message.
pub fn frame(text: &str, hash_name: &str, armored_signature: &str) -> String {
    let mut out = String::with_capacity(text.len() + armored_signature.len() + 64);
    out.push_str(BEGIN_SIGNED_MESSAGE);
    out.push('\n');
    out.push_str("Hash: ");
    out.push_str(hash_name);
    out.push_str("\n\n");

    for line in split_lines(text) {
        if line.content.starts_with('-') {
            out.push_str("- ");
        }
        out.push_str(line.content);
        out.push_str(if line.terminator.is_empty() { "\n" } else { line.terminator });
    }

    out.push_str(armored_signature);
    out
}
