/*
    Copyright (C) 2023  OqtaDrive developers

    This file is part of OqtaDrive, a Sinclair Microdrive emulator.

    For the full copyright notice, see the lib.rs file.
*/
//! Translation of Spectrum file names into printable ASCII.

// BASIC keyword tokens 0xa5 through 0xff
const KEYWORDS: [&str; 91] = [
    "RND", "INKEY$", "PI", "FN", "POINT", "SCREEN$", "ATTR", "AT", "TAB",
    "VAL$", "CODE", "VAL", "LEN", "SIN", "COS", "TAN", "ASN", "ACS", "ATN",
    "LN", "EXP", "INT", "SQR", "SGN", "ABS", "PEEK", "IN", "USR", "STR$",
    "CHR$", "NOT", "BIN", "OR", "AND", "<=", ">=", "<>", "LINE", "THEN",
    "TO", "STEP", "DEF FN", "CAT", "FORMAT", "MOVE", "ERASE", "OPEN #",
    "CLOSE #", "MERGE", "VERIFY", "BEEP", "CIRCLE", "INK", "PAPER", "FLASH",
    "BRIGHT", "INVERSE", "OVER", "OUT", "LPRINT", "LLIST", "STOP", "READ",
    "DATA", "RESTORE", "NEW", "BORDER", "CONTINUE", "DIM", "REM", "FOR",
    "GO TO", "GO SUB", "INPUT", "LOAD", "LIST", "LET", "PAUSE", "NEXT",
    "POKE", "PRINT", "PLOT", "RUN", "SAVE", "RANDOMIZE", "IF", "CLS",
    "DRAW", "CLEAR", "RETURN", "COPY",
];

const FIRST_KEYWORD: u8 = 0xa5;

/// Translates a Spectrum file name into printable ASCII: BASIC keyword
/// tokens map to their reserved words, all other non printable characters
/// map to `-`. Names starting with a NUL byte render empty.
pub fn translate(name: &[u8]) -> String {
    if name.first() == Some(&0) {
        return String::new();
    }
    let mut out = String::with_capacity(name.len());
    for &b in name {
        if b >= FIRST_KEYWORD {
            out.push_str(KEYWORDS[(b - FIRST_KEYWORD) as usize]);
        } else if (0x20..0x80).contains(&b) {
            out.push(b as char);
        } else {
            out.push('-');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_pass_through() {
        assert_eq!(translate(b"run       "), "run       ");
        assert_eq!(translate(b"PacMan"), "PacMan");
    }

    #[test]
    fn keyword_tokens_expand() {
        assert_eq!(translate(&[0xa5]), "RND");
        assert_eq!(translate(&[0xf7, b'x']), "RUNx");
        assert_eq!(translate(&[0xcf]), "CAT");
        assert_eq!(translate(&[0xff]), "COPY");
    }

    #[test]
    fn non_printables_dashed() {
        assert_eq!(translate(&[b'a', 0x07, b'b']), "a-b");
        assert_eq!(translate(&[0x9f]), "-");
    }

    #[test]
    fn nul_prefixed_names_blank() {
        assert_eq!(translate(&[0x00, b'a']), "");
    }
}
