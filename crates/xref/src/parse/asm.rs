//! Heuristic parser for assembly sources.
//!
//! Labels are definitions and branch/call instructions whose first operand is
//! a bare symbol are calls. The instruction set is never detected, so the
//! mnemonic list is the union of several architectures. Branches that take
//! registers or comparison operands before the target are left out rather
//! than misparsed.

use std::path::Path;

use regex::Regex;

use super::{
    read_file, LineMatch, LineMatcher, LineSymbols, SymbolParser, DEFINE_PATTERN, INCLUDE_PATTERN,
};
use crate::{Category, Result, Symbol};

/// Extensions handled by the assembly parser unless configured otherwise.
pub const DEFAULT_EXTENSIONS: &[&str] = &["s", "asm"];

const LABEL_PATTERN: &str = r"^[ \t]*([A-Za-z._][A-Za-z0-9._$@]*)[ \t]*:";

// Register-indirect forms (bx, blr) and compare-and-branch forms (cbz) are
// omitted.
const ARM: &[&str] = &[
    "b", "beq", "bne", "bcs", "bhs", "bcc", "blo", "bmi", "bpl", "bvs", "bvc", "bhi", "bls",
    "bge", "blt", "bgt", "ble", "bal", "bl", "bleq", "blne", "blcs", "blhs", "blcc", "bllo",
    "blmi", "blpl", "blvs", "blvc", "blhi", "blls", "blge", "bllt", "blgt", "blle", "blal", "blx",
    "blxeq", "blxne", "blxcs", "blxhs", "blxcc", "blxlo", "blxmi", "blxpl", "blxvs", "blxvc",
    "blxhi", "blxls", "blxge", "blxlt", "blxgt", "blxle", "blxal",
];

// brbc/brbs take a bit index first
const AVR: &[&str] = &[
    "brcc", "brcs", "breq", "brge", "brhc", "brhs", "brid", "brie", "brlo", "brlt", "brmi",
    "brne", "brpl", "brsh", "brtc", "brts", "brvc", "brvs", "jmp",
];

// beq and friends compare registers before the target
const MIPS: &[&str] = &["j", "jal"];

const POWERPC: &[&str] = &["b", "ba", "bl", "bla", "blt", "bdnz"];

const RISCV: &[&str] = &["jal"];

const X86: &[&str] = &[
    "call", "callq", "ja", "jae", "jb", "jbe", "jc", "jcxz", "je", "jecxz", "jg", "jge", "jl",
    "jle", "jmp", "jna", "jnae", "jnb", "jnbe", "jnc", "jne", "jng", "jnge", "jnl", "jnle", "jno",
    "jnp", "jns", "jnz", "jo", "jp", "jpe", "jpo", "js", "jz",
];

/// All recognised branch mnemonics, deduplicated, in first-seen order.
pub fn branch_mnemonics() -> Vec<&'static str> {
    let mut seen = Vec::new();
    for mnemonic in [ARM, AVR, MIPS, POWERPC, RISCV, X86].into_iter().flatten() {
        if !seen.contains(mnemonic) {
            seen.push(*mnemonic);
        }
    }
    seen
}

/// Pattern-based symbol extractor for assembly.
#[derive(Debug)]
pub struct AsmParser {
    define: Regex,
    include: Regex,
    label: Regex,
    call: Regex,
}

impl AsmParser {
    pub fn new() -> Result<Self> {
        let call = format!(
            r"^[ \t]*(?:{})[ \t]+([A-Za-z._][A-Za-z0-9._$@]*)",
            branch_mnemonics().join("|")
        );
        Ok(Self {
            define: Regex::new(DEFINE_PATTERN)?,
            include: Regex::new(INCLUDE_PATTERN)?,
            label: Regex::new(LABEL_PATTERN)?,
            call: Regex::new(&call)?,
        })
    }

    /// Lazily extract symbols from already-decoded source text.
    pub fn symbols<'a>(&'a self, path: &'a Path, source: &'a str) -> LineSymbols<'a, Self> {
        LineSymbols::new(self, path, source)
    }
}

impl LineMatcher for AsmParser {
    fn match_line(&self, line: &str) -> Option<LineMatch> {
        if let Some(caps) = self.define.captures(line) {
            return LineMatch::from_group(Category::Definition, &caps, 1);
        }
        if let Some(caps) = self.include.captures(line) {
            return LineMatch::include(&caps, 1);
        }
        if let Some(caps) = self.label.captures(line) {
            return LineMatch::from_group(Category::Definition, &caps, 1);
        }
        self.call
            .captures(line)
            .and_then(|caps| LineMatch::from_group(Category::FunctionCall, &caps, 1))
    }
}

impl SymbolParser for AsmParser {
    fn name(&self) -> &str {
        "asm"
    }

    fn parse(&self, path: &Path) -> Result<Vec<Symbol>> {
        let contents = read_file(path)?;
        self.parse_contents(path, &contents)
    }

    fn parse_contents(&self, path: &Path, contents: &[u8]) -> Result<Vec<Symbol>> {
        let source = String::from_utf8_lossy(contents);
        Ok(self.symbols(path, &source).collect())
    }
}
