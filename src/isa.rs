//! Instruction set and on-disk image format.
//!
//! A program image is a JSON object with two arrays: `data` (the initial data
//! memory, one cell per element) and `code` (one instruction per element,
//! indexed by program counter). Character cells are persisted as one-character
//! JSON strings purely for readability; in memory every cell is a signed
//! integer holding the code point.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Writing an integer here appends its decimal form to the output buffer.
pub const INT_OUT_PORT: i64 = 0;
/// Writing an integer here appends the corresponding character to the output buffer.
pub const CHAR_OUT_PORT: i64 = 1;
/// Reading from here consumes one character from the input buffer (0 on EOF).
pub const READ_PORT: i64 = 2;

/// Number of reserved memory-mapped cells at the bottom of data memory.
/// Variables and string literals are laid out starting at this address.
pub const MMIO_CELLS: usize = 3;

/// The closed opcode set of the stack machine.
///
/// `Halt` deliberately has no microprogram entry; decoding it ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    Nop,
    Lit,
    Load,
    Store,
    Dup,
    Over,
    Add,
    Sub,
    And,
    Or,
    Inv,
    Neg,
    IsNeg,
    Jmp,
    Jnz,
    Call,
    Ret,
    Halt,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Nop => "nop",
            Opcode::Lit => "lit",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Dup => "dup",
            Opcode::Over => "over",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Inv => "inv",
            Opcode::Neg => "neg",
            Opcode::IsNeg => "is_neg",
            Opcode::Jmp => "jmp",
            Opcode::Jnz => "jnz",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Halt => "halt",
        };
        write!(f, "{name}")
    }
}

/// One machine instruction: an opcode plus an optional argument.
///
/// The argument is required for `Lit` (the literal value) and for
/// `Jmp`/`Jnz`/`Call` (the target instruction index); other opcodes ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    #[serde(default)]
    pub arg: Option<i64>,
}

impl Instruction {
    pub fn plain(opcode: Opcode) -> Self {
        Instruction { opcode, arg: None }
    }

    pub fn with_arg(opcode: Opcode, arg: i64) -> Self {
        Instruction {
            opcode,
            arg: Some(arg),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.arg {
            Some(arg) => write!(f, "{} {}", self.opcode, arg),
            None => write!(f, "{}", self.opcode),
        }
    }
}

/// One cell of the serialized data segment.
///
/// Untagged: an integer serializes as a JSON number, a character as a
/// one-character JSON string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataCell {
    Int(i64),
    Char(char),
}

impl DataCell {
    /// The in-memory value of the cell: characters become their code points.
    pub fn to_word(self) -> i64 {
        match self {
            DataCell::Int(value) => value,
            DataCell::Char(c) => c as i64,
        }
    }
}

/// A translated program: initial data memory plus the instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub data: Vec<DataCell>,
    pub code: Vec<Instruction>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("malformed image: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Image {
    pub fn to_json(&self) -> Result<String, ImageError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ImageError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The data segment as plain integers, ready to load into the data path.
    pub fn data_words(&self) -> Vec<i64> {
        self.data.iter().map(|cell| cell.to_word()).collect()
    }
}
