//! Code generation: variable allocation, word definitions, per-token
//! emission, and jump/call address patching.
//!
//! Emission produces one instruction list per token (control words may leave
//! a placeholder that a later token fills in). Jump and call arguments are
//! list indices until the final patching pass rewrites them to flat program
//! addresses.

use std::collections::{HashMap, HashSet};

use super::{lexer, SourceError};
use crate::isa::{DataCell, Image, Instruction, Opcode, CHAR_OUT_PORT, INT_OUT_PORT, MMIO_CELLS, READ_PORT};

/// What kind of construct pushed a placeholder onto the jump-patch stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairKind {
    Loop,
    Conditional,
    Definition,
}

/// Directly mapped operator words.
fn primitive(token: &str) -> Option<Vec<Instruction>> {
    let instructions = match token {
        "+" => vec![Instruction::plain(Opcode::Add)],
        "-" => vec![Instruction::plain(Opcode::Sub)],
        "dup" => vec![Instruction::plain(Opcode::Dup)],
        "over" => vec![Instruction::plain(Opcode::Over)],
        "key" => vec![
            Instruction::with_arg(Opcode::Lit, READ_PORT),
            Instruction::plain(Opcode::Load),
        ],
        "emit" => vec![
            Instruction::with_arg(Opcode::Lit, CHAR_OUT_PORT),
            Instruction::plain(Opcode::Store),
        ],
        "." => vec![
            Instruction::with_arg(Opcode::Lit, INT_OUT_PORT),
            Instruction::plain(Opcode::Store),
        ],
        "!" => vec![Instruction::plain(Opcode::Store)],
        "@" => vec![Instruction::plain(Opcode::Load)],
        "<" => vec![
            Instruction::plain(Opcode::Sub),
            Instruction::plain(Opcode::IsNeg),
        ],
        ">" => vec![
            Instruction::plain(Opcode::Sub),
            Instruction::plain(Opcode::Neg),
            Instruction::plain(Opcode::IsNeg),
        ],
        "=" => vec![
            Instruction::plain(Opcode::Sub),
            Instruction::plain(Opcode::Inv),
        ],
        "or" => vec![Instruction::plain(Opcode::Or)],
        "and" => vec![Instruction::plain(Opcode::And)],
        "invert" => vec![Instruction::plain(Opcode::Inv)],
        _ => return None,
    };
    Some(instructions)
}

/// Scan for `variable NAME [N allot]`, allocate addresses past the MMIO
/// ports, and remove the declarations from the token stream. Returns the
/// remaining tokens, the name→address map, and the data segment size.
fn collect_variables(
    tokens: Vec<String>,
) -> Result<(Vec<String>, HashMap<String, i64>, usize), SourceError> {
    let mut kept = Vec::new();
    let mut addresses = HashMap::new();
    let mut next = MMIO_CELLS as i64;

    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] != "variable" {
            kept.push(tokens[i].clone());
            i += 1;
            continue;
        }

        let name = tokens
            .get(i + 1)
            .ok_or(SourceError::MissingVariableName)?
            .clone();
        if addresses.contains_key(&name) {
            return Err(SourceError::DuplicateVariable(name));
        }
        tracing::debug!(name = %name, address = next, "variable allocated");
        addresses.insert(name, next);
        next += 1;
        i += 2;

        // optional `N allot` reserving N extra cells
        if tokens.get(i + 1).map(String::as_str) == Some("allot") {
            let count_token = &tokens[i];
            let count: i64 = count_token
                .parse()
                .ok()
                .filter(|count| *count >= 0)
                .ok_or_else(|| SourceError::BadAllotCount(count_token.clone()))?;
            next += count;
            i += 2;
        }
    }

    Ok((kept, addresses, next as usize))
}

/// Collect the names of all `: NAME … ;` definitions.
fn collect_functions(tokens: &[String]) -> HashSet<String> {
    let mut names = HashSet::new();
    for pair in tokens.windows(2) {
        if pair[0] == ":" {
            names.insert(pair[1].clone());
        }
    }
    names
}

/// Generate the image for a balanced token stream.
pub fn generate(tokens: Vec<String>) -> Result<Image, SourceError> {
    let (tokens, variables, data_size) = collect_variables(tokens)?;
    let functions = collect_functions(&tokens);

    let mut data: Vec<DataCell> = vec![DataCell::Int(0); data_size];

    // one scratch cell shared by every `+!`, used to spill the address
    let scratch = if tokens.iter().any(|token| token == "+!") {
        data.push(DataCell::Int(0));
        Some(data.len() as i64 - 1)
    } else {
        None
    };

    let mut code: Vec<Vec<Instruction>> = Vec::new();
    let mut jump_stack: Vec<(PairKind, usize)> = Vec::new();
    let mut function_entries: HashMap<String, usize> = HashMap::new();
    let mut call_fixups: Vec<(usize, String)> = Vec::new();

    let mut previous: Option<&str> = None;
    for token in &tokens {
        if previous == Some(":") {
            // the word being defined: its list is the entry point
            function_entries.insert(token.clone(), code.len());
            code.push(vec![Instruction::plain(Opcode::Nop)]);
            previous = Some(token.as_str());
            continue;
        }

        match token.as_str() {
            "begin" => {
                jump_stack.push((PairKind::Loop, code.len()));
                code.push(Vec::new());
            }
            "until" => match jump_stack.pop() {
                Some((PairKind::Loop, begin)) => {
                    code[begin] = vec![Instruction::plain(Opcode::Nop)];
                    code.push(vec![
                        Instruction::plain(Opcode::Inv),
                        Instruction::with_arg(Opcode::Jnz, begin as i64),
                    ]);
                }
                _ => return Err(SourceError::UnbalancedLoop),
            },
            "if" => {
                jump_stack.push((PairKind::Conditional, code.len()));
                code.push(Vec::new());
            }
            "then" => match jump_stack.pop() {
                Some((PairKind::Conditional, cond)) => {
                    code[cond] = vec![
                        Instruction::plain(Opcode::Inv),
                        Instruction::with_arg(Opcode::Jnz, code.len() as i64),
                    ];
                    code.push(vec![Instruction::plain(Opcode::Nop)]);
                }
                _ => return Err(SourceError::UnbalancedConditional),
            },
            ":" => {
                jump_stack.push((PairKind::Definition, code.len()));
                code.push(Vec::new());
            }
            ";" => match jump_stack.pop() {
                Some((PairKind::Definition, colon)) => {
                    code.push(vec![Instruction::plain(Opcode::Ret)]);
                    code[colon] = vec![Instruction::with_arg(Opcode::Jmp, code.len() as i64)];
                }
                _ => return Err(SourceError::UnbalancedDefinition),
            },
            "+!" => {
                // ( n addr -- ): spill the address, reload it around the sum
                let tmp = match scratch {
                    Some(address) => address,
                    None => return Err(SourceError::UnknownWord(token.clone())),
                };
                code.push(vec![
                    Instruction::with_arg(Opcode::Lit, tmp),
                    Instruction::plain(Opcode::Store),
                    Instruction::with_arg(Opcode::Lit, tmp),
                    Instruction::plain(Opcode::Load),
                    Instruction::plain(Opcode::Load),
                    Instruction::plain(Opcode::Add),
                    Instruction::with_arg(Opcode::Lit, tmp),
                    Instruction::plain(Opcode::Load),
                    Instruction::plain(Opcode::Store),
                ]);
            }
            _ if token.starts_with(".\"") => {
                let contents = lexer::string_contents(token);
                let start = data.len() as i64;
                for c in contents.chars() {
                    data.push(DataCell::Char(c));
                }
                let end = data.len() as i64;

                code.push(vec![Instruction::with_arg(Opcode::Lit, start)]);
                let print_loop = code.len() as i64;
                code.push(vec![
                    Instruction::plain(Opcode::Dup),
                    Instruction::plain(Opcode::Load),
                    Instruction::with_arg(Opcode::Lit, CHAR_OUT_PORT),
                    Instruction::plain(Opcode::Store),
                    Instruction::with_arg(Opcode::Lit, 1),
                    Instruction::plain(Opcode::Add),
                    Instruction::plain(Opcode::Dup),
                    Instruction::with_arg(Opcode::Lit, end),
                    Instruction::plain(Opcode::Sub),
                    Instruction::plain(Opcode::IsNeg),
                    Instruction::with_arg(Opcode::Jnz, print_loop),
                ]);
            }
            _ => {
                if let Some(instructions) = primitive(token) {
                    code.push(instructions);
                } else if functions.contains(token.as_str()) {
                    call_fixups.push((code.len(), token.clone()));
                    code.push(vec![Instruction::plain(Opcode::Call)]);
                } else if let Some(&address) = variables.get(token.as_str()) {
                    code.push(vec![Instruction::with_arg(Opcode::Lit, address)]);
                } else if let Ok(value) = token.parse::<i64>() {
                    code.push(vec![Instruction::with_arg(Opcode::Lit, value)]);
                } else {
                    return Err(SourceError::UnknownWord(token.clone()));
                }
            }
        }
        previous = Some(token.as_str());
    }

    // calls may precede the definition; resolve them now
    for (list, name) in call_fixups {
        match function_entries.get(&name) {
            Some(&entry) => code[list][0].arg = Some(entry as i64),
            None => return Err(SourceError::UnknownWord(name)),
        }
    }

    Ok(Image {
        data,
        code: patch_and_flatten(code),
    })
}

/// Rewrite jump and call targets from list indices to flat instruction
/// addresses, then append the trailing `halt`.
fn patch_and_flatten(code: Vec<Vec<Instruction>>) -> Vec<Instruction> {
    let mut starts = Vec::with_capacity(code.len() + 1);
    let mut address: i64 = 0;
    for list in &code {
        starts.push(address);
        address += list.len() as i64;
    }
    starts.push(address);

    let mut flat = Vec::with_capacity(address as usize + 1);
    for list in code {
        for mut instruction in list {
            if matches!(
                instruction.opcode,
                Opcode::Call | Opcode::Jmp | Opcode::Jnz
            ) {
                if let Some(target) = instruction.arg {
                    instruction.arg = Some(starts[target as usize]);
                }
            }
            flat.push(instruction);
        }
    }
    flat.push(Instruction::plain(Opcode::Halt));
    flat
}
