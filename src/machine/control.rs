//! The microcoded control unit.
//!
//! A fixed microprogram ROM drives the data path one microinstruction per
//! tick. `MICROPROGRAM[0]` is the instruction fetch: it dispatches the current
//! opcode to the first microstep of its sequence via [`opcode_entry`]. Every
//! sequence ends by asserting `MPC_ZERO`, so the microprogram counter returns
//! to fetch and the next macro-instruction begins.

use crate::isa::{Instruction, Opcode};
use crate::machine::datapath::DataPath;
use crate::machine::signals::Signals;
use crate::micro;

/// The microprogram ROM. Indices are microprogram-counter values; the
/// per-opcode entry points live in [`opcode_entry`].
pub const MICROPROGRAM: [Signals; 63] = [
    // 0 - instruction fetch
    micro!(MPC_OPCODE | LATCH_MPC),
    // NOP
    micro!(PC_NEXT | LATCH_PC | MPC_ZERO | LATCH_MPC), // 1
    // LIT
    micro!(SAVE_LIT | MPC_NEXT | LATCH_MPC),                            // 2
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),                        // 3
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 4
    micro!(WRITE_FROM_TOS | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 5
    // LOAD
    micro!(READ_MEM | MPC_NEXT | LATCH_MPC),                            // 6
    micro!(WRITE_FROM_TOS | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 7
    // STORE
    micro!(WRITE_MEM | MPC_NEXT | LATCH_MPC), // 8
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 9
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 10
    micro!(READ_TO_TOS | MPC_NEXT | LATCH_MPC), // 11
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 12
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC), // 13
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 14
    // DUP
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 15
    micro!(WRITE_FROM_TOS | MPC_NEXT | LATCH_MPC),                           // 16
    micro!(READ_TO_TOS1 | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC),        // 17
    // OVER
    micro!(TOS_LEFT | ZERO_RIGHT | SUM_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 18
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),                               // 19
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),   // 20
    micro!(WRITE_FROM_TOS | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC),        // 21
    // ADD
    micro!(TOS_LEFT | TOS_RIGHT | SUM_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 22
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),  // 23
    micro!(WRITE_FROM_TOS | MPC_NEXT | LATCH_MPC),                            // 24
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),  // 25
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),                              // 26
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 27
    // SUB
    micro!(TOS_LEFT | TOS_RIGHT | SUB_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 28
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),  // 29
    micro!(WRITE_FROM_TOS | MPC_NEXT | LATCH_MPC),                            // 30
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),  // 31
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),                              // 32
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 33
    // AND
    micro!(TOS_LEFT | TOS_RIGHT | AND_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 34
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),  // 35
    micro!(WRITE_FROM_TOS | MPC_NEXT | LATCH_MPC),                            // 36
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC),  // 37
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),                              // 38
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 39
    // OR
    micro!(TOS_LEFT | TOS_RIGHT | OR_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 40
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 41
    micro!(WRITE_FROM_TOS | MPC_NEXT | LATCH_MPC),                           // 42
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 43
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),                             // 44
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC), // 45
    // INV
    micro!(ZERO_LEFT | TOS_RIGHT | INV_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 46
    micro!(WRITE_FROM_TOS | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC),        // 47
    // NEG
    micro!(ZERO_LEFT | TOS_RIGHT | NEG_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 48
    micro!(WRITE_FROM_TOS | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC),        // 49
    // ISNEG
    micro!(ZERO_LEFT | TOS_RIGHT | IS_NEG_ALU | SAVE_ALU | MPC_NEXT | LATCH_MPC), // 50
    micro!(WRITE_FROM_TOS | MPC_ZERO | LATCH_MPC | PC_NEXT | LATCH_PC),           // 51
    // JMP
    micro!(MPC_ZERO | LATCH_MPC | PC_JUMP | LATCH_PC), // 52
    // JNZ: branch on the flag first, then pop it
    micro!(MPC_NEXT | LATCH_MPC | PC_JNZ | LATCH_PC), // 53
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 54
    micro!(READ_TO_TOS | MPC_NEXT | LATCH_MPC),       // 55
    micro!(DEC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_NEXT | LATCH_MPC), // 56
    micro!(READ_TO_TOS1 | MPC_NEXT | LATCH_MPC),      // 57
    micro!(INC_LEFT | SP_RIGHT | SUM_ALU | LATCH_SP | MPC_ZERO | LATCH_MPC), // 58
    // CALL
    micro!(PUSH_RET_STACK | MPC_NEXT | LATCH_MPC),     // 59
    micro!(MPC_ZERO | LATCH_MPC | PC_JUMP | LATCH_PC), // 60
    // RET: read the return address, then drop it
    micro!(MPC_NEXT | LATCH_MPC | PC_RET | LATCH_PC), // 61
    micro!(POP_RET_STACK | MPC_ZERO | LATCH_MPC),     // 62
];

/// First microstep of each opcode's sequence.
///
/// `Halt` is the one opcode with no microprogram entry: decoding it ends the
/// run rather than starting a sequence.
pub fn opcode_entry(opcode: Opcode) -> Option<usize> {
    match opcode {
        Opcode::Nop => Some(1),
        Opcode::Lit => Some(2),
        Opcode::Load => Some(6),
        Opcode::Store => Some(8),
        Opcode::Dup => Some(15),
        Opcode::Over => Some(18),
        Opcode::Add => Some(22),
        Opcode::Sub => Some(28),
        Opcode::And => Some(34),
        Opcode::Or => Some(40),
        Opcode::Inv => Some(46),
        Opcode::Neg => Some(48),
        Opcode::IsNeg => Some(50),
        Opcode::Jmp => Some(52),
        Opcode::Jnz => Some(53),
        Opcode::Call => Some(59),
        Opcode::Ret => Some(61),
        Opcode::Halt => None,
    }
}

/// A fatal machine condition. These indicate a broken image or a microprogram
/// bug, never normal termination.
#[derive(Debug, thiserror::Error)]
pub enum MachineFault {
    #[error("nothing chosen on left alu input at mpc {mpc}")]
    EmptyLeftAluInput { mpc: usize },
    #[error("nothing chosen on right alu input at mpc {mpc}")]
    EmptyRightAluInput { mpc: usize },
    #[error("program counter {pc} is outside the program")]
    ProgramCounterOutOfRange { pc: usize },
    #[error("instruction {instruction} at {pc} needs an argument")]
    MissingArgument { pc: usize, instruction: Instruction },
}

/// Why the run loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The decoder hit `halt`.
    Halted,
    /// The caller-provided instruction limit was reached.
    LimitExceeded,
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub output: String,
    pub instr_count: u64,
    pub ticks: u64,
    pub stop: StopReason,
}

/// Outcome of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Running,
    Halted,
}

/// Owns the program, the data path and all sequencing state.
pub struct ControlUnit {
    program: Vec<Instruction>,
    pub data_path: DataPath,
    pub program_counter: usize,
    pub microprogram_counter: usize,
    return_stack: Vec<usize>,
    return_stack_pointer: i64,
    tick: u64,
}

impl ControlUnit {
    pub fn new(program: Vec<Instruction>, data_path: DataPath) -> Self {
        ControlUnit {
            program,
            data_path,
            program_counter: 0,
            microprogram_counter: 0,
            return_stack: vec![0],
            return_stack_pointer: 0,
            tick: 0,
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    fn current_instruction(&self) -> Result<&Instruction, MachineFault> {
        self.program
            .get(self.program_counter)
            .ok_or(MachineFault::ProgramCounterOutOfRange {
                pc: self.program_counter,
            })
    }

    fn current_arg(&self) -> Result<i64, MachineFault> {
        let instruction = self.current_instruction()?;
        instruction.arg.ok_or(MachineFault::MissingArgument {
            pc: self.program_counter,
            instruction: instruction.clone(),
        })
    }

    fn return_stack_top(&self) -> usize {
        usize::try_from(self.return_stack_pointer)
            .ok()
            .and_then(|rsp| self.return_stack.get(rsp).copied())
            .unwrap_or(0)
    }

    fn latch_program_counter(&mut self, microcode: Signals) -> Result<(), MachineFault> {
        if microcode.contains(Signals::PC_NEXT) {
            self.program_counter += 1;
        } else if microcode.contains(Signals::PC_JNZ) {
            self.program_counter = if self.data_path.is_not_zero() {
                self.current_arg()? as usize
            } else {
                self.program_counter + 1
            };
        } else if microcode.contains(Signals::PC_JUMP) {
            self.program_counter = self.current_arg()? as usize;
        } else if microcode.contains(Signals::PC_RET) {
            self.program_counter = self.return_stack_top();
        }
        Ok(())
    }

    /// Latch the microprogram counter. Returns `Halted` when the fetch step
    /// dispatches the halt opcode.
    fn latch_microprogram_counter(
        &mut self,
        microcode: Signals,
    ) -> Result<StepOutcome, MachineFault> {
        if microcode.contains(Signals::MPC_NEXT) {
            self.microprogram_counter += 1;
        } else if microcode.contains(Signals::MPC_OPCODE) {
            let opcode = self.current_instruction()?.opcode;
            match opcode_entry(opcode) {
                Some(entry) => self.microprogram_counter = entry,
                None => return Ok(StepOutcome::Halted),
            }
        } else if microcode.contains(Signals::MPC_ZERO) {
            self.microprogram_counter = 0;
        }
        Ok(StepOutcome::Running)
    }

    /// Apply one microinstruction: resolve the ALU, move data, latch
    /// registers, then update PC and MPC.
    fn decode_and_execute_signals(
        &mut self,
        microcode: Signals,
    ) -> Result<StepOutcome, MachineFault> {
        let mpc = self.microprogram_counter;

        let mut alu_res = 0;
        if let Some(op) = microcode.alu_op() {
            let left = if microcode.contains(Signals::TOS_LEFT) {
                self.data_path.tos1
            } else if microcode.contains(Signals::INC_LEFT) {
                1
            } else if microcode.contains(Signals::DEC_LEFT) {
                -1
            } else if microcode.contains(Signals::ZERO_LEFT) {
                0
            } else {
                return Err(MachineFault::EmptyLeftAluInput { mpc });
            };

            let right = if microcode.contains(Signals::TOS_RIGHT) {
                self.data_path.tos
            } else if microcode.contains(Signals::SP_RIGHT) {
                self.data_path.stack_pointer
            } else if microcode.contains(Signals::ZERO_RIGHT) {
                0
            } else {
                return Err(MachineFault::EmptyRightAluInput { mpc });
            };

            alu_res = op.run(left, right);
            if microcode.contains(Signals::SAVE_ALU) {
                self.data_path.latch_tos(alu_res);
            }
        }

        if microcode.contains(Signals::READ_MEM) {
            let value = self.data_path.read_memory(self.data_path.tos);
            self.data_path.latch_tos(value);
        }
        if microcode.contains(Signals::WRITE_MEM) {
            self.data_path
                .write_memory(self.data_path.tos, self.data_path.tos1);
        }
        if microcode.contains(Signals::SAVE_LIT) {
            let arg = self.current_arg()?;
            self.data_path.latch_tos(arg);
        }

        if microcode.contains(Signals::LATCH_SP) {
            self.data_path.latch_sp(alu_res);
        }
        if microcode.contains(Signals::WRITE_FROM_TOS) {
            self.data_path.write_from_tos();
        }
        if microcode.contains(Signals::READ_TO_TOS) {
            let value = self.data_path.stack_entry();
            self.data_path.latch_tos(value);
        }
        if microcode.contains(Signals::READ_TO_TOS1) {
            let value = self.data_path.stack_entry();
            self.data_path.latch_tos1(value);
        }

        if microcode.contains(Signals::PUSH_RET_STACK) {
            self.return_stack_pointer += 1;
            let rsp = usize::try_from(self.return_stack_pointer).unwrap_or(0);
            let return_address = self.program_counter + 1;
            if rsp < self.return_stack.len() {
                self.return_stack[rsp] = return_address;
            } else {
                self.return_stack.push(return_address);
            }
        }
        if microcode.contains(Signals::POP_RET_STACK) {
            self.return_stack_pointer -= 1;
        }

        if microcode.contains(Signals::LATCH_PC) {
            self.latch_program_counter(microcode)?;
        }
        if microcode.contains(Signals::LATCH_MPC) {
            return self.latch_microprogram_counter(microcode);
        }
        Ok(StepOutcome::Running)
    }

    /// Run until halt or until `limit` instructions have been fetched.
    ///
    /// Hitting the limit is not an error: the warning is logged and whatever
    /// state accumulated so far is returned.
    pub fn run(&mut self, limit: u64) -> Result<RunReport, MachineFault> {
        let mut instr_counter: u64 = 0;
        let stop;

        loop {
            if self.microprogram_counter == 0 {
                instr_counter += 1;
                tracing::debug!(instr_counter, "instruction fetch");
            }

            let prev_mpc = self.microprogram_counter;
            let outcome = self.decode_and_execute_signals(MICROPROGRAM[prev_mpc])?;
            if outcome == StepOutcome::Halted {
                tracing::info!("program has ended with halt");
                stop = StopReason::Halted;
                break;
            }
            self.tick += 1;

            tracing::debug!(
                tick = self.tick,
                pc = self.program_counter,
                prev_mpc,
                mpc = self.microprogram_counter,
                tos = self.data_path.tos,
                tos1 = self.data_path.tos1,
                sp = self.data_path.stack_pointer,
                instruction = %self
                    .program
                    .get(self.program_counter)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );

            if instr_counter >= limit {
                tracing::warn!(limit, "limit exceeded");
                stop = StopReason::LimitExceeded;
                break;
            }
        }

        let output = self.data_path.output();
        tracing::info!(output = %output, "output buffer");
        Ok(RunReport {
            output,
            instr_count: instr_counter,
            ticks: self.tick,
            stop,
        })
    }
}
