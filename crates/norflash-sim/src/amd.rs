//! AMD / Spansion command state machine

use crate::part::{BufferCycle, Mode, Pending, SimFlash};

const UNLOCK1_WORD: u32 = 0x555;
const UNLOCK2_WORD: u32 = 0x2AA;
const QUERY_WORD: u32 = 0x55;

const CMD_UNLOCK1: u8 = 0xAA;
const CMD_UNLOCK2: u8 = 0x55;
const CMD_RESET: u8 = 0xF0;
const CMD_CFI_QUERY: u8 = 0x98;
const CMD_AUTO_SELECT: u8 = 0x90;
const CMD_ERASE_SETUP: u8 = 0x80;
const CMD_ERASE_BLOCK: u8 = 0x30;
const CMD_ERASE_CHIP: u8 = 0x10;
const CMD_PROGRAM: u8 = 0xA0;
const CMD_UNLOCK_BYPASS: u8 = 0x20;
const CMD_WRITE_BUFFER: u8 = 0x25;
const CMD_PROGRAM_BUFFER: u8 = 0x29;
const CMD_ENTER_SECURED: u8 = 0x88;
const CMD_STATUS_READ: u8 = 0x70;
const CMD_STATUS_CLEAR: u8 = 0x71;
const CMD_SUSPEND: u8 = 0xB0;
const CMD_RESUME: u8 = 0x30;
const CMD_GROUP_SETUP: u8 = 0x60;
const CMD_GROUP_VERIFY: u8 = 0x40;

/// DQ6
const TOGGLE: u64 = 0x40;
/// DQ5
const EXCEEDED_TIMING: u64 = 0x20;
/// A6 selects unprotect in the group protect algorithm
const UNPROTECT_WORD_BIT: u32 = 0x40;

impl SimFlash {
    fn begin_embedded(&mut self, failed: bool) {
        self.mode = Mode::Embedded {
            toggles: self.config.busy_reads,
            failed,
        };
    }

    /// Answer a read while an embedded operation runs
    ///
    /// Once the busy reads are used up the part drops back to read array
    /// mode and the read returns data.
    pub(crate) fn amd_toggle_read(&mut self, offset: u32, toggles: u32, failed: bool) -> u64 {
        let running = failed || self.stuck || toggles > 0;
        if !running {
            self.mode = Mode::Array;
            return self.array_word(offset);
        }
        self.status_reads += 1;
        self.toggle_bit = !self.toggle_bit;
        if !failed {
            self.mode = Mode::Embedded {
                toggles: toggles.saturating_sub(1),
                failed,
            };
        }
        let mut value = if self.toggle_bit { TOGGLE } else { 0 };
        if failed {
            value |= EXCEEDED_TIMING;
        }
        self.replicate(value)
    }

    fn amd_program(&mut self, offset: u32, value: u64) {
        self.word_programs += 1;
        let failed = std::mem::take(&mut self.fail_next);
        if !failed && !self.is_protected(offset) {
            self.program_word(offset, value);
        }
        self.begin_embedded(failed);
    }

    fn amd_buffer_program(&mut self, block: Option<usize>, words: &[(u32, u64)]) {
        let width = self.layout().bus_width();
        let capacity = self.config.write_buffer_size() / width;
        let same_block = words.iter().all(|&(o, _)| self.block_index(o) == block);
        if words.is_empty() || words.len() as u32 > capacity || !same_block {
            log::debug!("sim: write buffer abort ({} words)", words.len());
            self.mode = Mode::Array;
            return;
        }
        let failed = std::mem::take(&mut self.fail_next);
        let start = words[0].0;
        if !failed && !self.is_protected(start) {
            for &(offset, value) in words {
                self.program_word(offset, value);
            }
            self.buffer_cycles.push(BufferCycle {
                start,
                words: words.len() as u32,
            });
        }
        self.begin_embedded(failed);
    }

    fn amd_erase(&mut self, offset: u32) {
        let failed = std::mem::take(&mut self.fail_next);
        if !failed && !self.is_protected(offset) {
            self.erase_block(offset);
        }
        self.begin_embedded(failed);
    }

    fn amd_erase_chip(&mut self) {
        let failed = std::mem::take(&mut self.fail_next);
        if !failed {
            let starts: Vec<u32> = self
                .geometry
                .regions()
                .iter()
                .flat_map(|r| (0..r.block_count).map(move |b| r.offset + b * r.block_size))
                .collect();
            for start in starts {
                if !self.is_protected(start) {
                    self.erase_block(start);
                }
            }
        }
        self.begin_embedded(failed);
    }

    /// Group protect setup; A6 high unprotects every group at once
    fn amd_group_setup(&mut self, offset: u32) {
        if self.block_word(offset) & UNPROTECT_WORD_BIT != 0 {
            self.protected.fill(false);
        } else {
            self.set_protected(offset, true);
        }
    }

    /// Third cycle after the two unlock cycles
    fn amd_unlocked(&mut self, offset: u32, word: u32, command: u8) {
        if std::mem::take(&mut self.erase_armed) {
            match command {
                CMD_ERASE_BLOCK => self.amd_erase(offset),
                CMD_ERASE_CHIP if word == UNLOCK1_WORD => self.amd_erase_chip(),
                other => log::debug!("sim: bad erase command 0x{:02x}", other),
            }
            return;
        }
        if command == CMD_WRITE_BUFFER {
            self.pending = Pending::BufferCount {
                block: self.block_index(offset),
            };
            return;
        }
        if word != UNLOCK1_WORD {
            log::debug!("sim: command 0x{:02x} at word 0x{:x}", command, word);
            return;
        }
        match command {
            CMD_AUTO_SELECT if self.secured_mapped => self.pending = Pending::ExitSecured,
            CMD_AUTO_SELECT => self.mode = Mode::Identifier,
            CMD_ERASE_SETUP => self.erase_armed = true,
            CMD_PROGRAM => self.pending = Pending::Program,
            CMD_UNLOCK_BYPASS => self.bypass = true,
            CMD_ENTER_SECURED => self.secured_mapped = true,
            other => log::debug!("sim: unknown AMD command 0x{:02x}", other),
        }
    }

    /// Handle one write cycle
    pub(crate) fn amd_cycle(&mut self, offset: u32, value: u64) {
        let command = self.command_byte(value);

        if let Mode::Embedded { .. } = self.mode {
            // Only a reset gets through while busy
            if command == Some(CMD_RESET) {
                self.mode = Mode::Array;
            }
            return;
        }

        match std::mem::take(&mut self.pending) {
            Pending::None => {}
            Pending::Program => {
                self.amd_program(offset, value);
                return;
            }
            Pending::BufferCount { block } => {
                if self.block_index(offset) != block {
                    log::debug!("sim: write buffer count outside the sector");
                    return;
                }
                let count = self.lane_value(value) + 1;
                self.pending = Pending::BufferLoad {
                    block,
                    remaining: count,
                    words: Vec::with_capacity(count as usize),
                };
                return;
            }
            Pending::BufferLoad {
                block,
                remaining,
                mut words,
            } => {
                words.push((offset, value));
                self.pending = if remaining > 1 {
                    Pending::BufferLoad {
                        block,
                        remaining: remaining - 1,
                        words,
                    }
                } else {
                    Pending::BufferConfirm { block, words }
                };
                return;
            }
            Pending::BufferConfirm { block, words } => {
                if command == Some(CMD_PROGRAM_BUFFER) && self.block_index(offset) == block {
                    self.amd_buffer_program(block, &words);
                } else {
                    log::debug!("sim: write buffer abort");
                    self.mode = Mode::Array;
                }
                return;
            }
            Pending::BypassReset => {
                if command == Some(0x00) {
                    self.bypass = false;
                }
                return;
            }
            Pending::ExitSecured => {
                if command == Some(0x00) {
                    self.secured_mapped = false;
                }
                return;
            }
            // Intel only
            Pending::EraseSetup | Pending::LockSetup | Pending::ReadyBusyConfig => {}
        }

        let Some(command) = command else {
            self.unlock_stage = 0;
            return;
        };
        let word = self.part_word(offset);

        if command == CMD_RESET {
            self.unlock_stage = 0;
            self.erase_armed = false;
            self.mode = Mode::Array;
            return;
        }

        if self.bypass {
            match command {
                CMD_PROGRAM => self.pending = Pending::Program,
                CMD_AUTO_SELECT => self.pending = Pending::BypassReset,
                other => log::debug!("sim: command 0x{:02x} in unlock bypass", other),
            }
            return;
        }

        match (self.unlock_stage, command) {
            (0, CMD_UNLOCK1) if word == UNLOCK1_WORD => {
                self.unlock_stage = 1;
                return;
            }
            (1, CMD_UNLOCK2) if word == UNLOCK2_WORD => {
                self.unlock_stage = 2;
                return;
            }
            (2, _) => {
                self.unlock_stage = 0;
                self.amd_unlocked(offset, word, command);
                return;
            }
            _ => self.unlock_stage = 0,
        }

        match command {
            CMD_CFI_QUERY if word == QUERY_WORD => self.mode = Mode::Query,
            CMD_STATUS_READ if word == UNLOCK1_WORD => self.mode = Mode::StatusRegister,
            CMD_STATUS_CLEAR if word == UNLOCK1_WORD => self.mode = Mode::Array,
            CMD_SUSPEND => self.mode = Mode::Array,
            CMD_RESUME => {}
            CMD_GROUP_SETUP => self.amd_group_setup(offset),
            CMD_GROUP_VERIFY => {
                if let Some(block) = self.block_index(offset) {
                    self.mode = Mode::ProtectVerify {
                        block: block as u32,
                    };
                }
            }
            other => log::trace!("sim: ignoring AMD cycle 0x{:02x} at word 0x{:x}", other, word),
        }
    }
}
