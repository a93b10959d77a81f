//! Intel command state machine

use crate::part::{status, BufferCycle, Mode, Pending, SimFlash};

const CMD_READ_ARRAY: u8 = 0xFF;
const CMD_READ_ARRAY_ALT: u8 = 0xF0;
const CMD_READ_ID: u8 = 0x90;
const CMD_CFI_QUERY: u8 = 0x98;
const CMD_READ_STATUS: u8 = 0x70;
const CMD_CLEAR_STATUS: u8 = 0x50;
const CMD_BLOCK_ERASE: u8 = 0x20;
const CMD_PROGRAM: u8 = 0x40;
const CMD_PROGRAM_ALT: u8 = 0x10;
const CMD_PROGRAM_PLATFORM: u8 = 0x41;
const CMD_WRITE_BUFFER: u8 = 0xE8;
const CMD_WRITE_BUFFER_PLATFORM: u8 = 0xE9;
const CMD_LOCK_SETUP: u8 = 0x60;
const CMD_LOCK_SET: u8 = 0x01;
const CMD_CONFIG_REG: u8 = 0x03;
const CMD_CONFIRM: u8 = 0xD0;
const CMD_SUSPEND: u8 = 0xB0;
const CMD_CONFIG: u8 = 0xB8;

/// Error bits raised for a malformed command sequence
const SEQUENCE_ERROR: u8 = status::ERASE_ERROR | status::PROGRAM_ERROR;

impl SimFlash {
    /// Answer a status read
    pub(crate) fn intel_status(&mut self) -> u64 {
        self.status_reads += 1;
        let busy = if self.stuck {
            true
        } else if self.busy_left > 0 {
            self.busy_left -= 1;
            true
        } else {
            false
        };
        let value = if busy {
            self.status
        } else {
            self.status | status::READY
        };
        self.replicate(u64::from(value))
    }

    fn begin_operation(&mut self) {
        self.busy_left = self.config.busy_reads;
        self.mode = Mode::Status;
    }

    fn sequence_error(&mut self) {
        log::debug!("sim: Intel command sequence error");
        self.status |= SEQUENCE_ERROR;
        self.mode = Mode::Status;
    }

    fn intel_program(&mut self, offset: u32, value: u64) {
        self.begin_operation();
        self.word_programs += 1;
        if self.is_protected(offset) {
            self.status |= status::PROGRAM_ERROR | status::BLOCK_LOCKED;
        } else if std::mem::take(&mut self.fail_next) {
            self.status |= status::PROGRAM_ERROR;
        } else {
            self.program_word(offset, value);
        }
    }

    fn intel_buffer_program(&mut self, block: Option<usize>, words: &[(u32, u64)]) {
        self.begin_operation();
        let Some(&(start, _)) = words.first() else {
            return;
        };
        let width = self.layout().bus_width();
        let capacity = self.config.write_buffer_size() / width;
        let same_block = words.iter().all(|&(o, _)| self.block_index(o) == block);
        if words.len() as u32 > capacity || !same_block {
            log::debug!("sim: bad write buffer load of {} words", words.len());
            self.status |= SEQUENCE_ERROR;
            return;
        }
        if self.is_protected(start) {
            self.status |= status::PROGRAM_ERROR | status::BLOCK_LOCKED;
            return;
        }
        if std::mem::take(&mut self.fail_next) {
            self.status |= status::PROGRAM_ERROR;
            return;
        }
        for &(offset, value) in words {
            self.program_word(offset, value);
        }
        self.buffer_cycles.push(BufferCycle {
            start,
            words: words.len() as u32,
        });
    }

    fn intel_erase(&mut self, offset: u32) {
        self.begin_operation();
        if self.is_protected(offset) {
            self.status |= status::ERASE_ERROR | status::BLOCK_LOCKED;
        } else if std::mem::take(&mut self.fail_next) {
            self.status |= status::ERASE_ERROR;
        } else {
            self.erase_block(offset);
        }
    }

    /// Handle one write cycle
    pub(crate) fn intel_cycle(&mut self, offset: u32, value: u64) {
        let command = self.command_byte(value);

        match std::mem::take(&mut self.pending) {
            Pending::None => {}
            Pending::Program => {
                self.intel_program(offset, value);
                return;
            }
            Pending::BufferCount { block } => {
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
                if command == Some(CMD_CONFIRM) {
                    self.intel_buffer_program(block, &words);
                } else {
                    self.sequence_error();
                }
                return;
            }
            Pending::EraseSetup => {
                if command == Some(CMD_CONFIRM) {
                    self.intel_erase(offset);
                } else {
                    self.sequence_error();
                }
                return;
            }
            Pending::LockSetup => {
                match command {
                    Some(CMD_LOCK_SET) => {
                        self.set_protected(offset, true);
                        self.begin_operation();
                    }
                    Some(CMD_CONFIRM) => {
                        self.set_protected(offset, false);
                        self.begin_operation();
                    }
                    Some(CMD_CONFIG_REG) => {
                        // The value arrives on the address lines
                        self.config_register = Some(offset / self.layout().bus_width());
                        self.mode = Mode::Array;
                    }
                    _ => self.sequence_error(),
                }
                return;
            }
            Pending::ReadyBusyConfig => {
                self.ready_busy_mode = command;
                return;
            }
            // AMD only
            Pending::BypassReset | Pending::ExitSecured => {}
        }

        let Some(command) = command else {
            log::trace!("sim: ignoring split command 0x{:x}", value);
            return;
        };
        match command {
            CMD_READ_ARRAY | CMD_READ_ARRAY_ALT => self.mode = Mode::Array,
            CMD_READ_ID => self.mode = Mode::Identifier,
            CMD_CFI_QUERY => self.mode = Mode::Query,
            CMD_READ_STATUS => self.mode = Mode::Status,
            CMD_CLEAR_STATUS => self.status = 0,
            CMD_BLOCK_ERASE => self.pending = Pending::EraseSetup,
            CMD_PROGRAM | CMD_PROGRAM_ALT | CMD_PROGRAM_PLATFORM => self.pending = Pending::Program,
            CMD_WRITE_BUFFER | CMD_WRITE_BUFFER_PLATFORM => {
                self.pending = Pending::BufferCount {
                    block: self.block_index(offset),
                };
                self.mode = Mode::Status;
            }
            CMD_LOCK_SETUP => self.pending = Pending::LockSetup,
            CMD_SUSPEND => {
                if self.busy_left > 0 {
                    self.busy_left = 0;
                    self.status |= status::ERASE_SUSPENDED;
                }
                self.mode = Mode::Status;
            }
            CMD_CONFIRM => self.status &= !status::ERASE_SUSPENDED,
            CMD_CONFIG => self.pending = Pending::ReadyBusyConfig,
            other => log::debug!("sim: unknown Intel command 0x{:02x}", other),
        }
    }
}
